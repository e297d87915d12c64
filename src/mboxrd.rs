//! mboxrd framing for archive files
//!
//! Each message is written as a `From_` separator line, the body with
//! every `^>*From ` line quoted by one extra `>`, and a trailing blank
//! line. Decoding reverses the quoting, so any byte payload survives a
//! round trip unchanged.

use chrono::{DateTime, FixedOffset, Utc};
use std::io::{self, BufRead};

const SEPARATOR: &[u8] = b"From ";
const FALLBACK_SENDER: &str = "MAILER-DAEMON";

/// Encode a raw message into a single archive frame.
#[must_use]
pub fn encode(body: &[u8]) -> Vec<u8> {
    let (sender, date) = envelope(body);
    let mut frame = format!("From {sender} {}\n", date.format("%a %b %e %H:%M:%S %Y")).into_bytes();
    frame.reserve(body.len() + 2);

    for line in body.split_inclusive(|&b| b == b'\n') {
        if is_quoted_from(line) {
            frame.push(b'>');
        }
        frame.extend_from_slice(line);
    }

    frame.push(b'\n');
    frame
}

/// Lazily decode every frame in an archive stream, in file order.
pub const fn decode<R: BufRead>(reader: R) -> Frames<R> {
    Frames {
        reader,
        started: false,
        done: false,
    }
}

/// Single-pass iterator over the message bodies of an archive.
pub struct Frames<R> {
    reader: R,
    // A `From_` line has been consumed and its body not yet yielded.
    started: bool,
    done: bool,
}

impl<R: BufRead> Frames<R> {
    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();
        Ok(self.reader.read_until(b'\n', line)? > 0)
    }

    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();

        while !self.started {
            if !self.read_line(&mut line)? {
                self.done = true;
                return Ok(None);
            }
            self.started = line.starts_with(SEPARATOR);
        }

        let mut body = Vec::new();
        loop {
            if !self.read_line(&mut line)? {
                self.done = true;
                break;
            }
            if line.starts_with(SEPARATOR) {
                break;
            }
            if line.first() == Some(&b'>') && is_quoted_from(&line) {
                body.extend_from_slice(&line[1..]);
            } else {
                body.extend_from_slice(&line);
            }
        }

        if body.last() == Some(&b'\n') {
            body.pop();
        }
        Ok(Some(body))
    }
}

impl<R: BufRead> Iterator for Frames<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(frame) => frame.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Whether `line` matches `^>*From `.
fn is_quoted_from(line: &[u8]) -> bool {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    line[quotes..].starts_with(SEPARATOR)
}

/// Sender address and date for the `From_` line, taken from the
/// message headers when they are usable.
fn envelope(body: &[u8]) -> (String, DateTime<FixedOffset>) {
    let mut sender = None;
    let mut date = None;

    for line in body.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if sender.is_none() && name.eq_ignore_ascii_case("from") {
            sender = address(value);
        } else if date.is_none() && name.eq_ignore_ascii_case("date") {
            date = DateTime::parse_from_rfc2822(value.trim()).ok();
        }
    }

    (
        sender.unwrap_or_else(|| FALLBACK_SENDER.to_string()),
        date.unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH.fixed_offset()),
    )
}

fn address(header: &str) -> Option<String> {
    let candidate = match (header.find('<'), header.rfind('>')) {
        (Some(start), Some(end)) if start < end => &header[start + 1..end],
        _ => header.split_whitespace().next().unwrap_or_default(),
    };
    let candidate = candidate.trim();
    if candidate.is_empty() || candidate.contains(char::is_whitespace) {
        None
    } else {
        Some(candidate.to_string())
    }
}
