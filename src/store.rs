//! Local folder archive
//!
//! One folder is stored as two files side by side:
//!
//! - `<folder>.mbox` -- append-only mboxrd archive of message bodies
//! - `<folder>.imap` -- JSON index with the folder's UIDVALIDITY and
//!   the UID of every archived message, in archive order
//!
//! `uids[i]` always names the i-th frame of the archive. The index is
//! only rewritten after the matching frame has been appended, so it
//! never points at a frame that does not exist.

use crate::error::{Error, Result};
use crate::mboxrd;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::iter::Enumerate;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Index format written by this crate.
pub const CURRENT_VERSION: u32 = 2;

#[derive(Serialize)]
struct IndexOut<'a> {
    version: u32,
    uid_validity: Option<u32>,
    uids: &'a [u32],
}

#[derive(Deserialize)]
struct IndexIn {
    #[serde(default, alias = "validity")]
    uid_validity: Option<u32>,
    #[serde(alias = "ids")]
    uids: Vec<u32>,
}

#[derive(Debug, Default)]
struct Index {
    uid_validity: Option<u32>,
    uids: Vec<u32>,
}

/// Nothing is read from disk until the first accessor runs.
#[derive(Debug)]
enum State {
    Unopened,
    Opened(Index),
}

/// Append-only archive of one mirrored folder.
///
/// A store assumes it is the only writer of its files for as long as
/// it lives: the index is read once, on first access, and never
/// re-read.
#[derive(Debug)]
pub struct MboxStore {
    dir: PathBuf,
    folder: String,
    state: State,
}

impl MboxStore {
    /// Create a store for `folder` under `dir`. No I/O happens here.
    ///
    /// Folder names containing `/` map to subdirectories of `dir`. Names
    /// that would leave `dir` (`..`, absolute paths) are rejected with
    /// [`Error::Config`] on first access.
    pub fn new(dir: impl Into<PathBuf>, folder: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            folder: folder.into(),
            state: State::Unopened,
        }
    }

    /// The folder name the files are named after.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    #[must_use]
    pub fn mbox_path(&self) -> PathBuf {
        self.dir.join(format!("{}.mbox", self.folder))
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(format!("{}.imap", self.folder))
    }

    /// True when both the archive and the index exist on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.mbox_path().exists() && self.index_path().exists()
    }

    /// The folder's UIDVALIDITY, if one has been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error only if an unusable index had to be reset and
    /// the reset itself failed.
    pub fn uid_validity(&mut self) -> Result<Option<u32>> {
        Ok(self.index()?.uid_validity)
    }

    /// Record the folder's UIDVALIDITY and persist the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn set_uid_validity(&mut self, uid_validity: u32) -> Result<()> {
        self.index()?.uid_validity = Some(uid_validity);
        self.write_index()
    }

    /// UIDs of the archived messages, in archive order.
    ///
    /// # Errors
    ///
    /// Returns an error only if an unusable index had to be reset and
    /// the reset itself failed.
    pub fn uids(&mut self) -> Result<&[u32]> {
        Ok(&self.index()?.uids)
    }

    /// Archive a message.
    ///
    /// Adding a UID that is already present does nothing. A failure to
    /// write the archive is logged and swallowed: the UID stays unknown,
    /// so the message is fetched again on the next run. Once the frame is
    /// written the UID is kept in memory even if the index write fails;
    /// the next successful index write records it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no UIDVALIDITY has been set.
    pub fn add(&mut self, uid: u32, body: &[u8]) -> Result<()> {
        let index = self.index()?;
        if index.uid_validity.is_none() {
            return Err(Error::Config(format!(
                "[{}] can't add messages without uid_validity",
                self.folder
            )));
        }
        if index.uids.contains(&uid) {
            debug!("[{}] message {} already downloaded - skipping", self.folder, uid);
            return Ok(());
        }

        if let Err(e) = self.append(body) {
            warn!(
                "[{}] failed to save message {} ({} bytes): {}",
                self.folder,
                uid,
                body.len(),
                e
            );
            return Ok(());
        }

        // The frame is in the archive now, so the uid must stay in memory
        // even if the index cannot be written: the next successful write
        // brings the index back in line with the archive.
        self.index()?.uids.push(uid);
        if let Err(e) = self.write_index() {
            warn!(
                "[{}] failed to write index after saving message {}: {}",
                self.folder, uid, e
            );
        }
        Ok(())
    }

    /// Load a single message body by UID.
    ///
    /// Scans the archive from the start; use [`MboxStore::get_many`]
    /// when reading more than one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read.
    pub fn get(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let Some(position) = self.index()?.uids.iter().position(|&u| u == uid) else {
            return Ok(None);
        };
        let file = File::open(self.mbox_path())?;
        Ok(mboxrd::decode(BufReader::new(file))
            .nth(position)
            .transpose()?)
    }

    /// Iterate over the requested messages in a single archive pass.
    ///
    /// Pairs come back in archive order, not in the order of `uids`.
    /// Unknown UIDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be opened. Read errors
    /// during iteration are yielded as items.
    pub fn get_many(&mut self, uids: &[u32]) -> Result<Messages> {
        let known = &self.index()?.uids;
        let wanted = uids
            .iter()
            .filter_map(|&uid| known.iter().position(|&u| u == uid).map(|pos| (pos, uid)))
            .collect();
        let file = File::open(self.mbox_path())?;
        Ok(Messages {
            frames: mboxrd::decode(BufReader::new(file)).enumerate(),
            wanted,
        })
    }

    /// Replace `old` with `new` in the index, keeping its position.
    ///
    /// Does nothing if `old` is unknown. The archive is not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn update_id(&mut self, old: u32, new: u32) -> Result<()> {
        let index = self.index()?;
        let Some(position) = index.uids.iter().position(|&u| u == old) else {
            return Ok(());
        };
        if old != new && index.uids.contains(&new) {
            warn!(
                "[{}] cannot renumber {} to {}: {} is already archived",
                self.folder, old, new, new
            );
            return Ok(());
        }
        index.uids[position] = new;
        self.write_index()
    }

    /// Forget everything: drop the index, truncate the archive, and
    /// clear the UIDVALIDITY.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be removed or recreated.
    pub fn reset(&mut self) -> Result<()> {
        check_folder_name(&self.folder)?;
        self.state = State::Opened(Index::default());
        self.reset_files()
    }

    /// Move both files to `new_name` and adopt it as the folder name.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be renamed.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        check_folder_name(new_name)?;
        let mbox = self.dir.join(format!("{new_name}.mbox"));
        let index = self.dir.join(format!("{new_name}.imap"));
        create_parent(&mbox)?;
        fs::rename(self.mbox_path(), mbox)?;
        fs::rename(self.index_path(), index)?;
        self.folder = new_name.to_string();
        Ok(())
    }

    /// True when the index on disk would load as is.
    ///
    /// Unlike the other accessors this never resets the store, so it is
    /// safe to call from read-only commands.
    #[must_use]
    pub fn has_usable_index(&self) -> bool {
        check_folder_name(&self.folder).is_ok() && self.read_index().is_some()
    }

    /// Bring the store in line with the server's UIDVALIDITY.
    ///
    /// A store without a UIDVALIDITY adopts the server's. When the two
    /// differ the server has renumbered the folder: the existing files
    /// are moved aside to `<folder>-<old validity>` (with a `-N` suffix
    /// if that name is taken) and this store starts over empty.
    ///
    /// Returns the name the old archive was moved to, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be moved or the new index
    /// cannot be written.
    pub fn apply_uid_validity(&mut self, uid_validity: u32) -> Result<Option<String>> {
        match self.uid_validity()? {
            Some(current) if current == uid_validity => Ok(None),
            None => {
                self.set_uid_validity(uid_validity)?;
                Ok(None)
            }
            Some(current) => {
                let folder = self.folder.clone();
                let moved_to = self.unused_name(current);
                self.rename(&moved_to)?;
                info!(
                    "[{}] UIDVALIDITY changed from {} to {}, old archive moved to {}",
                    folder, current, uid_validity, moved_to
                );

                *self = Self::new(self.dir.clone(), folder);
                self.set_uid_validity(uid_validity)?;
                Ok(Some(moved_to))
            }
        }
    }

    // -- private helpers --

    fn unused_name(&self, uid_validity: u32) -> String {
        let base = format!("{}-{}", self.folder, uid_validity);
        let taken = |name: &str| {
            let candidate = Self::new(self.dir.clone(), name);
            candidate.mbox_path().exists() || candidate.index_path().exists()
        };

        let mut name = base.clone();
        let mut suffix = 0;
        while taken(name.as_str()) {
            suffix += 1;
            name = format!("{base}-{suffix}");
        }
        name
    }

    fn index(&mut self) -> Result<&mut Index> {
        if matches!(self.state, State::Unopened) {
            check_folder_name(&self.folder)?;
            let index = match self.read_index() {
                Some(index) => index,
                None => {
                    self.reset_files()?;
                    Index::default()
                }
            };
            self.state = State::Opened(index);
        }
        match &mut self.state {
            State::Opened(index) => Ok(index),
            State::Unopened => unreachable!("store is opened above"),
        }
    }

    fn read_index(&self) -> Option<Index> {
        if !self.exists() {
            return None;
        }
        let content = fs::read_to_string(self.index_path()).ok()?;
        if !content.starts_with('{') {
            debug!("[{}] index is not JSON, ignoring it", self.folder);
            return None;
        }
        match serde_json::from_str::<IndexIn>(&content) {
            Ok(data) => Some(Index {
                uid_validity: data.uid_validity,
                uids: data.uids,
            }),
            Err(e) => {
                debug!("[{}] unreadable index, ignoring it: {}", self.folder, e);
                None
            }
        }
    }

    fn append(&self, body: &[u8]) -> Result<()> {
        let frame = mboxrd::encode(body);
        let mut mbox = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.mbox_path())?;
        mbox.write_all(&frame)?;
        Ok(())
    }

    fn write_index(&self) -> Result<()> {
        let State::Opened(index) = &self.state else {
            return Ok(());
        };
        let content = serde_json::to_string(&IndexOut {
            version: CURRENT_VERSION,
            uid_validity: index.uid_validity,
            uids: &index.uids,
        })?;
        let path = self.index_path();
        create_parent(&path)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn reset_files(&self) -> Result<()> {
        let index = self.index_path();
        let mbox = self.mbox_path();
        if index.exists() {
            fs::remove_file(&index)?;
        }
        if mbox.exists() {
            fs::remove_file(&mbox)?;
        }
        create_parent(&mbox)?;
        File::create(mbox)?;
        Ok(())
    }
}

/// Folder names come from the server; they must stay inside the
/// mirror directory.
fn check_folder_name(name: &str) -> Result<()> {
    let escapes = Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if name.is_empty() || escapes {
        return Err(Error::Config(format!(
            "folder name {name:?} would leave the mirror directory"
        )));
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Lazy iterator returned by [`MboxStore::get_many`].
pub struct Messages {
    frames: Enumerate<mboxrd::Frames<BufReader<File>>>,
    // archive position -> uid
    wanted: HashMap<usize, u32>,
}

impl Iterator for Messages {
    type Item = Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.wanted.is_empty() {
            let (position, frame) = self.frames.next()?;
            let Some(uid) = self.wanted.remove(&position) else {
                continue;
            };
            return Some(frame.map(|body| (uid, body)).map_err(Error::from));
        }
        None
    }
}
