//! Incremental folder download
//!
//! Fetches every remote UID the local store does not have yet, in
//! batches. When a multi-message fetch fails the downloader falls back
//! to one message per fetch for the rest of the run; a single message
//! that still fails is skipped and stays missing until the next run.

use crate::error::Result;
use crate::folder::RemoteFolder;
use crate::store::MboxStore;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{Instrument, debug, info, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchMode {
    Batching(usize),
    /// Entered after a failed multi-message fetch. Never left.
    Degraded,
}

impl BatchMode {
    const fn size(self) -> usize {
        match self {
            Self::Batching(size) => size,
            Self::Degraded => 1,
        }
    }
}

/// Outcome of a [`Downloader::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Remote UIDs that were not in the store when the run started.
    pub missing: usize,
    /// Messages returned by the server and handed to the store.
    pub fetched: usize,
    /// UIDs whose single-message fetch failed.
    pub skipped: Vec<u32>,
}

/// Brings one [`MboxStore`] up to date with one [`RemoteFolder`].
pub struct Downloader<'a, F> {
    folder: &'a mut F,
    store: &'a mut MboxStore,
    mode: BatchMode,
}

impl<'a, F: RemoteFolder> Downloader<'a, F> {
    pub const fn new(folder: &'a mut F, store: &'a mut MboxStore) -> Self {
        Self {
            folder,
            store,
            mode: BatchMode::Batching(1),
        }
    }

    /// Number of UIDs to request per fetch until the first failure.
    /// Zero is treated as one.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.mode = BatchMode::Batching(size.max(1));
        self
    }

    /// Download everything that is missing locally.
    ///
    /// Fetch failures never abort the run; they are logged and the
    /// affected UIDs are listed in [`SyncReport::skipped`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the store has
    /// no UIDVALIDITY, and I/O errors from opening the store.
    pub async fn run(self) -> Result<SyncReport> {
        let span = info_span!("download", folder = %self.folder.name());
        self.download().instrument(span).await
    }

    async fn download(mut self) -> Result<SyncReport> {
        let local: HashSet<u32> = self.store.uids()?.iter().copied().collect();
        let missing: Vec<u32> = self
            .folder
            .uids()
            .iter()
            .copied()
            .filter(|uid| !local.contains(uid))
            .collect();
        let count = missing.len();
        info!("{} new messages", count);

        let mut report = SyncReport {
            missing: count,
            ..SyncReport::default()
        };
        let mut offset = 0;

        while offset < count {
            let end = (offset + self.mode.size()).min(count);
            let block = &missing[offset..end];

            let Some(messages) = self.folder.fetch_batch(block).await else {
                if let BatchMode::Batching(size) = self.mode
                    && size > 1
                {
                    debug!("Multi fetch failed for UIDs {:?}, switching to single fetches", block);
                    self.mode = BatchMode::Degraded;
                } else {
                    debug!("Fetch failed for UID {} - skipping", block[0]);
                    report.skipped.extend_from_slice(block);
                    offset = end;
                }
                continue;
            };

            for (j, message) in messages.iter().enumerate() {
                debug!(
                    "uid: {} ({}/{}) - {} bytes",
                    message.uid,
                    offset + j + 1,
                    count,
                    message.body.len()
                );
                self.store.add(message.uid, &message.body)?;
                report.fetched += 1;
            }
            offset = end;
        }

        Ok(report)
    }
}
