//! In-memory remote folder for integration testing
//!
//! Provides a builder-style API for constructing folder state:
//!
//! ```ignore
//! let folder = FakeFolderBuilder::new("INBOX")
//!     .email(1, raw_rfc2822_bytes)
//!     .email(2, raw_rfc2822_bytes)
//!     .failing(2)
//!     .build();
//! ```
//!
//! Every fetch is recorded in `requests` so tests can assert on the
//! exact sequence of batches the downloader asked for.

use imap_mirror::{FetchedMessage, RemoteFolder};
use std::collections::{BTreeMap, HashSet};

/// A remote folder backed by a map of UID -> raw message.
#[derive(Debug, Clone)]
pub struct FakeFolder {
    name: String,
    uids: Vec<u32>,
    messages: BTreeMap<u32, Vec<u8>>,
    /// UIDs whose fetch always fails.
    pub failing: HashSet<u32>,
    /// When set, any fetch of more than one UID fails.
    pub reject_batches: bool,
    pub requests: Vec<Vec<u32>>,
}

impl FakeFolder {
    /// Add a message to the remote, as if it had just been delivered.
    pub fn deliver(&mut self, uid: u32, raw: &[u8]) {
        self.messages.insert(uid, raw.to_vec());
        self.uids = self.messages.keys().copied().collect();
    }
}

impl RemoteFolder for FakeFolder {
    fn name(&self) -> &str {
        &self.name
    }

    fn uids(&self) -> &[u32] {
        &self.uids
    }

    async fn fetch_batch(&mut self, uids: &[u32]) -> Option<Vec<FetchedMessage>> {
        self.requests.push(uids.to_vec());

        if self.reject_batches && uids.len() > 1 {
            return None;
        }
        if uids.iter().any(|uid| self.failing.contains(uid)) {
            return None;
        }

        Some(
            uids.iter()
                .filter_map(|uid| {
                    self.messages.get(uid).map(|body| FetchedMessage {
                        uid: *uid,
                        body: body.clone(),
                    })
                })
                .collect(),
        )
    }
}

/// Builder for constructing a `FakeFolder` step by step.
pub struct FakeFolderBuilder {
    folder: FakeFolder,
}

impl FakeFolderBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            folder: FakeFolder {
                name: name.to_string(),
                uids: Vec::new(),
                messages: BTreeMap::new(),
                failing: HashSet::new(),
                reject_batches: false,
                requests: Vec::new(),
            },
        }
    }

    /// Add a message with the given UID.
    pub fn email(mut self, uid: u32, raw: &[u8]) -> Self {
        self.folder.deliver(uid, raw);
        self
    }

    /// Make every fetch that includes `uid` fail.
    pub fn failing(mut self, uid: u32) -> Self {
        self.folder.failing.insert(uid);
        self
    }

    /// Make every multi-UID fetch fail.
    pub fn reject_batches(mut self) -> Self {
        self.folder.reject_batches = true;
        self
    }

    /// Consume the builder and return the finished `FakeFolder`.
    pub fn build(self) -> FakeFolder {
        self.folder
    }
}
