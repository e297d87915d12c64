//! Account-level mirroring

use crate::config::MirrorConfig;
use crate::connection;
use crate::downloader::{Downloader, SyncReport};
use crate::error::Result;
use crate::folder::{ImapFolder, RemoteFolder};
use crate::store::MboxStore;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{Instrument, error, info, info_span};

/// Result of mirroring one folder.
#[derive(Debug, Clone, Serialize)]
pub struct FolderBackup {
    pub folder: String,
    /// Where the previous archive went after a UIDVALIDITY change.
    pub moved_to: Option<String>,
    pub report: SyncReport,
}

/// How far the local copy of a folder lags behind the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderStatus {
    pub folder: String,
    pub remote: usize,
    pub local: usize,
    /// Remote messages not yet mirrored.
    pub missing: usize,
}

/// Mirrors the folders of one IMAP account into a local directory.
pub struct MirrorClient {
    config: MirrorConfig,
}

impl MirrorClient {
    #[must_use]
    pub const fn new(config: MirrorConfig) -> Self {
        Self { config }
    }

    /// List all available IMAP folders
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or LIST command fails.
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        let mut session = connection::connect(&self.config.imap).await?;
        let names = connection::list(&mut session).await?;
        session.logout().await.ok();
        Ok(names)
    }

    /// Mirror every configured folder.
    ///
    /// A folder that fails is logged and left for the next run; the
    /// remaining folders are still mirrored.
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list cannot be retrieved.
    pub async fn backup(&self) -> Result<Vec<FolderBackup>> {
        let folders = self.folder_names().await?;
        Ok(for_each_folder("backup", folders, |folder| async move {
            self.backup_folder(&folder).await
        })
        .await)
    }

    /// Compare each configured folder with its local copy.
    ///
    /// Like [`MirrorClient::backup`], a folder that cannot be examined
    /// is logged and left out of the result.
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list cannot be retrieved.
    pub async fn status(&self) -> Result<Vec<FolderStatus>> {
        let folders = self.folder_names().await?;
        Ok(for_each_folder("status", folders, |folder| async move {
            self.status_folder(&folder).await
        })
        .await)
    }

    // -- private helpers --

    async fn folder_names(&self) -> Result<Vec<String>> {
        if self.config.folders.is_empty() {
            self.list_folders().await
        } else {
            Ok(self.config.folders.clone())
        }
    }

    async fn status_folder(&self, name: &str) -> Result<FolderStatus> {
        let remote = ImapFolder::open(&self.config.imap, name).await?;
        let mut store = MboxStore::new(&self.config.local_path, name);
        let status = folder_status(&remote, remote.uid_validity(), &mut store);
        remote.close().await;
        status
    }

    async fn backup_folder(&self, name: &str) -> Result<FolderBackup> {
        let mut folder = ImapFolder::open(&self.config.imap, name).await?;
        let mut store = MboxStore::new(&self.config.local_path, name);

        let moved_to = match store.apply_uid_validity(folder.uid_validity()) {
            Ok(moved_to) => moved_to,
            Err(e) => {
                folder.close().await;
                return Err(e);
            }
        };

        let report = Downloader::new(&mut folder, &mut store)
            .batch_size(self.config.batch_size)
            .run()
            .await;
        folder.close().await;
        let report = report?;

        info!(
            "[{}] {} fetched, {} skipped",
            name,
            report.fetched,
            report.skipped.len()
        );
        Ok(FolderBackup {
            folder: name.to_string(),
            moved_to,
            report,
        })
    }
}

/// Run `command` on every folder, each inside its own span.
///
/// Errors are logged per folder and do not stop the loop.
async fn for_each_folder<T, F, Fut>(command: &str, folders: Vec<String>, mut run: F) -> Vec<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut results = Vec::new();

    for folder in folders {
        let span = info_span!("folder", command, folder = %folder);
        match run(folder.clone()).instrument(span).await {
            Ok(result) => results.push(result),
            Err(e) => error!("[{}] {} failed: {}", folder, command, e),
        }
    }

    results
}

/// Status of one folder against its local store.
///
/// A store that does not exist yet, has an unreadable index, or was
/// filled under a different UIDVALIDITY counts as empty. The store is
/// only read: missing stores are not created and unusable ones are not
/// reset.
///
/// # Errors
///
/// Returns an error if the index changes on disk between the usability
/// check and the read, and the store then fails to reset.
pub fn folder_status<F: RemoteFolder>(
    remote: &F,
    uid_validity: u32,
    store: &mut MboxStore,
) -> Result<FolderStatus> {
    let local: HashSet<u32> =
        if store.has_usable_index() && store.uid_validity()? == Some(uid_validity) {
            store.uids()?.iter().copied().collect()
        } else {
            HashSet::new()
        };
    let missing = remote.uids().iter().filter(|uid| !local.contains(uid)).count();

    Ok(FolderStatus {
        folder: remote.name().to_string(),
        remote: remote.uids().len(),
        local: local.len(),
        missing,
    })
}
