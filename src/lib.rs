//! Incremental IMAP folder mirror
//!
//! Mirrors remote IMAP folders into local mbox archives. Each folder
//! gets an append-only `.mbox` file and a JSON `.imap` index of the
//! UIDs it holds, so re-running a mirror only fetches what is new,
//! and an interrupted or partially failed run converges on the next
//! one.
//!
//! - [`MboxStore`] persists messages and the index.
//! - [`Downloader`] fetches the UIDs a store is missing from a
//!   [`RemoteFolder`], degrading to single-message fetches on failure.
//! - [`MirrorClient`] wires both to a live IMAP account.

mod client;
mod config;
mod connection;
mod downloader;
mod error;
mod folder;
pub mod mboxrd;
mod store;

pub use client::{FolderBackup, FolderStatus, MirrorClient, folder_status};
pub use config::{ImapConfig, MirrorConfig};
pub use downloader::{Downloader, SyncReport};
pub use error::{Error, Result};
pub use folder::{FetchedMessage, ImapFolder, RemoteFolder};
pub use store::{CURRENT_VERSION, MboxStore, Messages};
