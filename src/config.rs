//! IMAP connection and mirror configuration

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `1143`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or
    /// `IMAP_PORT` is not a valid port number.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("IMAP_PORT")
                .unwrap_or_else(|| "1143".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username: lookup("IMAP_USERNAME")
                .ok_or_else(|| Error::Config("IMAP_USERNAME not set".into()))?,
            password: lookup("IMAP_PASSWORD")
                .ok_or_else(|| Error::Config("IMAP_PASSWORD not set".into()))?,
        })
    }
}

/// Everything a mirror run needs: where to connect, where to write,
/// and how to fetch.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub imap: ImapConfig,
    /// Directory holding one `.mbox`/`.imap` pair per folder.
    pub local_path: PathBuf,
    /// Initial number of UIDs requested per fetch.
    pub batch_size: usize,
    /// Folders to mirror. Empty means every folder on the server.
    pub folders: Vec<String>,
}

impl MirrorConfig {
    /// Load mirror configuration from environment variables
    ///
    /// On top of the [`ImapConfig`] variables:
    /// - `MIRROR_PATH` (default: `./mirror`)
    /// - `MIRROR_BATCH_SIZE` (default: `1`)
    /// - `MIRROR_FOLDERS`, comma separated (default: all folders)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for missing credentials or a batch
    /// size that is not a positive integer.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let imap = ImapConfig::from_lookup(&lookup)?;

        let batch_size = match lookup("MIRROR_BATCH_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(Error::Config(format!(
                        "Invalid MIRROR_BATCH_SIZE: {raw}"
                    )));
                }
                Ok(n) => n,
            },
            None => 1,
        };

        let folders = lookup("MIRROR_FOLDERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            imap,
            local_path: lookup("MIRROR_PATH")
                .map_or_else(|| PathBuf::from("./mirror"), PathBuf::from),
            batch_size,
            folders,
        })
    }
}
