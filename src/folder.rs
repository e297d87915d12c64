//! Remote folders
//!
//! [`RemoteFolder`] is everything the [`Downloader`](crate::Downloader)
//! needs from the server side: the folder's current UIDs and a batched
//! fetch. [`ImapFolder`] implements it over a live IMAP session.

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use futures::StreamExt;
use tracing::{debug, warn};

/// A message body as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub body: Vec<u8>,
}

/// The server side of a folder mirror.
#[allow(async_fn_in_trait)]
pub trait RemoteFolder {
    /// Folder name, used for logging.
    fn name(&self) -> &str;

    /// UIDs currently in the folder, ascending.
    fn uids(&self) -> &[u32];

    /// Fetch the bodies of `uids`.
    ///
    /// Returns `None` when the fetch fails. A successful fetch may
    /// return fewer messages than requested (e.g. when some were
    /// expunged in the meantime).
    async fn fetch_batch(&mut self, uids: &[u32]) -> Option<Vec<FetchedMessage>>;
}

/// A folder EXAMINEd on a dedicated IMAP session.
pub struct ImapFolder {
    session: ImapSession,
    name: String,
    uid_validity: u32,
    uids: Vec<u32>,
}

impl ImapFolder {
    /// Connect, EXAMINE `name` and snapshot its UIDVALIDITY and UIDs.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, EXAMINE or UID SEARCH
    /// fails, or if the server does not report a UIDVALIDITY.
    pub async fn open(config: &ImapConfig, name: &str) -> Result<Self> {
        let mut session = connection::connect(config).await?;
        let mailbox = connection::examine(&mut session, name).await?;
        let uid_validity = mailbox
            .uid_validity
            .ok_or_else(|| Error::Imap(format!("{name} has no UIDVALIDITY")))?;

        let mut uids: Vec<u32> = session
            .uid_search("ALL")
            .await
            .map_err(|e| Error::Imap(format!("Search failed: {e}")))?
            .into_iter()
            .collect();
        uids.sort_unstable();

        debug!("{}: UIDVALIDITY {}, {} messages", name, uid_validity, uids.len());
        Ok(Self {
            session,
            name: name.to_string(),
            uid_validity,
            uids,
        })
    }

    #[must_use]
    pub const fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    /// Log out, ignoring errors.
    pub async fn close(mut self) {
        self.session.logout().await.ok();
    }
}

impl RemoteFolder for ImapFolder {
    fn name(&self) -> &str {
        &self.name
    }

    fn uids(&self) -> &[u32] {
        &self.uids
    }

    async fn fetch_batch(&mut self, uids: &[u32]) -> Option<Vec<FetchedMessage>> {
        let uid_set = uids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let responses: Vec<_> = match self.session.uid_fetch(&uid_set, "(UID BODY.PEEK[])").await {
            Ok(stream) => stream.collect().await,
            Err(e) => {
                warn!("{}: fetch of UIDs {} failed: {}", self.name, uid_set, e);
                return None;
            }
        };

        let mut messages = Vec::with_capacity(responses.len());
        for response in responses {
            let fetch = match response {
                Ok(fetch) => fetch,
                Err(e) => {
                    warn!("{}: fetch error for UIDs {}: {}", self.name, uid_set, e);
                    return None;
                }
            };
            // Unsolicited flag updates arrive as FETCH responses too.
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                debug!("{}: ignoring FETCH response without UID or body", self.name);
                continue;
            };
            messages.push(FetchedMessage {
                uid,
                body: body.to_vec(),
            });
        }
        Some(messages)
    }
}
