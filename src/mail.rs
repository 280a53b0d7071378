//! Collaborator interfaces: mail fetch and message dispatch.
//!
//! The wire protocol and message parsing live behind these traits. The
//! supervisor only cares that a fetcher yields new messages (or a
//! classified error) and that the sink accepts them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AccountConfig;
use crate::error::{FetchError, SinkError, StartupError};

/// A newly fetched message, unparsed.
///
/// Body and attachment parsing is downstream's concern; the poller hands
/// the raw payload over untouched.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// Server-side unique id (e.g. an IMAP UID).
    pub uid: String,
    /// Sender address as reported by the envelope.
    pub sender: String,
    /// Subject line, if the envelope carried one.
    pub subject: Option<String>,
    /// When the server received the message.
    pub received_at: DateTime<Utc>,
    /// Raw RFC 822 payload.
    pub raw: Vec<u8>,
}

/// Fetches new messages for a single account.
///
/// One fetcher exists per worker and is owned by it, so implementations
/// may keep connection or cursor state (last seen UID) without locking.
#[async_trait]
pub trait MailFetcher: Send {
    /// Fetch messages that arrived since the last call.
    ///
    /// Failures are classified via [`FetchError::is_permanent`]: transient
    /// failures are retried on the next poll cycle, permanent ones stop
    /// the account's worker.
    async fn fetch_new(&mut self) -> Result<Vec<FetchedMessage>, FetchError>;
}

/// Builds one [`MailFetcher`] per account at startup.
///
/// This is the per-account launch-failure point: an error here is recorded
/// in the start report and the remaining accounts launch normally.
pub trait FetcherFactory: Send + Sync {
    fn fetcher_for(&self, account: &AccountConfig) -> Result<Box<dyn MailFetcher>, StartupError>;
}

/// Accepts fetched messages for downstream processing.
///
/// Shared by all workers; implementations must be safe to call from
/// concurrent poll cycles.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Hand over one poll cycle's messages for the given account.
    ///
    /// A rejection is treated as a transient cycle error: the worker logs
    /// it and retries the whole cycle at the next interval.
    async fn deliver(
        &self,
        account_id: &str,
        messages: Vec<FetchedMessage>,
    ) -> Result<(), SinkError>;
}
