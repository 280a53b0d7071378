//! Error types for the mail poller.

use std::path::PathBuf;

/// Top-level error type for the poller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration-related errors. These are fatal: the supervisor never
/// starts on top of a broken configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration lists no accounts")]
    NoAccounts,

    #[error("Configuration has no enabled accounts")]
    NoEnabledAccounts,

    #[error("Duplicate account id: {id}")]
    DuplicateAccountId { id: String },

    #[error("Invalid configuration for account {id}: {reason}")]
    InvalidAccount { id: String, reason: String },
}

/// Per-account launch errors. Recorded and aggregated in the start report;
/// a failed launch never aborts the other accounts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to build fetcher for account {id}: {reason}")]
    FetcherInit { id: String, reason: String },
}

/// Errors from a fetch operation.
///
/// Classification drives the worker's retry policy: transient errors are
/// retried on the next poll interval, permanent ones stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Fetch timed out: {reason}")]
    Timeout { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed for {username}")]
    Auth { username: String },

    #[error("Account is misconfigured: {reason}")]
    Misconfigured { reason: String },
}

impl FetchError {
    /// True for errors no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Misconfigured { .. })
    }
}

/// Errors from the message sink. Always treated as transient: the same
/// messages are re-fetched and re-dispatched on a later cycle.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink rejected {count} messages from account {account}: {reason}")]
    Rejected {
        account: String,
        count: usize,
        reason: String,
    },

    #[error("Sink unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Failure of one poll cycle: either the fetch leg or the dispatch leg.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl CycleError {
    /// Sink failures are always transient; fetch failures carry their own
    /// classification.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_permanent(),
            Self::Sink(_) => false,
        }
    }
}

/// Result type alias for the poller.
pub type Result<T> = std::result::Result<T, Error>;
