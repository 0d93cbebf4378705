//! Sync error types.
//!
//! Local and remote failures are kept in separate types because they are
//! handled differently: a [`StoreError`] always reaches the caller, while a
//! [`RemoteError`] is logged by the poller or the put task and then dropped.

use std::path::PathBuf;

/// Errors from the local note store. These are never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Schema migration failure
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// Failed to prepare the database location
    #[error("I/O error for {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    /// Version does not fit in the store's integer column
    #[error("Version {1} of note '{0}' is out of range")]
    VersionOutOfRange(String, u64),
    /// A stored row could not be turned back into a note
    #[error("Corrupt row for note '{0}': {1}")]
    CorruptRow(String, String),
}

/// Errors from the remote note service. Expected and transient.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Remote sync is not configured
    #[error("Remote not configured. Add server_url to config.")]
    NotConfigured,
    /// Transport failure, timeout, or undecodable body
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with an unexpected status
    #[error("Server returned status {0}")]
    Status(u16),
    /// Service unavailable for any other reason
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

/// Returned when a merged view has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Synced view closed")]
pub struct ViewClosed;
