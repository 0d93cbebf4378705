use async_trait::async_trait;

use super::error::RemoteError;
use crate::models::Note;

/// The authoritative remote note service.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// Fetches a note by title. `Ok(None)` means the server has no such note.
    async fn fetch(&self, title: &str) -> Result<Option<Note>, RemoteError>;

    /// Stores a note on the server as-is, version included.
    async fn put(&self, note: &Note) -> Result<(), RemoteError>;
}

/// Stand-in used when no server is configured: nothing is ever found and
/// every push fails with [`RemoteError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteClient for OfflineRemote {
    async fn fetch(&self, _title: &str) -> Result<Option<Note>, RemoteError> {
        Ok(None)
    }

    async fn put(&self, _note: &Note) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}
