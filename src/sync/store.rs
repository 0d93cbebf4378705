use async_trait::async_trait;
use tokio::sync::watch;

use super::error::StoreError;
use crate::models::Note;

/// Durable, observable storage for local notes.
///
/// Reads hand out `watch` receivers: the current value is available
/// immediately through `borrow()` and every later write to the same title
/// is observed through `changed()`.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// Observes a single note. The value is `None` while the note is absent.
    async fn get(&self, title: &str) -> Result<watch::Receiver<Option<Note>>, StoreError>;

    /// Observes every stored note, ordered by title.
    async fn get_all(&self) -> Result<watch::Receiver<Vec<Note>>, StoreError>;

    /// Inserts or replaces a note and returns what was stored.
    ///
    /// With `increment_version` the stored version becomes the current stored
    /// version plus one (zero when absent), whatever `note.version` says.
    /// Without it, the note is stored verbatim. Observers are notified in
    /// both cases before this returns.
    async fn upsert(&self, note: &Note, increment_version: bool) -> Result<Note, StoreError>;

    /// Removes the note with `note.title`, if any.
    async fn delete(&self, note: &Note) -> Result<(), StoreError>;

    async fn exists(&self, title: &str) -> Result<bool, StoreError>;
}
