//! Keeps local notes and the remote note service converging.
//!
//! # Components
//!
//! - [`LocalStore`]: durable, observable local notes ([`SqliteNoteStore`](crate::db::SqliteNoteStore))
//! - [`RemoteClient`]: the authoritative note service ([`HttpNoteClient`])
//! - [`PollingScheduler`]: one fetch loop per observed title
//! - [`SyncCoordinator`]: merges both sides into a [`SyncedNote`] per title
//!
//! # Conflict resolution
//!
//! Every note carries a version. Local writes bump it by exactly one; remote
//! notes are written through verbatim when their version is strictly greater
//! than the stored one. Equal versions keep the local copy.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use notesync::db::{init_db, SqliteNoteStore};
//! use notesync::models::Note;
//! use notesync::sync::{HttpNoteClient, SyncCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = init_db(std::path::Path::new("notes.db")).await?;
//! let local = Arc::new(SqliteNoteStore::new(pool));
//! let remote = Arc::new(HttpNoteClient::new("http://localhost:8080", Duration::from_secs(5))?);
//! let sync = SyncCoordinator::new(local, remote, Duration::from_secs(3));
//!
//! let mut view = sync.get_synced("Groceries").await?;
//! sync.upsert_synced(&Note::new("Groceries", "milk, eggs")).await?;
//! while let Ok(note) = view.changed().await {
//!     println!("{:?}", note);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod coordinator;
mod error;
mod poller;
mod remote;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use client::HttpNoteClient;
pub use coordinator::{resolve, Resolution, SyncCoordinator, SyncedNote, ViewState};
pub use error::{RemoteError, StoreError, ViewClosed};
pub use poller::{PollingScheduler, DEFAULT_POLL_INTERVAL};
pub use remote::{OfflineRemote, RemoteClient};
pub use store::LocalStore;
