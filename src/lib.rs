//! Notesync Library
//!
//! Keeps notes consistent between a local SQLite store and a remote note
//! service, exposing one reactive view per note that always holds the
//! newest known version.

pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;

pub use config::{Config, ConfigError};
pub use models::Note;
pub use sync::{
    HttpNoteClient, LocalStore, RemoteClient, RemoteError, StoreError, SyncCoordinator,
    SyncedNote, ViewState,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
