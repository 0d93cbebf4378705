use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::{watch, Mutex};

use crate::models::Note;
use crate::sync::{LocalStore, StoreError};

/// SQLite-backed [`LocalStore`].
///
/// Every write re-reads the affected row and pushes it to the title's
/// watchers, so observers always see the committed state rather than the
/// value a caller passed in.
pub struct SqliteNoteStore {
    pool: SqlitePool,
    watchers: Mutex<Watchers>,
}

#[derive(Default)]
struct Watchers {
    notes: HashMap<String, watch::Sender<Option<Note>>>,
    all: Option<watch::Sender<Vec<Note>>>,
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    title: String,
    content: String,
    version: i64,
    updated_at: String,
}

impl NoteRow {
    fn into_note(self) -> Result<Note, StoreError> {
        let version = u64::try_from(self.version).map_err(|_| {
            StoreError::CorruptRow(self.title.clone(), format!("negative version {}", self.version))
        })?;

        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StoreError::CorruptRow(
                    self.title.clone(),
                    format!("bad updated_at '{}': {}", self.updated_at, e),
                )
            })?;

        Ok(Note {
            title: self.title,
            content: self.content,
            version,
            updated_at,
        })
    }
}

const UPSERT_INCREMENT: &str = r#"
    INSERT INTO notes (title, content, version, updated_at)
    VALUES (?, ?, 1, ?)
    ON CONFLICT(title) DO UPDATE
    SET content = excluded.content, version = notes.version + 1, updated_at = excluded.updated_at
    RETURNING title, content, version, updated_at
"#;

const UPSERT_VERBATIM: &str = r#"
    INSERT INTO notes (title, content, version, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(title) DO UPDATE
    SET content = excluded.content, version = excluded.version, updated_at = excluded.updated_at
    RETURNING title, content, version, updated_at
"#;

impl SqliteNoteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            watchers: Mutex::new(Watchers::default()),
        }
    }

    /// Reads a note without subscribing to it.
    pub async fn load(&self, title: &str) -> Result<Option<Note>, StoreError> {
        let row: Option<NoteRow> = sqlx::query_as(
            "SELECT title, content, version, updated_at FROM notes WHERE title = ?",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NoteRow::into_note).transpose()
    }

    /// Reads every note without subscribing.
    pub async fn list(&self) -> Result<Vec<Note>, StoreError> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT title, content, version, updated_at FROM notes ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NoteRow::into_note).collect()
    }

    /// Pushes the committed state of `title` to its watchers and refreshes
    /// the all-notes watchers. Channels nobody listens to are dropped.
    async fn publish(&self, title: &str) -> Result<(), StoreError> {
        let mut watchers = self.watchers.lock().await;

        if let Some(sender) = watchers.notes.get(title) {
            if sender.receiver_count() == 0 {
                watchers.notes.remove(title);
            } else {
                let current = self.load(title).await?;
                sender.send_replace(current);
            }
        }

        if let Some(sender) = &watchers.all {
            if sender.receiver_count() == 0 {
                watchers.all = None;
            } else {
                let notes = self.list().await?;
                sender.send_replace(notes);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteNoteStore {
    async fn get(&self, title: &str) -> Result<watch::Receiver<Option<Note>>, StoreError> {
        // Held across the initial load so a concurrent publish cannot slip in
        // between reading the row and registering the channel.
        let mut watchers = self.watchers.lock().await;

        if let Some(sender) = watchers.notes.get(title) {
            return Ok(sender.subscribe());
        }

        let current = self.load(title).await?;
        let (sender, receiver) = watch::channel(current);
        watchers.notes.insert(title.to_string(), sender);
        Ok(receiver)
    }

    async fn get_all(&self) -> Result<watch::Receiver<Vec<Note>>, StoreError> {
        let mut watchers = self.watchers.lock().await;

        if let Some(sender) = &watchers.all {
            return Ok(sender.subscribe());
        }

        let notes = self.list().await?;
        let (sender, receiver) = watch::channel(notes);
        watchers.all = Some(sender);
        Ok(receiver)
    }

    async fn upsert(&self, note: &Note, increment_version: bool) -> Result<Note, StoreError> {
        let row: NoteRow = if increment_version {
            sqlx::query_as(UPSERT_INCREMENT)
                .bind(&note.title)
                .bind(&note.content)
                .bind(Utc::now().to_rfc3339())
                .fetch_one(&self.pool)
                .await?
        } else {
            let version = i64::try_from(note.version)
                .map_err(|_| StoreError::VersionOutOfRange(note.title.clone(), note.version))?;
            sqlx::query_as(UPSERT_VERBATIM)
                .bind(&note.title)
                .bind(&note.content)
                .bind(version)
                .bind(note.updated_at.to_rfc3339())
                .fetch_one(&self.pool)
                .await?
        };

        let stored = row.into_note()?;
        tracing::debug!(
            "Stored note '{}' at version {} (increment={})",
            stored.title,
            stored.version,
            increment_version
        );

        self.publish(&stored.title).await?;
        Ok(stored)
    }

    async fn delete(&self, note: &Note) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notes WHERE title = ?")
            .bind(&note.title)
            .execute(&self.pool)
            .await?;

        self.publish(&note.title).await
    }

    async fn exists(&self, title: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM notes WHERE title = ?)")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}
