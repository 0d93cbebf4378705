//! Test doubles shared by the sync tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use super::error::{RemoteError, StoreError};
use super::remote::RemoteClient;
use super::store::LocalStore;
use crate::db::{init_db, SqliteNoteStore};
use crate::models::Note;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits up to five seconds for `check` to hold.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within 5s");
}

/// In-memory remote with failure injection.
#[derive(Default)]
pub struct FakeRemote {
    notes: Mutex<HashMap<String, Note>>,
    fetches: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    panics: Mutex<HashMap<String, usize>>,
    puts: Mutex<Vec<Note>>,
    put_delays: Mutex<HashMap<u64, Duration>>,
    fail_puts: AtomicBool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, note: Note) {
        lock(&self.notes).insert(note.title.clone(), note);
    }

    pub fn get(&self, title: &str) -> Option<Note> {
        lock(&self.notes).get(title).cloned()
    }

    pub fn fetch_count(&self, title: &str) -> usize {
        lock(&self.fetches).get(title).copied().unwrap_or(0)
    }

    /// Makes the next `count` fetches of `title` fail.
    pub fn fail_next_fetches(&self, title: &str, count: usize) {
        lock(&self.failures).insert(title.to_string(), count);
    }

    pub fn panic_next_fetch(&self, title: &str) {
        lock(&self.panics).insert(title.to_string(), 1);
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Holds back the put of `version` for `delay` before it lands.
    pub fn delay_put(&self, version: u64, delay: Duration) {
        lock(&self.put_delays).insert(version, delay);
    }

    pub fn puts(&self) -> Vec<Note> {
        lock(&self.puts).clone()
    }

    fn take_one(map: &Mutex<HashMap<String, usize>>, title: &str) -> bool {
        let mut map = lock(map);
        match map.get_mut(title) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch(&self, title: &str) -> Result<Option<Note>, RemoteError> {
        *lock(&self.fetches).entry(title.to_string()).or_insert(0) += 1;

        if Self::take_one(&self.panics, title) {
            panic!("injected panic fetching '{}'", title);
        }
        if Self::take_one(&self.failures, title) {
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        Ok(self.get(title))
    }

    async fn put(&self, note: &Note) -> Result<(), RemoteError> {
        lock(&self.puts).push(note.clone());
        let delay = lock(&self.put_delays).get(&note.version).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected put failure".to_string()));
        }
        self.set(note.clone());
        Ok(())
    }
}

/// Wraps a [`SqliteNoteStore`] and counts write attempts by kind.
pub struct CountingStore {
    inner: SqliteNoteStore,
    increments: AtomicUsize,
    write_throughs: AtomicUsize,
    fail_upserts: AtomicBool,
    _temp_dir: TempDir,
}

impl CountingStore {
    pub async fn new() -> Arc<Self> {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("notes.db")).await.unwrap();
        Arc::new(Self {
            inner: SqliteNoteStore::new(pool),
            increments: AtomicUsize::new(0),
            write_throughs: AtomicUsize::new(0),
            fail_upserts: AtomicBool::new(false),
            _temp_dir: temp_dir,
        })
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn write_throughs(&self) -> usize {
        self.write_throughs.load(Ordering::SeqCst)
    }

    /// Makes every upsert fail with a database error until reset.
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub async fn load(&self, title: &str) -> Option<Note> {
        self.inner.load(title).await.unwrap()
    }
}

#[async_trait]
impl LocalStore for CountingStore {
    async fn get(&self, title: &str) -> Result<watch::Receiver<Option<Note>>, StoreError> {
        self.inner.get(title).await
    }

    async fn get_all(&self) -> Result<watch::Receiver<Vec<Note>>, StoreError> {
        self.inner.get_all().await
    }

    async fn upsert(&self, note: &Note, increment_version: bool) -> Result<Note, StoreError> {
        let counter = if increment_version {
            &self.increments
        } else {
            &self.write_throughs
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert(note, increment_version).await
    }

    async fn delete(&self, note: &Note) -> Result<(), StoreError> {
        self.inner.delete(note).await
    }

    async fn exists(&self, title: &str) -> Result<bool, StoreError> {
        self.inner.exists(title).await
    }
}
