//! Merges the local store and the remote poller into one view per title.
//!
//! For every observed title a merge task forwards local store emissions into
//! the merged view and reacts to fetched remote notes:
//!
//! ```text
//! remote R arrives ──► lock title ──► stored absent or R.version > stored.version?
//!                                        │ yes: store R verbatim (write-through)
//!                                        │      └─► store re-emits ──► merged view
//!                                        └ no:  discard R (ties keep local)
//! ```
//!
//! Writes for a title, from callers and from write-through alike, run under
//! that title's async mutex, so a write-through decision can never be based
//! on a version a concurrent caller upsert has already replaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};

use super::error::{StoreError, ViewClosed};
use super::poller::PollingScheduler;
use super::remote::RemoteClient;
use super::store::LocalStore;
use crate::models::Note;

/// Reconciliation state of a merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Nothing has been seen locally yet.
    Uninitialized,
    /// A local note is known; the remote has not confirmed it.
    LocalOnly,
    /// A newer remote note is being written through to the store.
    Diverging,
    /// Local and remote agree on the version.
    Synced,
}

impl std::fmt::Display for ViewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewState::Uninitialized => write!(f, "uninitialized"),
            ViewState::LocalOnly => write!(f, "local-only"),
            ViewState::Diverging => write!(f, "diverging"),
            ViewState::Synced => write!(f, "synced"),
        }
    }
}

/// Outcome of comparing a fetched remote note with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remote is strictly newer: store it verbatim.
    WriteThrough,
    /// Remote is older or equal: keep local.
    KeepLocal,
}

/// Decides which copy wins. Ties go to the local copy.
pub fn resolve(local: Option<&Note>, remote: &Note) -> Resolution {
    match local {
        Some(local) if !remote.is_newer_than(local) => Resolution::KeepLocal,
        _ => Resolution::WriteThrough,
    }
}

struct ViewEntry {
    id: u64,
    note: watch::Sender<Option<Note>>,
    state: watch::Sender<ViewState>,
    observers: usize,
    merge: JoinHandle<()>,
}

struct Shared {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    scheduler: PollingScheduler,
    views: Mutex<HashMap<String, ViewEntry>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Per-title push slot holding the last version the server accepted.
    push_slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<u64>>>>,
    puts: Mutex<JoinSet<()>>,
    next_view_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Serializes store writes for one title.
    async fn lock_title(&self, title: &str) -> OwnedMutexGuard<()> {
        let title_lock = lock(&self.write_locks)
            .entry(title.to_string())
            .or_default()
            .clone();
        title_lock.lock_owned().await
    }

    /// Drops the title's write lock once nobody holds or waits on it.
    fn release_title(&self, title: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = lock(&self.write_locks);
        if locks
            .get(title)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(title);
        }
    }

    fn attach(&self, title: &str) -> Option<ViewHandles> {
        let mut views = lock(&self.views);
        let entry = views.get_mut(title)?;
        entry.observers += 1;
        Some(ViewHandles {
            id: entry.id,
            note: entry.note.subscribe(),
            state: entry.state.subscribe(),
        })
    }

    /// Drops one observer; the last one tears down the merge task and poller.
    ///
    /// The poller is stopped before the `views` lock is released, so a
    /// concurrent `get_synced` either joins this view or starts a fresh
    /// poller, never one that is about to be stopped.
    fn detach(&self, title: &str, id: u64) {
        let mut views = lock(&self.views);
        let last = match views.get_mut(title) {
            Some(entry) if entry.id == id => {
                entry.observers = entry.observers.saturating_sub(1);
                entry.observers == 0
            }
            _ => false,
        };
        if !last {
            return;
        }

        if let Some(entry) = views.remove(title) {
            entry.merge.abort();
            self.scheduler.stop(title);
        }
        drop(views);
        tracing::info!("Last observer of '{}' gone, stopped syncing", title);
    }

    /// Pushes `note` in the background. Pushes for one title run one at a
    /// time, and a push older than one already accepted is skipped.
    fn spawn_put(&self, note: Note) {
        let slot = {
            let mut slots = lock(&self.push_slots);
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(note.title.clone()).or_default().clone()
        };

        let remote = self.remote.clone();
        let mut puts = lock(&self.puts);
        while puts.try_join_next().is_some() {}
        puts.spawn(async move {
            let mut accepted = slot.lock().await;
            if note.version <= *accepted {
                tracing::debug!(
                    "Skipping push of '{}' at version {}, version {} already pushed",
                    note.title,
                    note.version,
                    *accepted
                );
                return;
            }

            match remote.put(&note).await {
                Ok(()) => {
                    *accepted = note.version;
                    tracing::debug!("Pushed '{}' at version {}", note.title, note.version);
                }
                Err(e) => tracing::warn!(
                    "Pushing '{}' at version {} failed: {}",
                    note.title,
                    note.version,
                    e
                ),
            }
        });
    }

    /// Forgets pushed versions for `title`; a re-created note starts over at 1.
    fn forget_pushes(&self, title: &str) {
        lock(&self.push_slots).remove(title);
    }
}

struct ViewHandles {
    id: u64,
    note: watch::Receiver<Option<Note>>,
    state: watch::Receiver<ViewState>,
}

/// Keeps local notes and the remote service converging.
///
/// Cloning is cheap and shares all pollers and views.
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

impl SyncCoordinator {
    /// Creates a coordinator polling each observed title every `poll_interval`.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        poll_interval: Duration,
    ) -> Self {
        let scheduler = PollingScheduler::new(remote.clone(), poll_interval);
        Self {
            shared: Arc::new(Shared {
                local,
                remote,
                scheduler,
                views: Mutex::new(HashMap::new()),
                write_locks: Mutex::new(HashMap::new()),
                push_slots: Mutex::new(HashMap::new()),
                puts: Mutex::new(JoinSet::new()),
                next_view_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of titles currently being observed through [`get_synced`](Self::get_synced).
    pub fn observed_count(&self) -> usize {
        lock(&self.shared.views).len()
    }

    pub fn is_polling(&self, title: &str) -> bool {
        self.shared.scheduler.is_polling(title)
    }

    /// Returns the merged view of `title`, always holding the newest known
    /// version. The first observer of a title starts its poller; dropping
    /// the last [`SyncedNote`] for it stops the poller again.
    pub async fn get_synced(&self, title: &str) -> Result<SyncedNote, StoreError> {
        if let Some(handles) = self.shared.attach(title) {
            return Ok(SyncedNote::new(title, handles, self.shared.clone()));
        }

        let local_rx = self.shared.local.get(title).await?;

        let mut views = lock(&self.shared.views);
        // Another caller may have set the view up while we were reading.
        if let Some(entry) = views.get_mut(title) {
            entry.observers += 1;
            let handles = ViewHandles {
                id: entry.id,
                note: entry.note.subscribe(),
                state: entry.state.subscribe(),
            };
            drop(views);
            return Ok(SyncedNote::new(title, handles, self.shared.clone()));
        }

        let initial = local_rx.borrow().clone();
        let initial_state = if initial.is_some() {
            ViewState::LocalOnly
        } else {
            ViewState::Uninitialized
        };
        let (note_tx, note_rx) = watch::channel(initial);
        let (state_tx, state_rx) = watch::channel(initial_state);

        let remote_rx = self.shared.scheduler.start(title);
        let merge = tokio::spawn(merge_loop(
            self.shared.clone(),
            MergedView {
                title: title.to_string(),
                note: note_tx.clone(),
                state: state_tx.clone(),
                pending: None,
            },
            local_rx,
            remote_rx,
        ));

        let id = self.shared.next_view_id.fetch_add(1, Ordering::Relaxed);
        views.insert(
            title.to_string(),
            ViewEntry {
                id,
                note: note_tx,
                state: state_tx,
                observers: 1,
                merge,
            },
        );
        drop(views);

        tracing::info!("Started syncing '{}'", title);
        let handles = ViewHandles {
            id,
            note: note_rx,
            state: state_rx,
        };
        Ok(SyncedNote::new(title, handles, self.shared.clone()))
    }

    /// Saves `note` locally with a version bump, then pushes the stored note
    /// to the server in the background. A failed push is logged only; the
    /// returned note is the local result either way.
    pub async fn upsert_synced(&self, note: &Note) -> Result<Note, StoreError> {
        let stored = self.upsert_local(note).await?;
        self.shared.spawn_put(stored.clone());
        Ok(stored)
    }

    pub async fn get_local(&self, title: &str) -> Result<watch::Receiver<Option<Note>>, StoreError> {
        self.shared.local.get(title).await
    }

    pub async fn get_all_local(&self) -> Result<watch::Receiver<Vec<Note>>, StoreError> {
        self.shared.local.get_all().await
    }

    /// Saves `note` locally; the stored version is always the previous
    /// stored version plus one.
    pub async fn upsert_local(&self, note: &Note) -> Result<Note, StoreError> {
        let guard = self.shared.lock_title(&note.title).await;
        let result = self.shared.local.upsert(note, true).await;
        self.shared.release_title(&note.title, guard);
        result
    }

    pub async fn delete_local(&self, note: &Note) -> Result<(), StoreError> {
        let guard = self.shared.lock_title(&note.title).await;
        let result = self.shared.local.delete(note).await;
        if result.is_ok() {
            self.shared.forget_pushes(&note.title);
        }
        self.shared.release_title(&note.title, guard);
        result
    }

    pub async fn exists_local(&self, title: &str) -> Result<bool, StoreError> {
        self.shared.local.exists(title).await
    }

    /// Stops every poller and merge task, then waits for pending pushes.
    /// Open [`SyncedNote`]s report [`ViewClosed`] afterwards.
    pub async fn shutdown(&self) {
        {
            let mut views = lock(&self.shared.views);
            for (title, entry) in views.drain() {
                entry.merge.abort();
                tracing::debug!("Stopped syncing '{}'", title);
            }
            self.shared.scheduler.stop_all();
        }

        let mut puts = std::mem::take(&mut *lock(&self.shared.puts));
        while let Some(result) = puts.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Push task ended abnormally: {}", e);
            }
        }
        tracing::info!("Sync coordinator shut down");
    }
}

/// Sending half of one merged view, owned by its merge task.
struct MergedView {
    title: String,
    note: watch::Sender<Option<Note>>,
    state: watch::Sender<ViewState>,
    /// Version of an in-flight write-through.
    pending: Option<u64>,
}

impl MergedView {
    /// Forwards a local store emission. Versions below the last delivered
    /// one are dropped; a deletion clears the view and its version floor.
    fn apply_local(&mut self, local: Option<Note>) {
        let Some(note) = local else {
            self.note.send_replace(None);
            self.pending = None;
            self.state.send_replace(ViewState::Uninitialized);
            return;
        };

        let stale = self
            .note
            .borrow()
            .as_ref()
            .is_some_and(|current| note.version < current.version);
        if stale {
            tracing::debug!(
                "Dropping stale local '{}' at version {}",
                self.title,
                note.version
            );
            return;
        }

        let version = note.version;
        self.note.send_replace(Some(note));

        let current = *self.state.borrow();
        let next = match (current, self.pending) {
            (ViewState::Diverging, Some(pending)) if version >= pending => {
                self.pending = None;
                ViewState::Synced
            }
            (ViewState::Uninitialized, _) => ViewState::LocalOnly,
            (unchanged, _) => unchanged,
        };
        self.transition(next);
    }

    fn begin_write_through(&mut self, version: u64) {
        self.pending = Some(version);
        self.transition(ViewState::Diverging);
    }

    fn cancel_write_through(&mut self, fallback: ViewState) {
        self.pending = None;
        self.transition(fallback);
    }

    fn transition(&self, next: ViewState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("'{}' {} -> {}", self.title, previous, next);
        }
    }
}

async fn merge_loop(
    shared: Arc<Shared>,
    mut view: MergedView,
    mut local_rx: watch::Receiver<Option<Note>>,
    mut remote_rx: watch::Receiver<Option<Note>>,
) {
    loop {
        tokio::select! {
            changed = local_rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("Local store closed for '{}'", view.title);
                    break;
                }
                let local = local_rx.borrow_and_update().clone();
                view.apply_local(local);
            }
            changed = remote_rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("Poller closed for '{}'", view.title);
                    break;
                }
                let remote = remote_rx.borrow_and_update().clone();
                if let Some(remote) = remote {
                    reconcile(&shared, &mut view, &local_rx, remote).await;
                }
            }
        }
    }
}

/// Applies one fetched remote note against the stored copy.
async fn reconcile(
    shared: &Shared,
    view: &mut MergedView,
    local_rx: &watch::Receiver<Option<Note>>,
    remote: Note,
) {
    let guard = shared.lock_title(&view.title).await;

    // The store publishes before a write returns, so under the title lock
    // this is the latest committed local note.
    let stored = local_rx.borrow().clone();

    match resolve(stored.as_ref(), &remote) {
        Resolution::WriteThrough => {
            tracing::info!(
                "Remote '{}' is newer ({} > {}), writing through",
                view.title,
                remote.version,
                stored
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |n| n.version.to_string())
            );
            let previous = *view.state.borrow();
            view.begin_write_through(remote.version);
            if let Err(e) = shared.local.upsert(&remote, false).await {
                tracing::error!("Write-through of '{}' failed: {}", view.title, e);
                view.cancel_write_through(previous);
            }
        }
        Resolution::KeepLocal => {
            let same_version = stored.as_ref().is_some_and(|n| n.version == remote.version);
            if same_version && *view.state.borrow() == ViewState::LocalOnly {
                view.transition(ViewState::Synced);
            }
            tracing::debug!(
                "Keeping local '{}', remote version {} is not newer",
                view.title,
                remote.version
            );
        }
    }

    shared.release_title(&view.title, guard);
}

/// An observer of one title's merged view.
///
/// Reading never blocks: [`current`](Self::current) returns the latest value
/// and [`changed`](Self::changed) waits for the next one. Clones count as
/// separate observers.
pub struct SyncedNote {
    title: String,
    id: u64,
    note: watch::Receiver<Option<Note>>,
    state: watch::Receiver<ViewState>,
    shared: Arc<Shared>,
}

impl SyncedNote {
    fn new(title: &str, handles: ViewHandles, shared: Arc<Shared>) -> Self {
        Self {
            title: title.to_string(),
            id: handles.id,
            note: handles.note,
            state: handles.state,
            shared,
        }
    }

    /// Latest merged note, marking it as seen.
    pub fn current(&mut self) -> Option<Note> {
        self.note.borrow_and_update().clone()
    }

    pub fn state(&self) -> ViewState {
        *self.state.borrow()
    }

    /// Waits for the next merged value and returns it.
    pub async fn changed(&mut self) -> Result<Option<Note>, ViewClosed> {
        self.note.changed().await.map_err(|_| ViewClosed)?;
        Ok(self.note.borrow_and_update().clone())
    }

    /// Waits until the merged value satisfies `predicate`, checking the
    /// current value first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&Option<Note>) -> bool,
    ) -> Result<Option<Note>, ViewClosed> {
        let value = self.note.wait_for(predicate).await.map_err(|_| ViewClosed)?;
        Ok(value.clone())
    }

    /// Waits until the view reaches `state`.
    pub async fn wait_for_state(&mut self, state: ViewState) -> Result<(), ViewClosed> {
        self.state
            .wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| ViewClosed)
    }
}

impl Clone for SyncedNote {
    fn clone(&self) -> Self {
        let mut views = lock(&self.shared.views);
        if let Some(entry) = views.get_mut(&self.title) {
            if entry.id == self.id {
                entry.observers += 1;
            }
        }
        drop(views);

        Self {
            title: self.title.clone(),
            id: self.id,
            note: self.note.clone(),
            state: self.state.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl Drop for SyncedNote {
    fn drop(&mut self) {
        self.shared.detach(&self.title, self.id);
    }
}

impl std::fmt::Debug for SyncedNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedNote")
            .field("title", &self.title)
            .field("note", &*self.note.borrow())
            .field("state", &*self.state.borrow())
            .finish()
    }
}
