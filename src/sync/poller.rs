//! Per-title remote polling.
//!
//! Every watched title gets its own background task that fetches the note on
//! a fixed interval and publishes it into a `watch` channel. Only the latest
//! fetched value is kept; a slow or failed fetch leaves the previous value in
//! place until the next tick.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::remote::RemoteClient;
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::models::Note;

/// Default interval between two fetches of the same title.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

/// One live poller.
struct PollSubscription {
    interval: Duration,
    sender: watch::Sender<Option<Note>>,
    handle: JoinHandle<()>,
}

impl PollSubscription {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns at most one polling task per title.
pub struct PollingScheduler {
    remote: Arc<dyn RemoteClient>,
    interval: Duration,
    polls: Mutex<HashMap<String, PollSubscription>>,
}

impl PollingScheduler {
    pub fn new(remote: Arc<dyn RemoteClient>, interval: Duration) -> Self {
        Self {
            remote,
            // tokio's interval panics on a zero period
            interval: interval.max(Duration::from_millis(1)),
            polls: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns a receiver for `title`'s fetched note, starting a poller if
    /// none is running. A live poller is reused, never duplicated.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, title: &str) -> watch::Receiver<Option<Note>> {
        let mut polls = self.lock_polls();

        if let Some(existing) = polls.get(title) {
            if existing.is_live() {
                return existing.sender.subscribe();
            }
        }

        let (sender, receiver) = watch::channel(None);
        let handle = tokio::spawn(poll_loop(
            self.remote.clone(),
            title.to_string(),
            self.interval,
            sender.clone(),
        ));

        let subscription = PollSubscription {
            interval: self.interval,
            sender,
            handle,
        };
        if let Some(replaced) = polls.insert(title.to_string(), subscription) {
            replaced.handle.abort();
        }

        tracing::info!(
            "Started polling '{}' every {:?}",
            title,
            self.interval
        );
        receiver
    }

    /// Cancels the poller for `title` only. Returns false if there was none.
    pub fn stop(&self, title: &str) -> bool {
        match self.lock_polls().remove(title) {
            Some(subscription) => {
                subscription.handle.abort();
                tracing::info!(
                    "Stopped polling '{}' (interval {:?})",
                    title,
                    subscription.interval
                );
                true
            }
            None => false,
        }
    }

    /// Cancels every poller.
    pub fn stop_all(&self) {
        let drained: Vec<(String, PollSubscription)> = self.lock_polls().drain().collect();
        for (title, subscription) in drained {
            subscription.handle.abort();
            tracing::debug!("Stopped polling '{}'", title);
        }
    }

    pub fn is_polling(&self, title: &str) -> bool {
        self.lock_polls()
            .get(title)
            .is_some_and(PollSubscription::is_live)
    }

    pub fn active_count(&self) -> usize {
        self.lock_polls().values().filter(|s| s.is_live()).count()
    }

    fn lock_polls(&self) -> MutexGuard<'_, HashMap<String, PollSubscription>> {
        self.polls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn poll_loop(
    remote: Arc<dyn RemoteClient>,
    title: String,
    period: Duration,
    sender: watch::Sender<Option<Note>>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        poll_once(remote.as_ref(), &title, &sender).await;
    }
}

/// Runs one fetch. Nothing that happens here may end the polling task.
async fn poll_once(remote: &dyn RemoteClient, title: &str, sender: &watch::Sender<Option<Note>>) {
    let fetched = AssertUnwindSafe(remote.fetch(title)).catch_unwind().await;

    match fetched {
        Ok(Ok(Some(note))) => {
            tracing::debug!("Fetched '{}' at version {}", title, note.version);
            sender.send_replace(Some(note));
        }
        Ok(Ok(None)) => {
            tracing::debug!("'{}' not found on server", title);
        }
        Ok(Err(e)) => {
            tracing::warn!("Fetching '{}' failed, retrying next tick: {}", title, e);
        }
        Err(_) => {
            tracing::error!("Fetching '{}' panicked, retrying next tick", title);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{eventually, FakeRemote};

    const TICK: Duration = Duration::from_millis(20);

    fn scheduler(remote: &Arc<FakeRemote>) -> PollingScheduler {
        PollingScheduler::new(remote.clone(), TICK)
    }

    #[tokio::test]
    async fn test_start_publishes_fetched_note() {
        let remote = Arc::new(FakeRemote::new());
        remote.set(Note::new("Plans", "beach").with_version(2));
        let scheduler = scheduler(&remote);

        let mut rx = scheduler.start("Plans");
        let note = rx.wait_for(Option::is_some).await.unwrap().clone().unwrap();

        assert_eq!(note.content, "beach");
        assert_eq!(note.version, 2);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_per_title() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = scheduler(&remote);

        let _a = scheduler.start("Same");
        let _b = scheduler.start("Same");

        assert_eq!(scheduler.active_count(), 1);
        assert!(scheduler.is_polling("Same"));
    }

    #[tokio::test]
    async fn test_stop_leaves_other_titles_running() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = scheduler(&remote);

        let _first = scheduler.start("K1");
        let _second = scheduler.start("K2");
        eventually(|| remote.fetch_count("K1") > 0 && remote.fetch_count("K2") > 0).await;

        assert!(scheduler.stop("K1"));
        assert!(!scheduler.is_polling("K1"));
        assert!(scheduler.is_polling("K2"));

        let k1_after_stop = remote.fetch_count("K1");
        let k2_after_stop = remote.fetch_count("K2");
        eventually(|| remote.fetch_count("K2") >= k2_after_stop + 3).await;

        assert_eq!(remote.fetch_count("K1"), k1_after_stop);
    }

    #[tokio::test]
    async fn test_stop_unknown_title() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = scheduler(&remote);

        assert!(!scheduler.stop("never started"));
    }

    #[tokio::test]
    async fn test_fetch_error_does_not_cancel_poller() {
        let remote = Arc::new(FakeRemote::new());
        remote.set(Note::new("Flaky", "ok").with_version(1));
        remote.fail_next_fetches("Flaky", 2);
        let scheduler = scheduler(&remote);

        let mut rx = scheduler.start("Flaky");
        let note = rx.wait_for(Option::is_some).await.unwrap().clone().unwrap();

        assert_eq!(note.content, "ok");
        assert!(remote.fetch_count("Flaky") >= 3);
        assert!(scheduler.is_polling("Flaky"));
    }

    #[tokio::test]
    async fn test_fetch_panic_does_not_cancel_poller() {
        let remote = Arc::new(FakeRemote::new());
        remote.set(Note::new("Fragile", "survived").with_version(1));
        remote.panic_next_fetch("Fragile");
        let scheduler = scheduler(&remote);

        let mut rx = scheduler.start("Fragile");
        let note = rx.wait_for(Option::is_some).await.unwrap().clone().unwrap();

        assert_eq!(note.content, "survived");
        assert!(scheduler.is_polling("Fragile"));
    }

    #[tokio::test]
    async fn test_not_found_publishes_nothing() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = scheduler(&remote);

        let rx = scheduler.start("Missing");
        eventually(|| remote.fetch_count("Missing") >= 3).await;

        assert!(rx.borrow().is_none());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_latest_value_overwrites() {
        let remote = Arc::new(FakeRemote::new());
        remote.set(Note::new("Live", "one").with_version(1));
        let scheduler = scheduler(&remote);

        let mut rx = scheduler.start("Live");
        rx.wait_for(Option::is_some).await.unwrap();

        remote.set(Note::new("Live", "two").with_version(2));
        let note = rx
            .wait_for(|n| n.as_ref().is_some_and(|n| n.version == 2))
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(note.content, "two");
    }

    #[tokio::test]
    async fn test_drop_cancels_all() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = scheduler(&remote);

        let _rx = scheduler.start("Dropped");
        eventually(|| remote.fetch_count("Dropped") > 0).await;
        drop(scheduler);

        let count = remote.fetch_count("Dropped");
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(remote.fetch_count("Dropped"), count);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let remote = Arc::new(FakeRemote::new());
        let scheduler = PollingScheduler::new(remote, Duration::ZERO);

        assert_eq!(scheduler.interval(), Duration::from_millis(1));
    }
}
