use super::counters::{BadgeChannel, BadgeCounters, BadgeCounts};
use crate::backend::DocumentStore;
use crate::infrastructure::TaskManager;
use crate::messaging::{ChangeEvent, EventKind};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefreshKey {
    Channel(BadgeChannel),
    Full,
}

#[derive(Default)]
struct BadgeState {
    counters: BadgeCounters,
    user_id: Option<String>,
    /// Optimistic increments per channel; a change while a count is in flight means the
    /// fetched value may predate a create
    increments: BadgeCounts,
}

impl BadgeState {
    fn note_increment(&mut self, channel: BadgeChannel) {
        let slot = match channel {
            BadgeChannel::Notifications => &mut self.increments.notifications,
            BadgeChannel::Messages => &mut self.increments.messages,
        };
        *slot = slot.wrapping_add(1);
    }
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    state: RwLock<BadgeState>,
    resyncs: Mutex<TaskManager<RefreshKey>>,
    resync_debounce: Duration,
    counts_tx: watch::Sender<BadgeCounts>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Live unread counts for notifications and messages.
///
/// Realtime create events bump a counter optimistically; anything the aggregator cannot
/// account for exactly (updates, deletes, unclassified events) schedules a debounced
/// authoritative resync instead. Decrements only happen through explicit read actions.
/// Count fetch failures fail closed to zero.
#[derive(Clone)]
pub struct BadgeAggregator {
    inner: Arc<Inner>,
}

impl BadgeAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, resync_debounce: Duration) -> Self {
        let (counts_tx, _counts_rx) = watch::channel(BadgeCounts::default());
        Self {
            inner: Arc::new(Inner {
                store,
                state: RwLock::new(BadgeState::default()),
                resyncs: Mutex::new(TaskManager::new()),
                resync_debounce,
                counts_tx,
                refresh_task: Mutex::new(None),
            }),
        }
    }

    /// Switch session; counters reset whenever the user changes
    pub async fn set_user(&self, user_id: Option<String>) {
        {
            let mut state = self.inner.state.write().await;
            if state.user_id == user_id {
                return;
            }
            tracing::info!("Badge session changed to {:?}", user_id);
            state.user_id = user_id;
            state.counters.reset();
        }
        self.resyncs().abort_all();
        self.publish().await;
    }

    pub async fn current_user(&self) -> Option<String> {
        self.inner.state.read().await.user_id.clone()
    }

    pub async fn set_current_screen(&self, screen: Option<&str>) {
        self.inner
            .state
            .write()
            .await
            .counters
            .set_current_screen(screen.map(str::to_string));
    }

    /// Replace both counters with the backend's unseen counts for `user_id`
    pub async fn fetch_authoritative_counts(&self, user_id: &str) -> BadgeCounts {
        let store = &self.inner.store;
        let before = self.inner.state.read().await.increments;
        let (notifications, messages) = futures::join!(
            count_or_zero(store.as_ref(), BadgeChannel::Notifications, user_id),
            count_or_zero(store.as_ref(), BadgeChannel::Messages, user_id),
        );

        let mut raced = Vec::new();
        let counts = {
            let mut state = self.inner.state.write().await;
            if state.user_id.as_deref() != Some(user_id) {
                tracing::debug!("Discarding badge counts for inactive user {}", user_id);
                return state.counters.counts();
            }
            for (channel, count) in [
                (BadgeChannel::Notifications, notifications),
                (BadgeChannel::Messages, messages),
            ] {
                if state.increments.get(channel) == before.get(channel) {
                    state.counters.set(channel, count);
                } else {
                    raced.push(channel);
                }
            }
            state.counters.counts()
        };
        for channel in raced {
            tracing::debug!("{:?} changed during count fetch, resyncing again", channel);
            self.schedule_resync(channel);
        }

        tracing::debug!(
            "Authoritative badge counts: {} notifications, {} messages",
            counts.notifications,
            counts.messages
        );
        self.publish().await;
        counts
    }

    /// Authoritative resync for the current user, if any
    pub async fn refresh(&self) -> Option<BadgeCounts> {
        let user_id = self.current_user().await?;
        Some(self.fetch_authoritative_counts(&user_id).await)
    }

    /// Fold a realtime event into `channel`; returns whether the counter moved
    pub async fn apply_event(&self, channel: BadgeChannel, event: &ChangeEvent) -> bool {
        match event.kind {
            EventKind::Create => {
                let incremented = {
                    let mut state = self.inner.state.write().await;
                    let addressed = state
                        .user_id
                        .as_deref()
                        .is_some_and(|user_id| event.is_unseen_create_for(user_id));
                    if addressed {
                        state.counters.increase(channel, 1);
                        state.note_increment(channel);
                    }
                    addressed
                };
                if incremented {
                    self.publish().await;
                }
                incremented
            }
            EventKind::Update | EventKind::Delete | EventKind::Unknown => {
                tracing::debug!("{} event on {:?}, scheduling resync", event.kind, channel);
                self.schedule_resync(channel);
                false
            }
        }
    }

    pub async fn counts(&self) -> BadgeCounts {
        self.inner.state.read().await.counters.counts()
    }

    pub async fn visible_count(&self, channel: BadgeChannel) -> u64 {
        self.inner.state.read().await.counters.visible_count(channel)
    }

    pub async fn visible_counts(&self) -> BadgeCounts {
        self.inner.state.read().await.counters.visible_counts()
    }

    pub async fn increase(&self, channel: BadgeChannel, amount: u64) {
        self.inner
            .state
            .write()
            .await
            .counters
            .increase(channel, amount);
        self.publish().await;
    }

    pub async fn decrease(&self, channel: BadgeChannel, amount: u64) {
        self.inner
            .state
            .write()
            .await
            .counters
            .decrease(channel, amount);
        self.publish().await;
    }

    pub async fn clear(&self, channel: BadgeChannel) {
        self.inner.state.write().await.counters.clear(channel);
        self.publish().await;
    }

    /// Mark documents seen in the backend and decrement by the number that succeeded
    pub async fn mark_read(&self, channel: BadgeChannel, document_ids: &[String]) -> usize {
        let store = &self.inner.store;
        let results = join_all(
            document_ids
                .iter()
                .map(|id| store.mark_seen(channel.collection(), id)),
        )
        .await;

        let mut marked = 0;
        for (id, result) in document_ids.iter().zip(results) {
            match result {
                Ok(()) => marked += 1,
                Err(err) => tracing::warn!("Failed to mark {} as seen: {}", id, err),
            }
        }

        if marked > 0 {
            self.decrease(channel, marked as u64).await;
        }
        if marked < document_ids.len() {
            self.schedule_resync(channel);
        }
        marked
    }

    /// Debounced authoritative resync of one counter
    pub fn schedule_resync(&self, channel: BadgeChannel) {
        let aggregator = self.clone();
        self.resyncs().schedule(
            RefreshKey::Channel(channel),
            self.inner.resync_debounce,
            async move { aggregator.resync_channel(channel).await },
        );
    }

    /// Resync both counters after `delay`
    pub fn schedule_full_resync(&self, delay: Duration) {
        let aggregator = self.clone();
        self.resyncs()
            .schedule(RefreshKey::Full, delay, async move {
                aggregator.refresh().await;
            });
    }

    /// Refresh both counters every `period` until stopped or dropped
    pub fn start_periodic_refresh(&self, period: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                BadgeAggregator { inner }.refresh().await;
            }
        });

        let previous = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop_periodic_refresh(&self) {
        let handle = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Raw counts, published on every change
    pub fn watch(&self) -> watch::Receiver<BadgeCounts> {
        self.inner.counts_tx.subscribe()
    }

    async fn resync_channel(&self, channel: BadgeChannel) {
        let (user_id, before) = {
            let state = self.inner.state.read().await;
            let Some(user_id) = state.user_id.clone() else {
                return;
            };
            (user_id, state.increments.get(channel))
        };
        let count = count_or_zero(self.inner.store.as_ref(), channel, &user_id).await;

        {
            let mut state = self.inner.state.write().await;
            if state.user_id.as_deref() != Some(user_id.as_str()) {
                return;
            }
            if state.increments.get(channel) != before {
                drop(state);
                self.schedule_resync(channel);
                return;
            }
            state.counters.set(channel, count);
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let counts = self.counts().await;
        self.inner.counts_tx.send_if_modified(|current| {
            if *current == counts {
                return false;
            }
            *current = counts;
            true
        });
    }

    fn resyncs(&self) -> MutexGuard<'_, TaskManager<RefreshKey>> {
        self.inner
            .resyncs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn count_or_zero(store: &dyn DocumentStore, channel: BadgeChannel, user_id: &str) -> u64 {
    match store.count_unseen(channel.collection(), user_id).await {
        Ok(count) => count,
        Err(err) => {
            tracing::error!("Failed to fetch {:?} count, resetting to 0: {}", channel, err);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NewDocument;
    use crate::messaging::DocumentRecord;
    use crate::types::{RealtimeError, RealtimeEvent, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStore {
        counts: Mutex<HashMap<String, u64>>,
        failing: Mutex<Vec<String>>,
        count_calls: AtomicUsize,
        latency: Mutex<Option<Duration>>,
    }

    impl FakeStore {
        fn set_count(&self, collection: &str, count: u64) {
            self.counts
                .lock()
                .unwrap()
                .insert(collection.to_string(), count);
        }

        fn fail(&self, collection: &str) {
            self.failing.lock().unwrap().push(collection.to_string());
        }

        fn set_latency(&self, latency: Option<Duration>) {
            *self.latency.lock().unwrap() = latency;
        }
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn count_unseen(&self, collection: &str, _receiver_id: &str) -> Result<u64> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            let latency = *self.latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.failing.lock().unwrap().iter().any(|c| c == collection) {
                return Err(RealtimeError::Network("timeout".to_string()));
            }
            Ok(self.counts.lock().unwrap().get(collection).copied().unwrap_or(0))
        }

        async fn mark_seen(&self, _collection: &str, document_id: &str) -> Result<()> {
            if document_id == "missing" {
                return Err(RealtimeError::Backend {
                    code: 404,
                    message: "Document not found".to_string(),
                });
            }
            Ok(())
        }

        async fn create_document(
            &self,
            _collection: &str,
            _document: &NewDocument,
        ) -> Result<DocumentRecord> {
            Ok(DocumentRecord::default())
        }

        async fn push_token(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn change(action: &str, payload: serde_json::Value) -> ChangeEvent {
        ChangeEvent::from_event(RealtimeEvent::new(
            vec![format!(
                "databases.main.collections.notifications.documents.n1.{action}"
            )],
            payload,
        ))
    }

    async fn aggregator(store: Arc<FakeStore>) -> BadgeAggregator {
        let aggregator = BadgeAggregator::new(store, Duration::from_secs(1));
        aggregator.set_user(Some("u1".to_string())).await;
        aggregator
    }

    #[tokio::test]
    async fn test_unseen_create_increments_then_resync_corrects() {
        let store = Arc::new(FakeStore::default());
        let badges = aggregator(store.clone()).await;

        let event = change("create", json!({"$id": "n1", "receiverId": "u1", "isSeen": false}));
        assert!(badges.apply_event(BadgeChannel::Notifications, &event).await);
        assert_eq!(badges.counts().await.notifications, 1);

        let counts = badges.fetch_authoritative_counts("u1").await;
        assert_eq!(counts.notifications, 0);
        assert_eq!(*badges.watch().borrow(), BadgeCounts::default());
    }

    #[tokio::test]
    async fn test_seen_or_foreign_creates_are_ignored() {
        let badges = aggregator(Arc::new(FakeStore::default())).await;

        let seen = change("create", json!({"receiverId": "u1", "isSeen": true}));
        let foreign = change("create", json!({"receiverId": {"$id": "u9"}, "isSeen": false}));
        assert!(!badges.apply_event(BadgeChannel::Notifications, &seen).await);
        assert!(!badges.apply_event(BadgeChannel::Notifications, &foreign).await);
        assert_eq!(badges.counts().await, BadgeCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_schedule_one_debounced_resync() {
        let store = Arc::new(FakeStore::default());
        store.set_count("notifications", 7);
        let badges = aggregator(store.clone()).await;

        let update = change("update", json!({"$id": "n1", "receiverId": "u1", "isSeen": true}));
        for _ in 0..3 {
            badges.apply_event(BadgeChannel::Notifications, &update).await;
        }
        assert_eq!(badges.counts().await.notifications, 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 1);
        assert_eq!(badges.counts().await.notifications, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_during_fetch_is_not_overwritten() {
        let store = Arc::new(FakeStore::default());
        store.set_latency(Some(Duration::from_millis(500)));
        let badges = aggregator(store.clone()).await;

        let fetch = tokio::spawn({
            let badges = badges.clone();
            async move { badges.fetch_authoritative_counts("u1").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let event = change("create", json!({"$id": "n1", "receiverId": "u1", "isSeen": false}));
        assert!(badges.apply_event(BadgeChannel::Notifications, &event).await);

        let counts = fetch.await.unwrap();
        assert_eq!(counts.notifications, 1);

        // the follow-up resync sees the new document
        store.set_latency(None);
        store.set_count("notifications", 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 3);
        assert_eq!(badges.counts().await.notifications, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_fails_closed() {
        let store = Arc::new(FakeStore::default());
        store.set_count("notifications", 3);
        let badges = aggregator(store.clone()).await;
        badges.increase(BadgeChannel::Messages, 5).await;
        store.fail("messages");

        let counts = badges.fetch_authoritative_counts("u1").await;
        assert_eq!(counts, BadgeCounts { notifications: 3, messages: 0 });
    }

    #[tokio::test]
    async fn test_counts_for_previous_user_are_discarded() {
        let store = Arc::new(FakeStore::default());
        store.set_count("messages", 4);
        let badges = aggregator(store).await;

        badges.set_user(Some("u2".to_string())).await;
        let counts = badges.fetch_authoritative_counts("u1").await;
        assert_eq!(counts, BadgeCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_decrements_successes() {
        let badges = aggregator(Arc::new(FakeStore::default())).await;
        badges.increase(BadgeChannel::Messages, 3).await;

        let ids = vec!["m1".to_string(), "missing".to_string()];
        assert_eq!(badges.mark_read(BadgeChannel::Messages, &ids).await, 1);
        assert_eq!(badges.counts().await.messages, 2);

        badges.decrease(BadgeChannel::Messages, 10).await;
        assert_eq!(badges.counts().await.messages, 0);
    }

    #[tokio::test]
    async fn test_visible_count_suppressed_on_screen() {
        let badges = aggregator(Arc::new(FakeStore::default())).await;
        badges.increase(BadgeChannel::Messages, 2).await;

        badges.set_current_screen(Some("messages")).await;
        assert_eq!(badges.visible_count(BadgeChannel::Messages).await, 0);
        badges.set_current_screen(None).await;
        assert_eq!(badges.visible_count(BadgeChannel::Messages).await, 2);
    }
}
