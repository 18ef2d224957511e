#![allow(dead_code)]

use async_trait::async_trait;
use marketplace_realtime::{
    BackendSignal, CancelFn, DocumentRecord, DocumentStore, NetworkSnapshot, NewDocument,
    PushNotification, PushNotifier, RealtimeBackend, RealtimeClientOptions, RealtimeError,
    Result, SharedNetworkProbe, SubscribeRequest, Transport, event_callback,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory realtime backend that records every subscribe call
#[derive(Default)]
pub struct MockBackend {
    calls: AtomicUsize,
    cancels: Arc<AtomicUsize>,
    sinks: Mutex<Vec<(String, mpsc::Sender<BackendSignal>)>>,
    failures: Mutex<VecDeque<RealtimeError>>,
    delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, err: RealtimeError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Deliver a signal on the newest open subscription for `channel`
    pub async fn emit(&self, channel: &str, signal: BackendSignal) {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, sink)| name == channel && !sink.is_closed())
            .map(|(_, sink)| sink.clone())
            .expect("no open subscription for channel");
        sink.send(signal).await.expect("subscription closed");
    }
}

#[async_trait]
impl RealtimeBackend for MockBackend {
    async fn subscribe(
        &self,
        channel: &str,
        sink: mpsc::Sender<BackendSignal>,
    ) -> Result<CancelFn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let _ = sink.try_send(BackendSignal::Ack);
        self.sinks.lock().unwrap().push((channel.to_string(), sink));
        let cancels = Arc::clone(&self.cancels);
        Ok(Box::new(move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// In-memory document store
#[derive(Default)]
pub struct MockStore {
    counts: Mutex<HashMap<String, u64>>,
    tokens: Mutex<HashMap<String, String>>,
    pub created: Mutex<Vec<(String, NewDocument)>>,
    count_calls: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_count(&self, collection: &str, count: u64) {
        self.counts
            .lock()
            .unwrap()
            .insert(collection.to_string(), count);
    }

    pub fn set_push_token(&self, user_id: &str, token: &str) {
        self.tokens
            .lock()
            .unwrap()
            .insert(user_id.to_string(), token.to_string());
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn count_unseen(&self, collection: &str, _receiver_id: &str) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .counts
            .lock()
            .unwrap()
            .get(collection)
            .copied()
            .unwrap_or(0))
    }

    async fn mark_seen(&self, _collection: &str, _document_id: &str) -> Result<()> {
        Ok(())
    }

    async fn create_document(
        &self,
        collection: &str,
        document: &NewDocument,
    ) -> Result<DocumentRecord> {
        let mut created = self.created.lock().unwrap();
        created.push((collection.to_string(), document.clone()));
        let id = format!("doc{}", created.len());
        Ok(DocumentRecord::from_payload(&json!({
            "$id": id,
            "$collectionId": collection,
            "senderId": document.sender_id,
            "receiverId": document.receiver_id,
            "content": document.content,
            "isSeen": document.is_seen,
        })))
    }

    async fn push_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.lock().unwrap().get(user_id).cloned())
    }
}

/// Push gateway that keeps what it was asked to send
#[derive(Default)]
pub struct MockPush {
    pub sent: Mutex<Vec<PushNotification>>,
}

#[async_trait]
impl PushNotifier for MockPush {
    async fn send(&self, notification: &PushNotification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn online_probe() -> Arc<SharedNetworkProbe> {
    Arc::new(SharedNetworkProbe::new(NetworkSnapshot::online(
        Transport::Wifi,
    )))
}

/// Default timings without jitter, so backoff delays are exact
pub fn options() -> RealtimeClientOptions {
    RealtimeClientOptions {
        max_jitter: 0,
        count_refresh_interval: None,
        ..Default::default()
    }
}

pub fn request(topic_key: &str, channel: &str) -> SubscribeRequest {
    SubscribeRequest::new(topic_key, channel, event_callback(|_| async {}))
}

pub fn network_error() -> RealtimeError {
    RealtimeError::Network("connection reset by peer".to_string())
}

/// Let spawned tasks run under paused time
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
