//! Collaborators the realtime layer consumes but does not own.
//!
//! The hosted backend is reached only through these traits: a subscribe primitive for
//! realtime channels, a document store for counts and writes, and a push gateway.

use crate::messaging::DocumentRecord;
use crate::types::{RealtimeError, RealtimeEvent, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// What a backend subscription reports to its subscriber
#[derive(Debug)]
pub enum BackendSignal {
    /// The channel is established
    Ack,
    Event(RealtimeEvent),
    Error(RealtimeError),
}

/// Releases the backend resources held by one subscription
pub type CancelFn = Box<dyn FnOnce() + Send + Sync>;

/// Realtime pub/sub primitive.
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Open a subscription on `channel`; signals are delivered to `sink` in backend order
    async fn subscribe(
        &self,
        channel: &str,
        sink: mpsc::Sender<BackendSignal>,
    ) -> Result<CancelFn>;
}

/// A document to create in the notifications or messages collection
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub is_seen: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewDocument {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            is_seen: false,
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Document CRUD used by the badge and dispatch paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Number of documents in `collection` addressed to `receiver_id` and not yet seen
    async fn count_unseen(&self, collection: &str, receiver_id: &str) -> Result<u64>;

    async fn mark_seen(&self, collection: &str, document_id: &str) -> Result<()>;

    async fn create_document(
        &self,
        collection: &str,
        document: &NewDocument,
    ) -> Result<DocumentRecord>;

    /// Registered push token of a user, if any
    async fn push_token(&self, user_id: &str) -> Result<Option<String>>;
}

/// A push message for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Push-notification gateway.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, notification: &PushNotification) -> Result<()>;
}
