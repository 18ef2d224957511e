use crate::backend::CancelFn;
use crate::messaging::ChangeEvent;
use crate::types::RealtimeError;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;

/// Receives normalized events; awaited in delivery order
pub type EventCallback = Arc<dyn Fn(ChangeEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Receives errors after the connection layer has handled them
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// Wrap an async closure as an [`EventCallback`]
pub fn event_callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

pub(crate) type Registry = Mutex<HashMap<String, Arc<SubscriptionEntry>>>;

pub(crate) fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, Arc<SubscriptionEntry>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a caller asks to subscribe to
#[derive(Clone)]
pub struct SubscribeRequest {
    /// Unique per resource type and user, e.g. `messages:u1`
    pub topic_key: String,
    /// Backend channel identifier
    pub channel: String,
    pub on_event: EventCallback,
    pub on_error: Option<ErrorCallback>,
}

impl SubscribeRequest {
    pub fn new(
        topic_key: impl Into<String>,
        channel: impl Into<String>,
        on_event: EventCallback,
    ) -> Self {
        Self {
            topic_key: topic_key.into(),
            channel: channel.into(),
            on_event,
            on_error: None,
        }
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RealtimeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Live backend side of a subscription
pub(crate) struct Attachment {
    pub cancel: CancelFn,
    pub pump: JoinHandle<()>,
}

impl Attachment {
    fn release(self) {
        (self.cancel)();
        self.pump.abort();
    }
}

/// Registry entry: one per topic key, outlives individual backend attachments
pub(crate) struct SubscriptionEntry {
    pub id: u64,
    pub topic_key: String,
    pub channel: String,
    pub on_event: EventCallback,
    pub on_error: Option<ErrorCallback>,
    pub attachment: tokio::sync::Mutex<Option<Attachment>>,
    attached: AtomicBool,
    closed: AtomicBool,
}

impl SubscriptionEntry {
    pub fn new(id: u64, request: SubscribeRequest) -> Self {
        Self {
            id,
            topic_key: request.topic_key,
            channel: request.channel,
            on_event: request.on_event,
            on_error: request.on_error,
            attachment: tokio::sync::Mutex::new(None),
            attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn report_error(&self, err: &RealtimeError) {
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }

    /// Release the backend attachment, keeping the entry registered
    pub async fn detach(&self) -> bool {
        let mut slot = self.attachment.lock().await;
        self.set_attached(false);
        match slot.take() {
            Some(attachment) => {
                attachment.release();
                true
            }
            None => false,
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.detach().await;
        tracing::info!("Unsubscribed from {}", self.topic_key);
    }
}

/// Caller's handle to a subscription.
///
/// Every caller subscribing to the same topic key receives an equal handle. The handle stays
/// valid across reconnects; the backend attachment behind it is replaced transparently.
#[derive(Clone)]
pub struct SubscriptionHandle {
    entry: Arc<SubscriptionEntry>,
    registry: Weak<Registry>,
}

impl SubscriptionHandle {
    pub(crate) fn new(entry: Arc<SubscriptionEntry>, registry: Weak<Registry>) -> Self {
        Self { entry, registry }
    }

    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn topic_key(&self) -> &str {
        &self.entry.topic_key
    }

    pub fn channel(&self) -> &str {
        &self.entry.channel
    }

    /// Whether a backend subscription currently backs this handle
    pub fn is_attached(&self) -> bool {
        self.entry.is_attached()
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.is_closed()
    }

    /// Stop receiving events and release backend resources
    pub async fn cancel(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut entries = lock(&registry);
            // a newer subscription under the same key is not ours to remove
            if entries
                .get(&self.entry.topic_key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.entry))
            {
                entries.remove(&self.entry.topic_key);
            }
        }
        self.entry.close().await;
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for SubscriptionHandle {}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.entry.id)
            .field("topic_key", &self.entry.topic_key)
            .field("attached", &self.entry.is_attached())
            .finish()
    }
}
