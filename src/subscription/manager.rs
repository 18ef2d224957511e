use super::entry::{Attachment, Registry, SubscribeRequest, SubscriptionEntry, SubscriptionHandle, lock};
use crate::backend::{BackendSignal, RealtimeBackend};
use crate::client::{ConnectionMachine, Directive};
use crate::messaging::ChangeEvent;
use crate::types::{EVENT_BUFFER_SIZE, RealtimeError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;

/// Idempotent open/close of backend subscriptions keyed by topic.
///
/// Every signal from a backend subscription reaches the connection state machine before the
/// caller's callbacks. Transitions that need timers are forwarded as [`Directive`]s to the
/// client's signal task.
#[derive(Clone)]
pub struct SubscriptionManager {
    backend: Arc<dyn RealtimeBackend>,
    machine: Arc<RwLock<ConnectionMachine>>,
    signals: mpsc::UnboundedSender<Directive>,
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        machine: Arc<RwLock<ConnectionMachine>>,
        signals: mpsc::UnboundedSender<Directive>,
    ) -> Self {
        Self {
            backend,
            machine,
            signals,
            registry: Arc::new(Registry::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe, or return the handle of the live subscription for this key.
    ///
    /// While the connection stands down (`FullyDisconnected`, `Cooldown`) no backend call is
    /// made: the subscription is registered detached and attached by the next reconnect.
    /// Backend failures are routed to the state machine and the error callback; they do not
    /// fail the call.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionHandle> {
        let (entry, created) = self.register_entry(request)?;
        let handle = self.handle_for(&entry);
        if !created {
            tracing::debug!("Reusing subscription for {}", entry.topic_key);
            return Ok(handle);
        }

        {
            let mut machine = self.machine.write().await;
            if !machine.accepts_attach() {
                tracing::info!(
                    "Deferring subscription {} while {:?}",
                    entry.topic_key,
                    machine.phase()
                );
                return Ok(handle);
            }
            machine.begin_connecting();
        }

        if let Err(err) = self.attach(&entry).await {
            tracing::warn!("Failed to subscribe {}: {}", entry.topic_key, err);
            let directive = self
                .machine
                .write()
                .await
                .handle_error(&err, Instant::now());
            self.notify(directive);
            entry.report_error(&err);
        }
        Ok(handle)
    }

    /// Register without touching the backend; the next reconnect attaches it
    pub fn register(&self, request: SubscribeRequest) -> Result<SubscriptionHandle> {
        let (entry, _) = self.register_entry(request)?;
        Ok(self.handle_for(&entry))
    }

    /// Cancel and forget `topic_key`; unknown keys are ignored
    pub async fn unsubscribe(&self, topic_key: &str) {
        let entry = lock(&self.registry).remove(topic_key);
        if let Some(entry) = entry {
            entry.close().await;
        }
    }

    /// Cancel and forget every subscription
    pub async fn teardown_all(&self) {
        let entries: Vec<_> = lock(&self.registry).drain().map(|(_, entry)| entry).collect();
        if !entries.is_empty() {
            tracing::info!("Tearing down {} subscriptions", entries.len());
        }
        for entry in entries {
            entry.close().await;
        }
    }

    /// Release every backend attachment, keeping registrations
    pub async fn detach_all(&self) -> usize {
        let mut released = 0;
        for entry in self.entries() {
            if entry.detach().await {
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!("Released {} backend subscriptions", released);
        }
        released
    }

    /// Attach every detached registration; stops at the first failure
    pub async fn attach_all(&self) -> Result<()> {
        for entry in self.entries() {
            if let Err(err) = self.attach(&entry).await {
                entry.report_error(&err);
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.registry).keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn get(&self, topic_key: &str) -> Option<SubscriptionHandle> {
        let entry = lock(&self.registry).get(topic_key).cloned();
        entry.map(|entry| self.handle_for(&entry))
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_detached(&self) -> bool {
        lock(&self.registry)
            .values()
            .any(|entry| !entry.is_attached())
    }

    fn entries(&self) -> Vec<Arc<SubscriptionEntry>> {
        lock(&self.registry).values().cloned().collect()
    }

    fn handle_for(&self, entry: &Arc<SubscriptionEntry>) -> SubscriptionHandle {
        SubscriptionHandle::new(Arc::clone(entry), Arc::downgrade(&self.registry))
    }

    /// Atomic check-then-insert; returns the entry and whether it was created
    fn register_entry(&self, request: SubscribeRequest) -> Result<(Arc<SubscriptionEntry>, bool)> {
        if request.topic_key.is_empty() {
            return Err(RealtimeError::Config("topic key must not be empty".to_string()));
        }

        let mut registry = lock(&self.registry);
        if let Some(existing) = registry.get(&request.topic_key) {
            return Ok((Arc::clone(existing), false));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(SubscriptionEntry::new(id, request));
        registry.insert(entry.topic_key.clone(), Arc::clone(&entry));
        Ok((entry, true))
    }

    async fn attach(&self, entry: &Arc<SubscriptionEntry>) -> Result<()> {
        let mut slot = entry.attachment.lock().await;
        if slot.is_some() || entry.is_closed() {
            return Ok(());
        }

        tracing::info!("Subscribing to channel: {} ({})", entry.channel, entry.topic_key);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let cancel = self.backend.subscribe(&entry.channel, tx).await?;
        let pump = tokio::spawn(pump(
            Arc::clone(entry),
            rx,
            Arc::clone(&self.machine),
            self.signals.clone(),
        ));

        *slot = Some(Attachment { cancel, pump });
        entry.set_attached(true);
        Ok(())
    }

    fn notify(&self, directive: Directive) {
        if self.signals.send(directive).is_err() {
            tracing::debug!("Signal task stopped, dropping directive {:?}", directive);
        }
    }
}

/// Forwards one attachment's signals: state machine first, then the caller
async fn pump(
    entry: Arc<SubscriptionEntry>,
    mut rx: mpsc::Receiver<BackendSignal>,
    machine: Arc<RwLock<ConnectionMachine>>,
    signals: mpsc::UnboundedSender<Directive>,
) {
    while let Some(signal) = rx.recv().await {
        if entry.is_closed() {
            break;
        }

        match signal {
            BackendSignal::Ack => {
                tracing::debug!("Channel acknowledged: {}", entry.channel);
                if machine.write().await.mark_connected() {
                    let _ = signals.send(Directive::None);
                }
            }
            BackendSignal::Event(event) => {
                if machine.write().await.mark_connected() {
                    let _ = signals.send(Directive::None);
                }
                let change = ChangeEvent::from_event(event);
                tracing::debug!(
                    "Received {} event on {} (document {:?})",
                    change.kind,
                    entry.topic_key,
                    change.record.id
                );
                (entry.on_event)(change).await;
            }
            BackendSignal::Error(err) => {
                tracing::warn!("Subscription {} reported: {}", entry.topic_key, err);
                let directive = machine.write().await.handle_error(&err, Instant::now());
                let _ = signals.send(directive);
                entry.report_error(&err);
            }
        }
    }
    tracing::debug!("Signal stream ended for {}", entry.topic_key);
}
