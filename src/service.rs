//! Application-facing facade: realtime client, badges and document dispatch wired together.

use crate::backend::{DocumentStore, NewDocument, PushNotification, PushNotifier, RealtimeBackend};
use crate::badge::{BadgeAggregator, BadgeChannel, BadgeCounts};
use crate::client::{
    AppLifecycleState, ConnectionStatus, LifecycleDirective, NetworkChange, RealtimeClient,
    RealtimeClientOptions,
};
use crate::infrastructure::{NetworkProbe, NetworkSnapshot};
use crate::messaging::{ChangeEvent, DocumentRecord};
use crate::subscription::{SubscribeRequest, SubscriptionHandle, event_callback};
use crate::types::Result;
use crate::types::constants::collections;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Realtime layer as the app sees it.
///
/// Topic keys are `notifications:<user>` and `messages:<user>`; both listen on the collection's
/// document channel and filter for the user locally.
#[derive(Clone)]
pub struct RealtimeService {
    client: RealtimeClient,
    badges: BadgeAggregator,
    store: Arc<dyn DocumentStore>,
    push: Option<Arc<dyn PushNotifier>>,
    database_id: Arc<str>,
    count_watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl RealtimeService {
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        probe: Arc<dyn NetworkProbe>,
        store: Arc<dyn DocumentStore>,
        database_id: impl Into<String>,
        options: RealtimeClientOptions,
    ) -> Result<Self> {
        let resync_debounce = Duration::from_millis(options.resync_debounce);
        let client = RealtimeClient::new(backend, probe, options)?;
        Ok(Self {
            client,
            badges: BadgeAggregator::new(Arc::clone(&store), resync_debounce),
            store,
            push: None,
            database_id: Arc::from(database_id.into()),
            count_watchers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn with_push(mut self, push: Arc<dyn PushNotifier>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub fn badges(&self) -> &BadgeAggregator {
        &self.badges
    }

    /// Backend channel carrying document events of `collection`
    pub fn channel_for(&self, collection: &str) -> String {
        format!(
            "databases.{}.collections.{}.documents",
            self.database_id, collection
        )
    }

    /// Start a session: badge counts are fetched and kept fresh
    pub async fn login(&self, user_id: &str) -> BadgeCounts {
        tracing::info!("Starting realtime session for {}", user_id);
        self.badges.set_user(Some(user_id.to_string())).await;
        if let Some(period) = self.client.options().count_refresh_interval {
            self.badges
                .start_periodic_refresh(Duration::from_millis(period));
        }
        self.badges.fetch_authoritative_counts(user_id).await
    }

    /// End the session: every subscription is torn down and badges reset
    pub async fn logout(&self) {
        tracing::info!("Ending realtime session");
        self.badges.stop_periodic_refresh();
        self.cleanup_all_subscriptions().await;
        self.badges.set_user(None).await;
    }

    /// Live notifications for `user_id`.
    ///
    /// `on_new_notification` receives unseen notifications addressed to the user;
    /// `on_count_update` receives the unread notification count whenever it changes.
    pub async fn subscribe_to_notifications<N, C>(
        &self,
        user_id: &str,
        on_new_notification: N,
        on_count_update: C,
    ) -> Result<SubscriptionHandle>
    where
        N: Fn(ChangeEvent) + Send + Sync + 'static,
        C: Fn(u64) + Send + Sync + 'static,
    {
        self.ensure_user(user_id).await;
        let topic_key = format!("{}:{}", collections::NOTIFICATIONS, user_id);

        let badges = self.badges.clone();
        let user = user_id.to_string();
        let on_new_notification = Arc::new(on_new_notification);
        let on_event = event_callback(move |event: ChangeEvent| {
            let badges = badges.clone();
            let user = user.clone();
            let on_new_notification = Arc::clone(&on_new_notification);
            async move {
                // the channel carries every user's notifications
                if let Some(receiver) = event.record.receiver_id.as_deref()
                    && receiver != user
                {
                    return;
                }
                let is_new = event.is_unseen_create_for(&user);
                badges
                    .apply_event(BadgeChannel::Notifications, &event)
                    .await;
                if is_new {
                    on_new_notification(event);
                }
            }
        });

        let request = SubscribeRequest::new(
            topic_key.clone(),
            self.channel_for(collections::NOTIFICATIONS),
            on_event,
        );
        let handle = self.client.subscribe(request).await?;
        self.watch_count(topic_key, BadgeChannel::Notifications, on_count_update);
        Ok(handle)
    }

    /// Live message updates involving `user_id`, as sender or receiver
    pub async fn subscribe_to_messages<M>(
        &self,
        user_id: &str,
        on_message_update: M,
    ) -> Result<SubscriptionHandle>
    where
        M: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        self.ensure_user(user_id).await;

        let badges = self.badges.clone();
        let user = user_id.to_string();
        let on_message_update = Arc::new(on_message_update);
        let on_event = event_callback(move |event: ChangeEvent| {
            let badges = badges.clone();
            let user = user.clone();
            let on_message_update = Arc::clone(&on_message_update);
            async move {
                let record = &event.record;
                let involved = record.receiver_id.as_deref() == Some(user.as_str())
                    || record.sender_id.as_deref() == Some(user.as_str());
                if !involved {
                    return;
                }
                badges.apply_event(BadgeChannel::Messages, &event).await;
                on_message_update(event);
            }
        });

        let request = SubscribeRequest::new(
            format!("{}:{}", collections::MESSAGES, user_id),
            self.channel_for(collections::MESSAGES),
            on_event,
        );
        self.client.subscribe(request).await
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.client.connection_status().await
    }

    pub async fn force_reconnect(&self) {
        self.client.force_reconnect().await;
    }

    pub async fn cleanup_all_subscriptions(&self) {
        for (_, handle) in self.watchers().drain() {
            handle.abort();
        }
        self.client.cleanup_all_subscriptions().await;
    }

    /// Forward a lifecycle change; returning to the foreground also resyncs badges
    pub async fn set_app_state(&self, next: AppLifecycleState) -> LifecycleDirective {
        let directive = self.client.set_app_state(next).await;
        if matches!(
            directive,
            LifecycleDirective::Resume { .. } | LifecycleDirective::SystemWake { .. }
        ) {
            self.badges.refresh().await;
        }
        directive
    }

    /// Forward a connectivity change; a restored network resyncs badges after a short settle
    pub async fn network_changed(&self, snapshot: NetworkSnapshot) -> NetworkChange {
        let change = self.client.network_changed(snapshot).await;
        if change == NetworkChange::Restored {
            let settle = Duration::from_millis(self.client.options().network_restore_settle);
            self.badges.schedule_full_resync(settle);
        }
        change
    }

    /// Create a notification document, then push it to the receiver if they have a device
    pub async fn send_notification(
        &self,
        sender_id: &str,
        receiver_id: &str,
        title: &str,
        body: &str,
    ) -> Result<DocumentRecord> {
        let document =
            NewDocument::new(sender_id, receiver_id, body).with_field("title", json!(title));
        let record = self
            .store
            .create_document(collections::NOTIFICATIONS, &document)
            .await?;

        self.dispatch_push(
            receiver_id,
            title,
            body,
            json!({"type": "notification", "id": record.id.clone()}),
        );
        Ok(record)
    }

    /// Create a message document, then push it to the receiver if they have a device
    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<DocumentRecord> {
        let document = NewDocument::new(sender_id, receiver_id, content);
        let record = self
            .store
            .create_document(collections::MESSAGES, &document)
            .await?;

        self.dispatch_push(
            receiver_id,
            "New message",
            content,
            json!({"type": "message", "senderId": sender_id, "id": record.id.clone()}),
        );
        Ok(record)
    }

    /// Stop every task owned by the service
    pub async fn shutdown(&self) {
        self.badges.stop_periodic_refresh();
        for (_, handle) in self.watchers().drain() {
            handle.abort();
        }
        self.client.shutdown().await;
    }

    async fn ensure_user(&self, user_id: &str) {
        if self.badges.current_user().await.as_deref() != Some(user_id) {
            self.badges.set_user(Some(user_id.to_string())).await;
        }
    }

    fn watch_count<C>(&self, topic_key: String, channel: BadgeChannel, on_count_update: C)
    where
        C: Fn(u64) + Send + Sync + 'static,
    {
        let mut watchers = self.watchers();
        if watchers
            .get(&topic_key)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let mut counts = self.badges.watch();
        let handle = tokio::spawn(async move {
            let mut last = counts.borrow_and_update().get(channel);
            while counts.changed().await.is_ok() {
                let current = counts.borrow_and_update().get(channel);
                if current != last {
                    last = current;
                    on_count_update(current);
                }
            }
        });
        watchers.insert(topic_key, handle);
    }

    /// Fire-and-forget push; failures are logged only
    fn dispatch_push(&self, receiver_id: &str, title: &str, body: &str, data: Value) {
        let Some(push) = self.push.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let receiver_id = receiver_id.to_string();
        let title = title.to_string();
        let body = body.to_string();

        tokio::spawn(async move {
            let token = match store.push_token(&receiver_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    tracing::debug!("No push token for {}", receiver_id);
                    return;
                }
                Err(err) => {
                    tracing::warn!("Failed to look up push token for {}: {}", receiver_id, err);
                    return;
                }
            };

            let notification = PushNotification {
                to: token,
                title,
                body,
                data,
            };
            if let Err(err) = push.send(&notification).await {
                tracing::warn!("Push to {} failed: {}", receiver_id, err);
            }
        });
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.count_watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
