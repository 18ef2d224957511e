mod common;

use common::*;
use marketplace_realtime::{
    AppLifecycleState, BackendSignal, BadgeChannel, NetworkSnapshot, RealtimeEvent,
    RealtimeService, SharedNetworkProbe, Transport,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NOTIFICATIONS: &str = "databases.main.collections.notifications.documents";
const MESSAGES: &str = "databases.main.collections.messages.documents";

fn service(backend: Arc<MockBackend>, store: Arc<MockStore>) -> RealtimeService {
    RealtimeService::new(backend, online_probe(), store, "main", options()).unwrap()
}

fn document_event(collection: &str, id: &str, action: &str, payload: serde_json::Value) -> BackendSignal {
    BackendSignal::Event(
        RealtimeEvent::new(
            vec![
                format!("databases.main.collections.{collection}.documents.{id}.{action}"),
                format!("databases.*.collections.*.documents.*.{action}"),
            ],
            payload,
        )
        .with_channels(vec![format!(
            "databases.main.collections.{collection}.documents"
        )]),
    )
}

#[tokio::test(start_paused = true)]
async fn test_notification_count_follows_events_and_resync() {
    let backend = MockBackend::new();
    let store = MockStore::new();
    let service = service(backend.clone(), store.clone());

    let received = Arc::new(Mutex::new(Vec::new()));
    let counts = Arc::new(Mutex::new(Vec::new()));
    let (received_sink, counts_sink) = (received.clone(), counts.clone());
    service
        .subscribe_to_notifications(
            "u1",
            move |event| received_sink.lock().unwrap().push(event.record.id),
            move |count| counts_sink.lock().unwrap().push(count),
        )
        .await
        .unwrap();
    settle().await;

    backend
        .emit(
            NOTIFICATIONS,
            document_event(
                "notifications",
                "n1",
                "create",
                json!({"$id": "n1", "senderId": "u2", "receiverId": "u1", "isSeen": false}),
            ),
        )
        .await;
    settle().await;
    assert_eq!(service.badges().counts().await.notifications, 1);
    assert_eq!(*received.lock().unwrap(), vec![Some("n1".to_string())]);

    let resynced = service.badges().fetch_authoritative_counts("u1").await;
    settle().await;
    assert_eq!(resynced.notifications, 0);
    assert_eq!(*counts.lock().unwrap(), vec![1, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_for_other_users_are_ignored() {
    let backend = MockBackend::new();
    let store = MockStore::new();
    let service = service(backend.clone(), store.clone());
    let received = Arc::new(Mutex::new(0));
    let sink = received.clone();
    service
        .subscribe_to_notifications("u1", move |_| *sink.lock().unwrap() += 1, |_| {})
        .await
        .unwrap();
    settle().await;

    backend
        .emit(
            NOTIFICATIONS,
            document_event(
                "notifications",
                "n2",
                "create",
                json!({"$id": "n2", "receiverId": {"$id": "u3"}, "isSeen": false}),
            ),
        )
        .await;
    settle().await;

    assert_eq!(*received.lock().unwrap(), 0);
    assert_eq!(service.badges().counts().await.notifications, 0);

    // someone else's notification being read does not resync ours
    let before = store.count_calls();
    backend
        .emit(
            NOTIFICATIONS,
            document_event(
                "notifications",
                "n3",
                "update",
                json!({"$id": "n3", "receiverId": "u3", "isSeen": true}),
            ),
        )
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.count_calls(), before);
}

#[tokio::test(start_paused = true)]
async fn test_message_update_triggers_debounced_resync() {
    let backend = MockBackend::new();
    let store = MockStore::new();
    let service = service(backend.clone(), store.clone());
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    service
        .subscribe_to_messages("u1", move |event| sink.lock().unwrap().push(event.kind))
        .await
        .unwrap();
    settle().await;

    service
        .badges()
        .increase(BadgeChannel::Messages, 2)
        .await;
    store.set_count("messages", 1);
    backend
        .emit(
            MESSAGES,
            document_event(
                "messages",
                "m1",
                "update",
                json!({"$id": "m1", "senderId": "u2", "receiverId": "u1", "isSeen": true}),
            ),
        )
        .await;
    settle().await;

    // counters are not guessed from updates
    assert_eq!(service.badges().counts().await.messages, 2);
    assert_eq!(updates.lock().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.badges().counts().await.messages, 1);
}

#[tokio::test(start_paused = true)]
async fn test_badges_hidden_on_their_own_screen() {
    let service = service(MockBackend::new(), MockStore::new());
    service.login("u1").await;
    service.badges().increase(BadgeChannel::Messages, 3).await;

    service.badges().set_current_screen(Some("messages")).await;
    assert_eq!(service.badges().visible_count(BadgeChannel::Messages).await, 0);

    service.badges().set_current_screen(Some("profile")).await;
    assert_eq!(service.badges().visible_count(BadgeChannel::Messages).await, 3);

    service.badges().decrease(BadgeChannel::Messages, 10).await;
    assert_eq!(service.badges().counts().await.messages, 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_fetches_counts_and_logout_tears_down() {
    let backend = MockBackend::new();
    let store = MockStore::new();
    store.set_count("notifications", 2);
    store.set_count("messages", 5);
    let service = service(backend.clone(), store.clone());

    let counts = service.login("u1").await;
    assert_eq!((counts.notifications, counts.messages), (2, 5));

    service
        .subscribe_to_notifications("u1", |_| {}, |_| {})
        .await
        .unwrap();
    service.subscribe_to_messages("u1", |_| {}).await.unwrap();
    assert_eq!(backend.calls(), 2);

    service.logout().await;
    let status = service.connection_status().await;
    assert!(status.active_subscriptions.is_empty());
    assert_eq!(backend.cancels(), 2);
    assert_eq!(service.badges().current_user().await, None);
    assert_eq!(service.badges().counts().await.notifications, 0);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_and_network_restore_resync_badges() {
    let backend = MockBackend::new();
    let store = MockStore::new();
    let probe = Arc::new(SharedNetworkProbe::new(NetworkSnapshot::offline()));
    let service =
        RealtimeService::new(backend.clone(), probe.clone(), store.clone(), "main", options())
            .unwrap();
    service.login("u1").await;
    let after_login = store.count_calls();

    let handle = service.subscribe_to_messages("u1", |_| {}).await.unwrap();
    assert!(!handle.is_attached());

    probe.set(NetworkSnapshot::online(Transport::Cellular));
    service
        .network_changed(NetworkSnapshot::online(Transport::Cellular))
        .await;
    assert!(handle.is_attached());
    assert_eq!(store.count_calls(), after_login);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(store.count_calls(), after_login + 2);

    service.set_app_state(AppLifecycleState::Background).await;
    service.set_app_state(AppLifecycleState::Active).await;
    assert_eq!(store.count_calls(), after_login + 4);
}

#[tokio::test(start_paused = true)]
async fn test_send_notification_pushes_when_token_exists() {
    let store = MockStore::new();
    store.set_push_token("u2", "ExponentPushToken[abc]");
    let push = Arc::new(MockPush::default());
    let service = service(MockBackend::new(), store.clone()).with_push(push.clone());

    let record = service
        .send_notification("u1", "u2", "Request accepted", "Your artisan is on the way")
        .await
        .unwrap();
    assert_eq!(record.receiver_id.as_deref(), Some("u2"));
    settle().await;

    {
        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ExponentPushToken[abc]");
        assert_eq!(sent[0].title, "Request accepted");
    }

    // no token, no push
    service.send_message("u2", "u1", "Thanks!").await.unwrap();
    settle().await;
    assert_eq!(push.sent.lock().unwrap().len(), 1);
    assert_eq!(store.created.lock().unwrap().len(), 2);
}
