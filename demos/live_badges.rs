use marketplace_realtime::{
    AppLifecycleState, ExpoPushNotifier, RealtimeClientOptions, RealtimeService,
    RestDocumentStore, SharedNetworkProbe, SocketBackend,
};
use std::sync::Arc;
use std::time::Duration;

/// Watch live notification and message badges against a real backend
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketplace_realtime=debug".into()),
        )
        .init();

    let endpoint = std::env::var("BACKEND_ENDPOINT").expect("BACKEND_ENDPOINT must be set in .env");
    let realtime = std::env::var("BACKEND_REALTIME_ENDPOINT")
        .unwrap_or_else(|_| endpoint.replace("https://", "wss://"));
    let project = std::env::var("BACKEND_PROJECT").expect("BACKEND_PROJECT must be set in .env");
    let database = std::env::var("BACKEND_DATABASE").unwrap_or_else(|_| "main".to_string());
    let user_id = std::env::var("DEMO_USER_ID").expect("DEMO_USER_ID must be set in .env");

    let mut store = RestDocumentStore::new(&endpoint, &project, &database);
    if let Ok(api_key) = std::env::var("BACKEND_API_KEY") {
        store = store.with_api_key(api_key);
    }

    let probe = Arc::new(SharedNetworkProbe::default());
    let service = RealtimeService::new(
        Arc::new(SocketBackend::new(realtime, &project)),
        probe.clone(),
        Arc::new(store),
        database,
        RealtimeClientOptions::default(),
    )?
    .with_push(Arc::new(ExpoPushNotifier::new()));

    let counts = service.login(&user_id).await;
    println!(
        "📬 {} unread notifications, {} unread messages",
        counts.notifications, counts.messages
    );

    service
        .subscribe_to_notifications(
            &user_id,
            |event| println!("🔔 New notification: {:?}", event.record.content),
            |count| println!("🔢 Notification badge: {}", count),
        )
        .await?;
    service
        .subscribe_to_messages(&user_id, |event| {
            println!("💬 Message {} ({})", event.kind, event.record.id.unwrap_or_default())
        })
        .await?;

    let mut status = service.client().watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let banner = status.borrow_and_update().banner();
            println!("📡 {:?}: {}", banner.kind, banner.message);
        }
    });

    // Simulate a short trip to the background
    tokio::time::sleep(Duration::from_secs(10)).await;
    service.set_app_state(AppLifecycleState::Background).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    service.set_app_state(AppLifecycleState::Active).await;

    println!("⏳ Listening for 60 seconds...");
    tokio::time::sleep(Duration::from_secs(60)).await;

    let status = service.connection_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    service.logout().await;
    Ok(())
}
