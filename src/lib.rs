//! # Marketplace Realtime
//!
//! Connection resilience for the marketplace app's live notifications and messages:
//! reconnect with backoff, cooldown after repeated failures, full teardown after a system wake,
//! and unread badge counts that survive network flaps and app backgrounding.
//!
//! ## Example
//!
//! ```no_run
//! use marketplace_realtime::{
//!     RealtimeClientOptions, RealtimeService, RestDocumentStore, SharedNetworkProbe,
//!     SocketBackend,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = SocketBackend::new("wss://cloud.example.io/v1", "marketplace");
//!     let store = RestDocumentStore::new("https://cloud.example.io/v1", "marketplace", "main");
//!     let service = RealtimeService::new(
//!         Arc::new(backend),
//!         Arc::new(SharedNetworkProbe::default()),
//!         Arc::new(store),
//!         "main",
//!         RealtimeClientOptions::default(),
//!     )?;
//!
//!     service.login("u1").await;
//!     service
//!         .subscribe_to_notifications("u1", |event| println!("{:?}", event.record), |count| {
//!             println!("unread notifications: {}", count)
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod badge;
pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod service;
pub mod subscription;
pub mod types;
pub mod websocket;

pub use backend::{
    BackendSignal, CancelFn, DocumentStore, NewDocument, PushNotification, PushNotifier,
    RealtimeBackend,
};
pub use badge::{BadgeAggregator, BadgeChannel, BadgeCounts};
pub use client::{
    AppLifecycleState, ConnectionPhase, ConnectionStatus, RealtimeClient, RealtimeClientOptions,
    StatusBanner,
};
pub use infrastructure::{
    ExpoPushNotifier, NetworkProbe, NetworkSnapshot, RestDocumentStore, SharedNetworkProbe,
    Transport,
};
pub use messaging::{ChangeEvent, DocumentRecord, EventKind};
pub use service::RealtimeService;
pub use subscription::{SubscribeRequest, SubscriptionHandle, event_callback};
pub use types::{RealtimeError, RealtimeEvent, Result};
pub use websocket::SocketBackend;
