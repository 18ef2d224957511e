use super::{ConnectionMachine, RealtimeClient};
use crate::backend::RealtimeBackend;
use crate::client::diagnostics::ConnectionStatus;
use crate::infrastructure::{NetworkProbe, TaskManager};
use crate::subscription::SubscriptionManager;
use crate::types::constants::*;
use crate::types::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::Instant;

/// Tuning for the resilience layer. All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeClientOptions {
    pub base_delay: u64,
    pub max_delay: u64,
    pub max_jitter: u64,
    pub max_reconnect_attempts: u32,
    pub cooldown: u64,
    pub system_wake_threshold: u64,
    pub settle_delay: u64,
    pub network_check_interval: u64,
    pub resync_debounce: u64,
    pub network_restore_settle: u64,
    /// Period of the background badge refresh; `None` disables it
    pub count_refresh_interval: Option<u64>,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            cooldown: DEFAULT_COOLDOWN,
            system_wake_threshold: DEFAULT_SYSTEM_WAKE_THRESHOLD,
            settle_delay: DEFAULT_SETTLE_DELAY,
            network_check_interval: DEFAULT_NETWORK_CHECK_INTERVAL,
            resync_debounce: DEFAULT_RESYNC_DEBOUNCE,
            network_restore_settle: DEFAULT_NETWORK_RESTORE_SETTLE,
            count_refresh_interval: Some(DEFAULT_COUNT_REFRESH_INTERVAL),
        }
    }
}

impl RealtimeClientOptions {
    /// Load options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay == 0 {
            return Err(RealtimeError::Config("base_delay must be positive".to_string()));
        }
        if self.max_delay < self.base_delay {
            return Err(RealtimeError::Config(
                "max_delay must not be below base_delay".to_string(),
            ));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(RealtimeError::Config(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.network_check_interval == 0 {
            return Err(RealtimeError::Config(
                "network_check_interval must be positive".to_string(),
            ));
        }
        if self.count_refresh_interval == Some(0) {
            return Err(RealtimeError::Config(
                "count_refresh_interval must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown)
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.settle_delay)
    }

    pub fn network_check_duration(&self) -> Duration {
        Duration::from_millis(self.network_check_interval)
    }

    pub fn wake_threshold(&self) -> Duration {
        Duration::from_millis(self.system_wake_threshold)
    }
}

/// Builder for RealtimeClient that handles initialization
pub struct RealtimeClientBuilder {
    backend: Arc<dyn RealtimeBackend>,
    probe: Arc<dyn NetworkProbe>,
    options: RealtimeClientOptions,
}

impl RealtimeClientBuilder {
    /// Create a new builder
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        probe: Arc<dyn NetworkProbe>,
        options: RealtimeClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            backend,
            probe,
            options,
        })
    }

    /// Build the client and spawn the signal task. Must run inside a tokio runtime.
    pub fn build(self) -> RealtimeClient {
        let machine = Arc::new(RwLock::new(ConnectionMachine::new(
            &self.options,
            Instant::now(),
        )));
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let subscriptions =
            SubscriptionManager::new(self.backend, Arc::clone(&machine), signal_tx);
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::default());

        let client = RealtimeClient {
            options: Arc::new(self.options),
            machine,
            subscriptions,
            probe: self.probe,
            timers: Arc::new(Mutex::new(TaskManager::new())),
            status_tx: Arc::new(status_tx),
            signal_task: Arc::new(Mutex::new(None)),
        };

        // Directives raised by subscription pumps are applied here, in arrival order
        let client_for_signals = client.clone();
        let handle = tokio::spawn(async move {
            while let Some(directive) = signal_rx.recv().await {
                client_for_signals.apply(directive).await;
                client_for_signals.publish_status().await;
            }
            tracing::info!("Connection signal task finished");
        });
        client.set_signal_task(handle);

        client
    }
}
