use super::{
    AppLifecycleState, AttemptGate, ConnectionMachine, ConnectionPhase, ConnectionStatus,
    Directive, LifecycleDirective, NetworkChange, RealtimeClientBuilder, RealtimeClientOptions,
    TimerKind,
};
use crate::backend::RealtimeBackend;
use crate::infrastructure::{NetworkProbe, NetworkSnapshot, TaskManager};
use crate::subscription::{SubscribeRequest, SubscriptionHandle, SubscriptionManager};
use crate::types::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What started a reconnect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    Backoff,
    NetworkCheck,
    NetworkRestored,
    Foreground,
    CooldownExpired,
    Settled,
    /// User asked; bypasses the need check
    Manual,
}

impl fmt::Display for ReconnectTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Backoff => "backoff",
            Self::NetworkCheck => "network check",
            Self::NetworkRestored => "network restored",
            Self::Foreground => "foreground",
            Self::CooldownExpired => "cooldown expired",
            Self::Settled => "settled",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

enum AttemptOutcome {
    Applied(Directive),
    Stale { standing_down: bool },
}

/// Resilient realtime client.
///
/// Owns the connection state machine, the subscription registry and the timers that drive
/// recovery. Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) options: Arc<RealtimeClientOptions>,
    pub(crate) machine: Arc<RwLock<ConnectionMachine>>,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) probe: Arc<dyn NetworkProbe>,
    pub(crate) timers: Arc<Mutex<TaskManager<TimerKind>>>,
    pub(crate) status_tx: Arc<watch::Sender<ConnectionStatus>>,
    pub(crate) signal_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RealtimeClient {
    /// Create a client with validated options. Must run inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        probe: Arc<dyn NetworkProbe>,
        options: RealtimeClientOptions,
    ) -> Result<Self> {
        Ok(RealtimeClientBuilder::new(backend, probe, options)?.build())
    }

    pub fn options(&self) -> &RealtimeClientOptions {
        &self.options
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Subscribe to a topic; a second call with the same key returns the same handle.
    ///
    /// When the network is unusable the subscription is registered and attached once the
    /// network comes back.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionHandle> {
        let snapshot = self.probe.snapshot().await;
        let paused = {
            let mut machine = self.machine.write().await;
            machine.record_network(snapshot);
            machine.is_paused()
        };

        let handle = if snapshot.is_usable() {
            self.subscriptions.subscribe(request).await?
        } else {
            tracing::info!(
                "Network unavailable, deferring subscription {}",
                request.topic_key
            );
            let handle = self.subscriptions.register(request)?;
            if !paused {
                self.schedule(TimerKind::NetworkCheck, self.options.network_check_duration());
            }
            handle
        };

        self.publish_status().await;
        Ok(handle)
    }

    pub async fn unsubscribe(&self, topic_key: &str) {
        self.subscriptions.unsubscribe(topic_key).await;
        if self.subscriptions.is_empty() {
            self.timers().abort_all();
            self.machine.write().await.mark_idle();
        }
        self.publish_status().await;
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let machine = self.machine.read().await;
        ConnectionStatus::capture(
            &machine,
            self.subscriptions.topics(),
            self.timers().pending(),
            Instant::now(),
        )
    }

    /// Status updates, published after every transition
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Reconnect now, ignoring cooldown and the attempt budget
    pub async fn force_reconnect(&self) {
        tracing::info!("Manual reconnect requested");
        self.timers().abort_all();
        self.machine.write().await.force_reconnect();
        self.reconnect_once(ReconnectTrigger::Manual).await;
        self.publish_status().await;
    }

    /// Probe the network and restore subscriptions if anything is missing
    pub async fn check_connection(&self) {
        self.check_network(ReconnectTrigger::NetworkCheck).await;
        self.publish_status().await;
    }

    /// Cancel every subscription and timer and start over from `Disconnected`
    pub async fn cleanup_all_subscriptions(&self) {
        self.timers().abort_all();
        self.subscriptions.teardown_all().await;
        self.machine.write().await.reset(Instant::now());
        self.publish_status().await;
    }

    pub async fn set_app_state(&self, next: AppLifecycleState) -> LifecycleDirective {
        let directive = self
            .machine
            .write()
            .await
            .lifecycle_transition(next, Instant::now());

        match directive {
            LifecycleDirective::Pause => {
                tracing::info!("App left the foreground, pausing realtime timers");
                self.timers().abort_all();
            }
            LifecycleDirective::SystemWake { inactive_for } => {
                tracing::warn!("App inactive for {:?}, assuming system sleep", inactive_for);
                self.full_reset("system wake").await;
            }
            LifecycleDirective::Resume { inactive_for } => {
                tracing::info!("App returned to the foreground after {:?}", inactive_for);
                self.resume().await;
            }
            LifecycleDirective::Ignore => {}
        }

        self.publish_status().await;
        directive
    }

    /// Platform wake notification; same recovery as a long inactivity gap
    pub async fn system_wake(&self) {
        self.full_reset("platform wake signal").await;
        self.publish_status().await;
    }

    pub async fn network_changed(&self, snapshot: NetworkSnapshot) -> NetworkChange {
        let (change, paused) = {
            let mut machine = self.machine.write().await;
            (machine.record_network(snapshot), machine.is_paused())
        };

        match change {
            NetworkChange::Restored => {
                tracing::info!("Network restored ({:?})", snapshot.transport);
                self.timers().cancel(TimerKind::NetworkCheck);
                if !paused {
                    self.on_network_available(ReconnectTrigger::NetworkRestored)
                        .await;
                }
            }
            NetworkChange::Lost => tracing::warn!("Network lost"),
            NetworkChange::Unchanged => {}
        }

        self.publish_status().await;
        change
    }

    /// Stop every task and release all subscriptions
    pub async fn shutdown(&self) {
        self.timers().abort_all();
        let signal_task = self
            .signal_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = signal_task {
            handle.abort();
        }
        self.subscriptions.teardown_all().await;
        tracing::info!("Realtime client shut down");
    }

    pub(crate) fn set_signal_task(&self, handle: JoinHandle<()>) {
        *self
            .signal_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) async fn publish_status(&self) {
        let status = self.connection_status().await;
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Carry out the follow-up of a state transition
    pub(crate) async fn apply(&self, directive: Directive) {
        let paused = self.machine.read().await.is_paused();
        match directive {
            Directive::None => {}
            Directive::ScheduleReconnect(delay) => {
                if !paused {
                    self.schedule(TimerKind::Reconnect, delay);
                }
            }
            Directive::StartCooldown(cooldown) => {
                {
                    let mut timers = self.timers();
                    timers.cancel(TimerKind::Reconnect);
                    timers.cancel(TimerKind::NetworkCheck);
                }
                if !paused {
                    self.schedule(TimerKind::Cooldown, cooldown);
                }
            }
            Directive::FullReset => {
                self.timers().abort_all();
                self.subscriptions.detach_all().await;
                if !paused {
                    self.schedule(TimerKind::Settle, self.options.settle_duration());
                }
            }
        }
    }

    async fn full_reset(&self, reason: &str) {
        tracing::warn!("Full realtime reset: {}", reason);
        self.machine.write().await.enter_fully_disconnected();
        self.apply(Directive::FullReset).await;
    }

    async fn resume(&self) {
        let (phase, remaining) = {
            let machine = self.machine.read().await;
            (machine.phase(), machine.cooldown_remaining(Instant::now()))
        };

        match phase {
            ConnectionPhase::FullyDisconnected => {
                self.schedule(TimerKind::Settle, self.options.settle_duration());
            }
            ConnectionPhase::Cooldown => match remaining {
                Some(remaining) if !remaining.is_zero() => {
                    self.schedule(TimerKind::Cooldown, remaining);
                }
                _ => self.on_cooldown_elapsed().await,
            },
            _ => self.check_network(ReconnectTrigger::Foreground).await,
        }
    }

    async fn check_network(&self, trigger: ReconnectTrigger) {
        let snapshot = self.probe.snapshot().await;
        let paused = {
            let mut machine = self.machine.write().await;
            machine.record_network(snapshot);
            machine.is_paused()
        };
        if paused {
            return;
        }

        if !snapshot.is_usable() {
            tracing::debug!(
                "Network still unavailable, next check in {:?}",
                self.options.network_check_duration()
            );
            self.schedule(TimerKind::NetworkCheck, self.options.network_check_duration());
            return;
        }
        self.on_network_available(trigger).await;
    }

    async fn on_network_available(&self, trigger: ReconnectTrigger) {
        let phase = self.machine.read().await.phase();
        match phase {
            ConnectionPhase::FullyDisconnected => {
                self.schedule(TimerKind::Settle, self.options.settle_duration());
            }
            // the cooldown timer owns the next attempt
            ConnectionPhase::Cooldown => {}
            _ => self.reconnect_once(trigger).await,
        }
    }

    async fn on_settle_elapsed(&self) {
        let snapshot = self.probe.snapshot().await;
        let (settled, phase) = {
            let mut machine = self.machine.write().await;
            (machine.settle_complete(snapshot), machine.phase())
        };

        if settled {
            tracing::info!("Settle delay elapsed, restoring subscriptions");
            self.reconnect_once(ReconnectTrigger::Settled).await;
        } else if phase == ConnectionPhase::FullyDisconnected {
            tracing::info!("Network not ready after settle delay, waiting");
            self.schedule(TimerKind::NetworkCheck, self.options.network_check_duration());
        }
        self.publish_status().await;
    }

    async fn on_cooldown_elapsed(&self) {
        let expired = self.machine.write().await.cooldown_expired(Instant::now());
        if expired {
            self.reconnect_once(ReconnectTrigger::CooldownExpired).await;
        }
        self.publish_status().await;
    }

    fn needs_reconnect(&self, phase: ConnectionPhase) -> bool {
        !self.subscriptions.is_empty()
            && (self.subscriptions.has_detached()
                || matches!(
                    phase,
                    ConnectionPhase::Disconnected | ConnectionPhase::Reconnecting
                ))
    }

    /// One guarded reconnect attempt: release stale attachments, attach everything again
    async fn reconnect_once(&self, trigger: ReconnectTrigger) {
        let epoch = {
            let mut machine = self.machine.write().await;
            if trigger != ReconnectTrigger::Manual && !self.needs_reconnect(machine.phase()) {
                tracing::debug!("No reconnect needed ({}) in {:?}", trigger, machine.phase());
                return;
            }
            match machine.begin_attempt(Instant::now()) {
                AttemptGate::Proceed(epoch) => epoch,
                gate => {
                    tracing::debug!("Skipping reconnect ({}): {:?}", trigger, gate);
                    return;
                }
            }
        };

        let snapshot = self.probe.snapshot().await;
        if !snapshot.is_usable() {
            let paused = {
                let mut machine = self.machine.write().await;
                machine.record_network(snapshot);
                machine.finish_attempt(epoch);
                machine.is_paused()
            };
            tracing::info!("Network unreachable, deferring reconnect ({})", trigger);
            if !paused {
                self.schedule(TimerKind::NetworkCheck, self.options.network_check_duration());
            }
            return;
        }
        self.machine.write().await.record_network(snapshot);

        if self.subscriptions.is_empty() {
            let mut machine = self.machine.write().await;
            if machine.finish_attempt(epoch) {
                machine.mark_idle();
            }
            return;
        }

        tracing::info!("Attempting to reconnect ({})...", trigger);
        self.subscriptions.detach_all().await;
        let result = self.subscriptions.attach_all().await;

        let outcome = {
            let mut machine = self.machine.write().await;
            if !machine.finish_attempt(epoch) {
                AttemptOutcome::Stale {
                    standing_down: !machine.accepts_attach(),
                }
            } else {
                match result {
                    Ok(()) => {
                        machine.mark_connected();
                        tracing::info!("Reconnected {} subscriptions", self.subscriptions.len());
                        AttemptOutcome::Applied(Directive::None)
                    }
                    Err(err) => {
                        tracing::error!("Reconnection attempt failed: {}", err);
                        AttemptOutcome::Applied(machine.handle_error(&err, Instant::now()))
                    }
                }
            }
        };

        match outcome {
            AttemptOutcome::Applied(directive) => self.apply(directive).await,
            AttemptOutcome::Stale { standing_down } => {
                tracing::debug!("Discarding result of superseded reconnect ({})", trigger);
                if standing_down {
                    self.subscriptions.detach_all().await;
                }
            }
        }
    }

    fn timers(&self) -> MutexGuard<'_, TaskManager<TimerKind>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, kind: TimerKind, delay: Duration) {
        let task = self.timer_task(kind);
        self.timers().schedule(kind, delay, task);
    }

    fn timer_task(&self, kind: TimerKind) -> BoxFuture<'static, ()> {
        let client = self.clone();
        Box::pin(async move {
            match kind {
                TimerKind::Reconnect => {
                    client.reconnect_once(ReconnectTrigger::Backoff).await;
                    client.publish_status().await;
                }
                TimerKind::NetworkCheck => client.check_connection().await,
                TimerKind::Cooldown => client.on_cooldown_elapsed().await,
                TimerKind::Settle => client.on_settle_elapsed().await,
            }
        })
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("options", &self.options)
            .field("subscriptions", &self.subscriptions.topics())
            .finish()
    }
}
