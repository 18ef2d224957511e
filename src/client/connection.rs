use super::RealtimeClientOptions;
use super::lifecycle::{AppLifecycleState, LifecycleBridge, LifecycleDirective};
use crate::infrastructure::{Backoff, NetworkSnapshot};
use crate::types::{ErrorClass, RealtimeError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Everything torn down after a system wake or system-level error
    FullyDisconnected,
    /// Attempt budget exhausted; standing down
    Cooldown,
}

/// Connection facts tracked by the state machine
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    pub last_network: NetworkSnapshot,
    pub app_state: AppLifecycleState,
    pub last_activity: Instant,
    pub reconnect_in_progress: bool,
    /// A backoff retry has been handed out and not yet started
    pub retry_scheduled: bool,
    pub cooldown_until: Option<Instant>,
    pub last_error: Option<String>,
}

impl ConnectionState {
    fn new(now: Instant) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            reconnect_attempts: 0,
            last_network: NetworkSnapshot::default(),
            app_state: AppLifecycleState::Active,
            last_activity: now,
            reconnect_in_progress: false,
            retry_scheduled: false,
            cooldown_until: None,
            last_error: None,
        }
    }
}

/// Follow-up work the driver has to carry out after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    ScheduleReconnect(Duration),
    StartCooldown(Duration),
    /// Tear down every backend subscription, then settle
    FullReset,
}

/// Whether a reconnect attempt may start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptGate {
    /// Go ahead; report back with this epoch
    Proceed(u64),
    Paused,
    Blocked(ConnectionPhase),
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkChange {
    Restored,
    Lost,
    Unchanged,
}

/// Reconnect/backoff state machine.
///
/// Pure and synchronous: timestamps are passed in and follow-up work is returned as a
/// [`Directive`], so every transition can be exercised without a runtime driving timers.
/// The epoch increases on every hard reset so results of attempts started before the reset
/// are recognised as stale.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    lifecycle: LifecycleBridge,
    backoff: Backoff,
    max_attempts: u32,
    cooldown: Duration,
    epoch: u64,
}

impl ConnectionMachine {
    pub fn new(options: &RealtimeClientOptions, now: Instant) -> Self {
        Self {
            state: ConnectionState::new(now),
            lifecycle: LifecycleBridge::new(options.wake_threshold()),
            backoff: Backoff::new(
                Duration::from_millis(options.base_delay),
                Duration::from_millis(options.max_delay),
                Duration::from_millis(options.max_jitter),
            ),
            max_attempts: options.max_reconnect_attempts,
            cooldown: options.cooldown_duration(),
            epoch: 0,
        }
    }

    /// Back to a fresh `Disconnected` state, keeping what is known about the platform
    pub fn reset(&mut self, now: Instant) {
        let network = self.state.last_network;
        let app_state = self.state.app_state;
        self.state = ConnectionState::new(now);
        self.state.last_network = network;
        self.state.app_state = app_state;
        self.epoch += 1;
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_paused(&self) -> bool {
        !self.state.app_state.is_active()
    }

    /// Whether new backend subscriptions may be opened right now
    pub fn accepts_attach(&self) -> bool {
        !matches!(
            self.state.phase,
            ConnectionPhase::FullyDisconnected | ConnectionPhase::Cooldown
        )
    }

    pub fn begin_connecting(&mut self) -> bool {
        if self.state.phase == ConnectionPhase::Disconnected {
            self.state.phase = ConnectionPhase::Connecting;
            return true;
        }
        false
    }

    /// A backend channel acknowledged or delivered an event
    pub fn mark_connected(&mut self) -> bool {
        if self.state.phase == ConnectionPhase::FullyDisconnected {
            return false;
        }
        let changed = self.state.phase != ConnectionPhase::Connected;
        self.state.phase = ConnectionPhase::Connected;
        self.state.reconnect_attempts = 0;
        self.state.retry_scheduled = false;
        self.state.cooldown_until = None;
        self.state.last_error = None;
        if changed {
            tracing::info!("Realtime connection established");
        }
        changed
    }

    /// Nothing is subscribed: no connection to keep
    pub fn mark_idle(&mut self) {
        if self.state.phase != ConnectionPhase::FullyDisconnected {
            self.state.phase = ConnectionPhase::Disconnected;
            self.state.reconnect_attempts = 0;
            self.state.retry_scheduled = false;
            self.state.cooldown_until = None;
        }
    }

    pub fn handle_error(&mut self, err: &RealtimeError, now: Instant) -> Directive {
        self.state.last_error = Some(err.to_string());
        let class = err.class();

        match (class, self.state.phase) {
            (ErrorClass::SystemLevel, ConnectionPhase::FullyDisconnected) => Directive::None,
            (ErrorClass::SystemLevel, _) => {
                tracing::warn!("System-level realtime error, resetting: {}", err);
                self.enter_fully_disconnected();
                Directive::FullReset
            }
            (_, ConnectionPhase::FullyDisconnected | ConnectionPhase::Cooldown) => {
                tracing::debug!("Ignoring error while standing down: {}", err);
                Directive::None
            }
            // same outage seen by another channel: one retry already covers it
            (ErrorClass::NetworkTransient, ConnectionPhase::Reconnecting)
                if self.state.retry_scheduled || self.state.reconnect_in_progress =>
            {
                tracing::debug!("Reconnect already pending, not counting: {}", err);
                Directive::None
            }
            (ErrorClass::NetworkTransient, _) => {
                self.state.reconnect_attempts =
                    (self.state.reconnect_attempts + 1).min(self.max_attempts);
                let attempts = self.state.reconnect_attempts;

                if attempts >= self.max_attempts {
                    tracing::warn!(
                        "Reconnect budget of {} attempts exhausted, cooling down for {:?}",
                        self.max_attempts,
                        self.cooldown
                    );
                    self.state.phase = ConnectionPhase::Cooldown;
                    self.state.retry_scheduled = false;
                    self.state.cooldown_until = Some(now + self.cooldown);
                    Directive::StartCooldown(self.cooldown)
                } else {
                    let delay = self.backoff.delay(attempts);
                    tracing::info!(
                        "Network error ({}), reconnect attempt {}/{} in {:?}",
                        err,
                        attempts,
                        self.max_attempts,
                        delay
                    );
                    self.state.phase = ConnectionPhase::Reconnecting;
                    self.state.retry_scheduled = true;
                    Directive::ScheduleReconnect(delay)
                }
            }
            (ErrorClass::Unclassified, _) => {
                tracing::error!("Realtime error, connection marked down: {}", err);
                self.state.phase = ConnectionPhase::Disconnected;
                Directive::None
            }
        }
    }

    pub fn begin_attempt(&mut self, now: Instant) -> AttemptGate {
        if self.is_paused() {
            return AttemptGate::Paused;
        }
        let phase = self.state.phase;
        match phase {
            ConnectionPhase::FullyDisconnected => {
                return AttemptGate::Blocked(ConnectionPhase::FullyDisconnected);
            }
            ConnectionPhase::Cooldown if !self.cooldown_expired(now) => {
                return AttemptGate::Blocked(ConnectionPhase::Cooldown);
            }
            _ => {}
        }
        if self.state.reconnect_in_progress {
            return AttemptGate::InFlight;
        }

        self.state.reconnect_in_progress = true;
        self.state.retry_scheduled = false;
        self.begin_connecting();
        AttemptGate::Proceed(self.epoch)
    }

    /// Release the in-flight guard; false when the attempt belongs to an older epoch
    pub fn finish_attempt(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.state.reconnect_in_progress = false;
        true
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        match (self.state.phase, self.state.cooldown_until) {
            (ConnectionPhase::Cooldown, Some(until)) => Some(until.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Leave `Cooldown` once its window has passed
    pub fn cooldown_expired(&mut self, now: Instant) -> bool {
        if self.state.phase != ConnectionPhase::Cooldown {
            return false;
        }
        if self.state.cooldown_until.is_some_and(|until| until > now) {
            return false;
        }
        tracing::info!("Cooldown elapsed, reconnect attempts resume");
        self.state.phase = ConnectionPhase::Disconnected;
        self.state.reconnect_attempts = 0;
        self.state.retry_scheduled = false;
        self.state.cooldown_until = None;
        true
    }

    pub fn enter_fully_disconnected(&mut self) {
        self.state.phase = ConnectionPhase::FullyDisconnected;
        self.state.reconnect_attempts = 0;
        self.state.reconnect_in_progress = false;
        self.state.retry_scheduled = false;
        self.state.cooldown_until = None;
        self.epoch += 1;
    }

    /// Leave `FullyDisconnected` once the network is confirmed
    pub fn settle_complete(&mut self, network: NetworkSnapshot) -> bool {
        self.state.last_network = network;
        if self.state.phase != ConnectionPhase::FullyDisconnected || !network.is_usable() {
            return false;
        }
        self.state.phase = ConnectionPhase::Disconnected;
        true
    }

    /// Manual override: drop cooldown and attempt budget, invalidate in-flight attempts
    pub fn force_reconnect(&mut self) {
        self.epoch += 1;
        self.state.phase = ConnectionPhase::Disconnected;
        self.state.reconnect_attempts = 0;
        self.state.reconnect_in_progress = false;
        self.state.retry_scheduled = false;
        self.state.cooldown_until = None;
        self.state.last_error = None;
    }

    pub fn record_network(&mut self, snapshot: NetworkSnapshot) -> NetworkChange {
        let was_usable = self.state.last_network.is_usable();
        self.state.last_network = snapshot;
        match (was_usable, snapshot.is_usable()) {
            (false, true) => NetworkChange::Restored,
            (true, false) => NetworkChange::Lost,
            _ => NetworkChange::Unchanged,
        }
    }

    pub fn lifecycle_transition(
        &mut self,
        next: AppLifecycleState,
        now: Instant,
    ) -> LifecycleDirective {
        let directive = self.lifecycle.transition(next, now);
        self.state.app_state = next;
        if next.is_active() {
            self.state.last_activity = now;
        }
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::Transport;

    fn machine() -> ConnectionMachine {
        let options = RealtimeClientOptions {
            max_jitter: 0,
            ..Default::default()
        };
        ConnectionMachine::new(&options, Instant::now())
    }

    fn network_error() -> RealtimeError {
        RealtimeError::Network("connection reset".to_string())
    }

    /// Run one reconnect attempt that fails with a network error
    fn fail_attempt(m: &mut ConnectionMachine, now: Instant) -> Directive {
        let AttemptGate::Proceed(epoch) = m.begin_attempt(now) else {
            panic!("attempt should proceed");
        };
        assert!(m.finish_attempt(epoch));
        m.handle_error(&network_error(), now)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_transient_errors_back_off() {
        let mut m = machine();
        let now = Instant::now();

        assert!(m.begin_connecting());
        assert!(m.mark_connected());
        assert_eq!(m.phase(), ConnectionPhase::Connected);

        assert_eq!(
            m.handle_error(&network_error(), now),
            Directive::ScheduleReconnect(Duration::from_secs(3))
        );
        assert_eq!(m.phase(), ConnectionPhase::Reconnecting);
        assert_eq!(
            fail_attempt(&mut m, now),
            Directive::ScheduleReconnect(Duration::from_secs(6))
        );
        assert_eq!(m.state().reconnect_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_during_pending_retry_are_not_counted() {
        let mut m = machine();
        let now = Instant::now();
        m.mark_connected();

        // two channels drop in the same outage
        assert_eq!(
            m.handle_error(&network_error(), now),
            Directive::ScheduleReconnect(Duration::from_secs(3))
        );
        assert_eq!(m.handle_error(&network_error(), now), Directive::None);
        assert_eq!(m.state().reconnect_attempts, 1);
        assert!(m.state().last_error.is_some());

        // a late error while the retry runs is absorbed too
        let AttemptGate::Proceed(epoch) = m.begin_attempt(now) else {
            panic!("retry should proceed");
        };
        assert_eq!(m.handle_error(&network_error(), now), Directive::None);
        assert!(m.finish_attempt(epoch));
        assert_eq!(m.state().reconnect_attempts, 1);

        // the failed retry itself counts
        assert_eq!(
            m.handle_error(&network_error(), now),
            Directive::ScheduleReconnect(Duration::from_secs(6))
        );
        assert_eq!(m.state().reconnect_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_enters_cooldown() {
        let mut m = machine();
        let now = Instant::now();

        m.handle_error(&network_error(), now);
        fail_attempt(&mut m, now);
        assert_eq!(
            fail_attempt(&mut m, now),
            Directive::StartCooldown(Duration::from_secs(300))
        );
        assert_eq!(m.phase(), ConnectionPhase::Cooldown);
        assert_eq!(m.state().reconnect_attempts, 3);

        // further errors never push the counter past the budget
        assert_eq!(m.handle_error(&network_error(), now), Directive::None);
        assert_eq!(m.state().reconnect_attempts, 3);

        assert_eq!(
            m.begin_attempt(now + Duration::from_secs(299)),
            AttemptGate::Blocked(ConnectionPhase::Cooldown)
        );
        assert!(matches!(
            m.begin_attempt(now + Duration::from_secs(300)),
            AttemptGate::Proceed(_)
        ));
        assert_eq!(m.state().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_error_forces_full_reset() {
        let mut m = machine();
        let now = Instant::now();
        m.mark_connected();

        let directive = m.handle_error(&RealtimeError::InvalidState("closing".into()), now);
        assert_eq!(directive, Directive::FullReset);
        assert_eq!(m.phase(), ConnectionPhase::FullyDisconnected);
        assert!(!m.accepts_attach());
        assert!(!m.mark_connected(), "stale acks are ignored while torn down");

        assert!(!m.settle_complete(NetworkSnapshot::offline()));
        assert!(m.settle_complete(NetworkSnapshot::online(Transport::Wifi)));
        assert_eq!(m.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_marks_down_without_retry() {
        let mut m = machine();
        m.mark_connected();
        let err = RealtimeError::Backend {
            code: 401,
            message: "Unauthorized".to_string(),
        };

        assert_eq!(m.handle_error(&err, Instant::now()), Directive::None);
        assert_eq!(m.phase(), ConnectionPhase::Disconnected);
        assert_eq!(m.state().reconnect_attempts, 0);
        assert!(m.state().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_in_flight() {
        let mut m = machine();
        let now = Instant::now();

        let AttemptGate::Proceed(epoch) = m.begin_attempt(now) else {
            panic!("first attempt should proceed");
        };
        assert_eq!(m.begin_attempt(now), AttemptGate::InFlight);
        assert!(m.finish_attempt(epoch));
        assert!(matches!(m.begin_attempt(now), AttemptGate::Proceed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_invalidates_in_flight_attempt() {
        let mut m = machine();
        let now = Instant::now();
        m.handle_error(&network_error(), now);
        fail_attempt(&mut m, now);
        fail_attempt(&mut m, now);
        assert_eq!(m.phase(), ConnectionPhase::Cooldown);

        m.force_reconnect();
        let AttemptGate::Proceed(epoch) = m.begin_attempt(now) else {
            panic!("forced attempt should bypass cooldown");
        };
        m.force_reconnect();
        assert!(!m.finish_attempt(epoch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_while_backgrounded() {
        let mut m = machine();
        let now = Instant::now();

        assert_eq!(
            m.lifecycle_transition(AppLifecycleState::Background, now),
            LifecycleDirective::Pause
        );
        assert_eq!(m.begin_attempt(now), AttemptGate::Paused);

        let later = now + Duration::from_secs(2);
        m.lifecycle_transition(AppLifecycleState::Active, later);
        assert_eq!(m.state().last_activity, later);
        assert!(matches!(m.begin_attempt(later), AttemptGate::Proceed(_)));
    }

    #[test]
    fn test_network_change_detection() {
        let mut m = ConnectionMachine::new(&RealtimeClientOptions::default(), Instant::now());
        assert_eq!(
            m.record_network(NetworkSnapshot::online(Transport::Wifi)),
            NetworkChange::Restored
        );
        assert_eq!(
            m.record_network(NetworkSnapshot::online(Transport::Cellular)),
            NetworkChange::Unchanged
        );
        assert_eq!(
            m.record_network(NetworkSnapshot::offline()),
            NetworkChange::Lost
        );
    }
}
