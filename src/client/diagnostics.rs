use super::connection::{ConnectionMachine, ConnectionPhase};
use super::lifecycle::AppLifecycleState;
use crate::infrastructure::NetworkSnapshot;
use serde::Serialize;
use tokio::time::Instant;

/// Which timer a pending task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Reconnect,
    NetworkCheck,
    Cooldown,
    Settle,
}

/// Read-only snapshot of the realtime layer for troubleshooting screens
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub app_state: AppLifecycleState,
    pub is_fully_disconnected: bool,
    pub is_in_cooldown: bool,
    pub cooldown_remaining_ms: Option<u64>,
    pub reconnect_in_progress: bool,
    pub network: NetworkSnapshot,
    pub active_subscriptions: Vec<String>,
    pub pending_timers: Vec<TimerKind>,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn capture(
        machine: &ConnectionMachine,
        active_subscriptions: Vec<String>,
        mut pending_timers: Vec<TimerKind>,
        now: Instant,
    ) -> Self {
        let state = machine.state();
        pending_timers.sort();
        Self {
            is_connected: state.phase == ConnectionPhase::Connected,
            phase: state.phase,
            reconnect_attempts: state.reconnect_attempts,
            max_reconnect_attempts: machine.max_attempts(),
            app_state: state.app_state,
            is_fully_disconnected: state.phase == ConnectionPhase::FullyDisconnected,
            is_in_cooldown: state.phase == ConnectionPhase::Cooldown,
            cooldown_remaining_ms: machine
                .cooldown_remaining(now)
                .map(|remaining| remaining.as_millis() as u64),
            reconnect_in_progress: state.reconnect_in_progress,
            network: state.last_network,
            active_subscriptions,
            pending_timers,
            last_error: state.last_error.clone(),
        }
    }

    /// Human-facing summary for the connection banner
    pub fn banner(&self) -> StatusBanner {
        if !self.app_state.is_active() {
            return StatusBanner::new(
                BannerKind::Backgrounded,
                "Live updates paused while the app is in the background",
                false,
            );
        }

        match self.phase {
            ConnectionPhase::Connected => {
                StatusBanner::new(BannerKind::Healthy, "Live updates active", false)
            }
            ConnectionPhase::Connecting => {
                StatusBanner::new(BannerKind::Reconnecting, "Connecting…", false)
            }
            ConnectionPhase::Reconnecting => StatusBanner::new(
                BannerKind::Reconnecting,
                format!(
                    "Reconnecting… (attempt {} of {})",
                    self.reconnect_attempts, self.max_reconnect_attempts
                ),
                true,
            ),
            ConnectionPhase::Cooldown => {
                let minutes = self
                    .cooldown_remaining_ms
                    .map(|ms| ms.div_ceil(60_000))
                    .unwrap_or(0);
                StatusBanner::new(
                    BannerKind::Degraded,
                    format!(
                        "Connection unstable. Retrying automatically in {} min",
                        minutes
                    ),
                    true,
                )
            }
            ConnectionPhase::FullyDisconnected => StatusBanner::new(
                BannerKind::Degraded,
                "Restoring live updates…",
                true,
            ),
            ConnectionPhase::Disconnected if !self.network.is_usable() => StatusBanner::new(
                BannerKind::Degraded,
                "No internet connection",
                true,
            ),
            ConnectionPhase::Disconnected if self.last_error.is_some() => StatusBanner::new(
                BannerKind::Degraded,
                "Live updates unavailable. Tap to reconnect",
                true,
            ),
            ConnectionPhase::Disconnected => {
                StatusBanner::new(BannerKind::Healthy, "Live updates idle", false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerKind {
    Healthy,
    Reconnecting,
    Degraded,
    Backgrounded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBanner {
    pub kind: BannerKind,
    pub message: String,
    /// Whether a manual retry affordance makes sense
    pub can_retry: bool,
}

impl StatusBanner {
    fn new(kind: BannerKind, message: impl Into<String>, can_retry: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            can_retry,
        }
    }
}
