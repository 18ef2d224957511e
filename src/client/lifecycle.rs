use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Foreground state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycleState {
    #[default]
    Active,
    Background,
    Inactive,
}

impl AppLifecycleState {
    pub fn is_active(&self) -> bool {
        *self == Self::Active
    }
}

/// What the connection layer should do about a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleDirective {
    /// Left the foreground: stop timers, keep subscriptions
    Pause,
    /// Back in the foreground after a short absence
    Resume { inactive_for: Duration },
    /// Back in the foreground after long enough that the process was likely suspended
    SystemWake { inactive_for: Duration },
    Ignore,
}

/// Maps foreground/background transitions to pause/resume/wake directives
#[derive(Debug, Clone)]
pub struct LifecycleBridge {
    current: AppLifecycleState,
    inactive_since: Option<Instant>,
    wake_threshold: Duration,
}

impl LifecycleBridge {
    pub fn new(wake_threshold: Duration) -> Self {
        Self {
            current: AppLifecycleState::Active,
            inactive_since: None,
            wake_threshold,
        }
    }

    pub fn current(&self) -> AppLifecycleState {
        self.current
    }

    pub fn transition(&mut self, next: AppLifecycleState, now: Instant) -> LifecycleDirective {
        let previous = std::mem::replace(&mut self.current, next);
        if previous == next {
            return LifecycleDirective::Ignore;
        }

        match (previous.is_active(), next.is_active()) {
            (true, false) => {
                self.inactive_since = Some(now);
                LifecycleDirective::Pause
            }
            (false, true) => {
                let inactive_for = self
                    .inactive_since
                    .take()
                    .map(|since| now.saturating_duration_since(since))
                    .unwrap_or_default();
                if inactive_for > self.wake_threshold {
                    LifecycleDirective::SystemWake { inactive_for }
                } else {
                    LifecycleDirective::Resume { inactive_for }
                }
            }
            // Background <-> Inactive keeps the original timestamp
            _ => LifecycleDirective::Ignore,
        }
    }
}
