use crate::types::constants::{collections, screens};
use serde::{Deserialize, Serialize};

/// The two independent unread counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeChannel {
    Notifications,
    Messages,
}

impl BadgeChannel {
    pub const ALL: [BadgeChannel; 2] = [BadgeChannel::Notifications, BadgeChannel::Messages];

    /// Screen on which this badge is hidden
    pub fn screen(&self) -> &'static str {
        match self {
            Self::Notifications => screens::NOTIFICATIONS,
            Self::Messages => screens::MESSAGES,
        }
    }

    /// Collection whose unseen documents this badge counts
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Notifications => collections::NOTIFICATIONS,
            Self::Messages => collections::MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BadgeCounts {
    pub notifications: u64,
    pub messages: u64,
}

impl BadgeCounts {
    pub fn get(&self, channel: BadgeChannel) -> u64 {
        match channel {
            BadgeChannel::Notifications => self.notifications,
            BadgeChannel::Messages => self.messages,
        }
    }

    fn slot(&mut self, channel: BadgeChannel) -> &mut u64 {
        match channel {
            BadgeChannel::Notifications => &mut self.notifications,
            BadgeChannel::Messages => &mut self.messages,
        }
    }
}

/// Per-session unread counters with screen-aware visibility.
#[derive(Debug, Clone, Default)]
pub struct BadgeCounters {
    counts: BadgeCounts,
    current_screen: Option<String>,
}

impl BadgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> BadgeCounts {
        self.counts
    }

    pub fn count(&self, channel: BadgeChannel) -> u64 {
        self.counts.get(channel)
    }

    /// The count to display: zero while the user is on the channel's own screen
    pub fn visible_count(&self, channel: BadgeChannel) -> u64 {
        if self.current_screen.as_deref() == Some(channel.screen()) {
            return 0;
        }
        self.counts.get(channel)
    }

    pub fn visible_counts(&self) -> BadgeCounts {
        BadgeCounts {
            notifications: self.visible_count(BadgeChannel::Notifications),
            messages: self.visible_count(BadgeChannel::Messages),
        }
    }

    pub fn current_screen(&self) -> Option<&str> {
        self.current_screen.as_deref()
    }

    pub fn set_current_screen(&mut self, screen: Option<String>) {
        self.current_screen = screen;
    }

    pub fn set(&mut self, channel: BadgeChannel, value: u64) {
        *self.counts.slot(channel) = value;
    }

    pub fn increase(&mut self, channel: BadgeChannel, amount: u64) {
        let slot = self.counts.slot(channel);
        *slot = slot.saturating_add(amount);
    }

    /// Never goes below zero
    pub fn decrease(&mut self, channel: BadgeChannel, amount: u64) {
        let slot = self.counts.slot(channel);
        *slot = slot.saturating_sub(amount);
    }

    pub fn clear(&mut self, channel: BadgeChannel) {
        self.set(channel, 0);
    }

    /// Zero both counters, keeping the current screen
    pub fn reset(&mut self) {
        self.counts = BadgeCounts::default();
    }
}
