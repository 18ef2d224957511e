use super::record::DocumentRecord;
use crate::types::constants::event_actions;
use crate::types::RealtimeEvent;
use serde::{Deserialize, Serialize};

/// What happened to the document an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    /// No action segment, or conflicting ones: callers should resync instead of guessing
    Unknown,
}

impl EventKind {
    /// Parse the trailing action segment of a single event name
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name.rsplit('.').next()? {
            event_actions::CREATE => Some(Self::Create),
            event_actions::UPDATE => Some(Self::Update),
            event_actions::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    /// Classify an event from all of its names.
    ///
    /// The backend lists the same occurrence under several wildcard names, some of which carry
    /// no action segment. Those are skipped. Exactly one distinct action is required.
    pub fn classify(events: &[String]) -> Self {
        let mut found: Option<Self> = None;
        for kind in events.iter().filter_map(|name| Self::from_event_name(name)) {
            match found {
                None => found = Some(kind),
                Some(existing) if existing == kind => {}
                Some(_) => return Self::Unknown,
            }
        }
        found.unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => event_actions::CREATE,
            Self::Update => event_actions::UPDATE,
            Self::Delete => event_actions::DELETE,
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A backend event after classification and normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub record: DocumentRecord,
    pub events: Vec<String>,
    pub channels: Vec<String>,
}

impl ChangeEvent {
    pub fn from_event(event: RealtimeEvent) -> Self {
        Self {
            kind: EventKind::classify(&event.events),
            record: DocumentRecord::from_payload(&event.payload),
            events: event.events,
            channels: event.channels,
        }
    }

    /// Whether this event announces a new, unseen document addressed to `user_id`
    pub fn is_unseen_create_for(&self, user_id: &str) -> bool {
        self.kind == EventKind::Create
            && !self.record.is_seen
            && self.record.receiver_id.as_deref() == Some(user_id)
    }
}
