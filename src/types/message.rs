use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::frame_types;
use super::error::RealtimeError;

/// A realtime event as delivered by the backend for a document channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RealtimeEvent {
    /// Fully qualified event names, e.g. `databases.main.collections.messages.documents.m1.create`
    #[serde(default)]
    pub events: Vec<String>,
    /// Channels this event was published on
    #[serde(default)]
    pub channels: Vec<String>,
    /// The document (or other resource) the event is about
    #[serde(default)]
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn new(events: Vec<String>, payload: Value) -> Self {
        Self {
            events,
            channels: Vec::new(),
            payload,
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }
}

/// Error frame body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

impl From<ServerError> for RealtimeError {
    fn from(err: ServerError) -> Self {
        RealtimeError::Backend {
            code: err.code,
            message: err.message,
        }
    }
}

/// Raw frame envelope: `{"type": "...", "data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }

    pub fn ping() -> Self {
        Self::new(frame_types::PING, Value::Null)
    }

    pub fn authentication(session: &str) -> Self {
        Self::new(
            frame_types::AUTHENTICATION,
            serde_json::json!({ "session": session }),
        )
    }
}

/// Typed view of an incoming frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Connected,
    Event(RealtimeEvent),
    Error(ServerError),
    Response(Value),
    Pong,
    Unknown(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let frame: Frame = serde_json::from_str(text)?;
        Ok(match frame.kind.as_str() {
            frame_types::CONNECTED => Self::Connected,
            frame_types::EVENT => Self::Event(serde_json::from_value(frame.data)?),
            frame_types::ERROR => Self::Error(serde_json::from_value(frame.data)?),
            frame_types::RESPONSE => Self::Response(frame.data),
            frame_types::PONG => Self::Pong,
            other => Self::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_frame() {
        let text = r#"{
            "type": "event",
            "data": {
                "events": ["databases.main.collections.messages.documents.m1.create"],
                "channels": ["databases.main.collections.messages.documents"],
                "timestamp": "2024-05-01T10:00:00.000+00:00",
                "payload": {"$id": "m1", "senderId": "u2", "receiverId": "u1", "isSeen": false}
            }
        }"#;

        match ServerFrame::parse(text).unwrap() {
            ServerFrame::Event(event) => {
                assert_eq!(event.events.len(), 1);
                assert_eq!(event.channels[0], "databases.main.collections.messages.documents");
                assert_eq!(event.payload["receiverId"], "u1");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            ServerFrame::parse(r#"{"type":"connected","data":{"channels":[],"user":null}}"#)
                .unwrap(),
            ServerFrame::Connected
        );
        assert_eq!(
            ServerFrame::parse(r#"{"type":"pong"}"#).unwrap(),
            ServerFrame::Pong
        );
        assert_eq!(
            ServerFrame::parse(r#"{"type":"telemetry","data":{}}"#).unwrap(),
            ServerFrame::Unknown("telemetry".to_string())
        );
    }

    #[test]
    fn test_error_frame_converts_to_backend_error() {
        let frame =
            ServerFrame::parse(r#"{"type":"error","data":{"code":1008,"message":"Missing channels"}}"#)
                .unwrap();
        let ServerFrame::Error(err) = frame else {
            panic!("expected error frame");
        };
        let err: RealtimeError = err.into();
        assert_eq!(err.to_string(), "Backend error (1008): Missing channels");
    }

    #[test]
    fn test_authentication_frame_shape() {
        let json = serde_json::to_value(Frame::authentication("secret")).unwrap();
        assert_eq!(json["type"], "authentication");
        assert_eq!(json["data"]["session"], "secret");
    }
}
