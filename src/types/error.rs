use std::io::ErrorKind;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, error::ProtocolError};

/// Errors that can occur in the realtime layer.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket protocol error (connection failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Transport-level failure: disconnects, resets, unreachable hosts
    #[error("Network error: {0}")]
    Network(String),

    /// The platform reported the socket in an unusable state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The OS tore the underlying stream down (typically after suspension)
    #[error("Stream reset: {0}")]
    StreamReset(String),

    /// Error frame or error response reported by the backend
    #[error("Backend error ({code}): {message}")]
    Backend { code: u16, message: String },

    /// Invalid options or request
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (document store, push gateway)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error (malformed endpoint URL)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Operation timed out
    #[error("Timeout error")]
    Timeout,

    /// Attempted operation while not connected to the server
    #[error("Not connected")]
    NotConnected,
}

/// Retry eligibility of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Disconnect, reset, timeout: retried with backoff
    NetworkTransient,
    /// Invalid state or OS stream errors: full teardown and fresh start
    SystemLevel,
    /// Logged, connection marked down, no automatic retry
    Unclassified,
}

const SYSTEM_MARKERS: [&str; 4] = ["invalid state", "invalidstate", "stream end", "stream reset"];
const NETWORK_MARKERS: [&str; 10] = [
    "disconnect",
    "reset",
    "timeout",
    "timed out",
    "connection",
    "network",
    "unreachable",
    "lookup address",
    "name resolution",
    "dns",
];

impl RealtimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Timeout | Self::NotConnected => ErrorClass::NetworkTransient,
            Self::InvalidState(_) | Self::StreamReset(_) => ErrorClass::SystemLevel,
            Self::WebSocket(err) => classify_ws(err),
            Self::Http(err) if err.is_connect() || err.is_timeout() => {
                ErrorClass::NetworkTransient
            }
            Self::Backend { message, .. } => classify_message(message),
            _ => ErrorClass::Unclassified,
        }
    }

    pub fn is_network_transient(&self) -> bool {
        self.class() == ErrorClass::NetworkTransient
    }
}

fn classify_ws(err: &tungstenite::Error) -> ErrorClass {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ErrorClass::NetworkTransient
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ErrorClass::SystemLevel
        }
        tungstenite::Error::Io(io) => match io.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkDown => ErrorClass::NetworkTransient,
            // resolver failures arrive as `Other` with only a message
            _ => classify_message(&io.to_string()),
        },
        tungstenite::Error::Http(response) if response.status().is_server_error() => {
            ErrorClass::NetworkTransient
        }
        // TLS and other handshake failures only carry text
        other => classify_message(&other.to_string()),
    }
}

/// Classifies a free-text error message reported by the backend.
///
/// System markers are checked first: "stream reset" must not be mistaken for an ordinary
/// connection reset.
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if SYSTEM_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::SystemLevel
    } else if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::NetworkTransient
    } else {
        ErrorClass::Unclassified
    }
}

/// Convenience type alias for `Result<T, RealtimeError>`.
pub type Result<T> = std::result::Result<T, RealtimeError>;
