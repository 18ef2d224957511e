// Module declarations
mod builder;
mod connection;
mod core;
pub mod diagnostics;
mod lifecycle;

// Public API exports
pub use builder::{RealtimeClientBuilder, RealtimeClientOptions};
pub use connection::{
    AttemptGate, ConnectionMachine, ConnectionPhase, ConnectionState, Directive, NetworkChange,
};
pub use self::core::{RealtimeClient, ReconnectTrigger};
pub use diagnostics::{BannerKind, ConnectionStatus, StatusBanner, TimerKind};
pub use lifecycle::{AppLifecycleState, LifecycleBridge, LifecycleDirective};
