// Module declarations
mod backend;
mod factory;

// Public API exports
pub use backend::SocketBackend;
pub use factory::{WebSocketFactory, WsStream};
