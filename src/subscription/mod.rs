// Module declarations
mod entry;
mod manager;

// Public API exports
pub use entry::{
    ErrorCallback, EventCallback, SubscribeRequest, SubscriptionHandle, event_callback,
};
pub use manager::SubscriptionManager;
