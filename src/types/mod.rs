pub mod constants;
pub mod error;
pub mod message;

pub use constants::*;
pub use error::{ErrorClass, RealtimeError, Result};
pub use message::{Frame, RealtimeEvent, ServerError, ServerFrame};
