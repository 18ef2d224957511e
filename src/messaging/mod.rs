// Messaging module - event classification and payload normalization
pub mod event;
pub mod record;

pub use event::{ChangeEvent, EventKind};
pub use record::{DocumentRecord, extract_id};
