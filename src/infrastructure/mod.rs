// Infrastructure module - background services and adapters
pub mod http;
pub mod network;
pub mod task_manager;
pub mod timer;

pub use http::{ExpoPushNotifier, RestDocumentStore};
pub use network::{NetworkProbe, NetworkSnapshot, SharedNetworkProbe, Transport};
pub use task_manager::TaskManager;
pub use timer::Backoff;
