use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Physical transport reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Point-in-time connectivity answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub connected: bool,
    /// `None` when the platform has not finished its reachability probe
    pub internet_reachable: Option<bool>,
    pub transport: Transport,
}

impl NetworkSnapshot {
    pub fn online(transport: Transport) -> Self {
        Self {
            connected: true,
            internet_reachable: Some(true),
            transport,
        }
    }

    pub fn offline() -> Self {
        Self {
            connected: false,
            internet_reachable: Some(false),
            transport: Transport::Unknown,
        }
    }

    /// Connected, and reachability not known to be false
    pub fn is_usable(&self) -> bool {
        self.connected && self.internet_reachable != Some(false)
    }
}

/// Source of connectivity information.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn snapshot(&self) -> NetworkSnapshot;
}

/// Probe fed by platform connectivity callbacks.
///
/// The platform layer calls [`set`](Self::set) whenever its connectivity listener fires; the
/// realtime layer reads the latest value.
pub struct SharedNetworkProbe {
    tx: watch::Sender<NetworkSnapshot>,
}

impl SharedNetworkProbe {
    pub fn new(initial: NetworkSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, snapshot: NetworkSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn current(&self) -> NetworkSnapshot {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<NetworkSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for SharedNetworkProbe {
    fn default() -> Self {
        Self::new(NetworkSnapshot::online(Transport::Unknown))
    }
}

#[async_trait]
impl NetworkProbe for SharedNetworkProbe {
    async fn snapshot(&self) -> NetworkSnapshot {
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_when_reachability_unknown() {
        let snapshot = NetworkSnapshot {
            connected: true,
            internet_reachable: None,
            transport: Transport::Cellular,
        };
        assert!(snapshot.is_usable());
    }

    #[test]
    fn test_not_usable_when_unreachable() {
        let captive = NetworkSnapshot {
            connected: true,
            internet_reachable: Some(false),
            transport: Transport::Wifi,
        };
        assert!(!captive.is_usable());
        assert!(!NetworkSnapshot::offline().is_usable());
    }

    #[tokio::test]
    async fn test_shared_probe_reports_latest() {
        let probe = SharedNetworkProbe::new(NetworkSnapshot::offline());
        let mut rx = probe.watch();
        assert!(!probe.snapshot().await.is_usable());

        probe.set(NetworkSnapshot::online(Transport::Wifi));
        assert!(rx.has_changed().unwrap());
        assert_eq!(probe.snapshot().await.transport, Transport::Wifi);
    }
}
