//! Peer exchange seam.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::{ConnectedDevice, DeviceId, SyncChange};

/// Moves changes between this device and one peer.
///
/// Implementations own encryption and framing. Dropping the returned future
/// must abandon the exchange without side effects on the local side.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `outgoing` to `device` and return the changes it has for us
    async fn exchange(
        &self,
        device: &ConnectedDevice,
        outgoing: Vec<SyncChange>,
    ) -> Result<Vec<SyncChange>>;
}

#[derive(Debug, Default)]
struct LoopbackPeer {
    outbox: Vec<SyncChange>,
    inbox: Vec<SyncChange>,
    failure: Option<String>,
    delay: Option<Duration>,
    exchanges: usize,
}

/// In-memory transport for tests and the simulator.
///
/// Each peer holds an outbox returned on every exchange and an inbox of what
/// it received. Failures and delays can be scripted per peer.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    peers: Mutex<BTreeMap<DeviceId, LoopbackPeer>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, keeping any existing state
    pub fn add_peer(&self, device_id: impl Into<DeviceId>) {
        self.peers.lock().entry(device_id.into()).or_default();
    }

    /// Queue a change the peer will hand over on its next exchanges
    pub fn queue(&self, device_id: impl Into<DeviceId>, change: SyncChange) {
        self.peers
            .lock()
            .entry(device_id.into())
            .or_default()
            .outbox
            .push(change);
    }

    /// Make every exchange with the peer fail until cleared with `None`
    pub fn set_failure(&self, device_id: impl Into<DeviceId>, failure: Option<&str>) {
        self.peers
            .lock()
            .entry(device_id.into())
            .or_default()
            .failure = failure.map(str::to_string);
    }

    /// Delay every exchange with the peer
    pub fn set_delay(&self, device_id: impl Into<DeviceId>, delay: Option<Duration>) {
        self.peers.lock().entry(device_id.into()).or_default().delay = delay;
    }

    /// Changes the peer received so far, in arrival order
    pub fn received(&self, device_id: &DeviceId) -> Vec<SyncChange> {
        self.peers
            .lock()
            .get(device_id)
            .map(|peer| peer.inbox.clone())
            .unwrap_or_default()
    }

    /// Completed exchanges with the peer
    pub fn exchange_count(&self, device_id: &DeviceId) -> usize {
        self.peers
            .lock()
            .get(device_id)
            .map_or(0, |peer| peer.exchanges)
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn exchange(
        &self,
        device: &ConnectedDevice,
        outgoing: Vec<SyncChange>,
    ) -> Result<Vec<SyncChange>> {
        let delay = {
            let peers = self.peers.lock();
            let peer = peers
                .get(&device.device_id)
                .ok_or_else(|| Error::DeviceUnreachable {
                    device_id: device.device_id.clone(),
                    reason: "no route to peer".to_string(),
                })?;
            peer.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut peers = self.peers.lock();
        let peer = peers
            .get_mut(&device.device_id)
            .ok_or_else(|| Error::DeviceUnreachable {
                device_id: device.device_id.clone(),
                reason: "peer went away".to_string(),
            })?;
        if let Some(reason) = &peer.failure {
            return Err(Error::DeviceUnreachable {
                device_id: device.device_id.clone(),
                reason: reason.clone(),
            });
        }

        for change in outgoing {
            if !peer.inbox.iter().any(|known| known.id == change.id) {
                peer.inbox.push(change);
            }
        }
        peer.exchanges += 1;
        Ok(peer.outbox.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeOperation, DeviceType};

    fn device(id: &str) -> ConnectedDevice {
        ConnectedDevice::new(id, id, DeviceType::Tablet, 0)
    }

    fn change(device: &str) -> SyncChange {
        SyncChange::new(
            "heart_rate",
            "hr-1",
            ChangeOperation::Create,
            DeviceId::new(device),
            "72",
        )
    }

    #[tokio::test]
    async fn exchange_swaps_changes() {
        let transport = LoopbackTransport::new();
        let incoming = change("tablet");
        transport.queue("tablet", incoming.clone());

        let outgoing = change("phone");
        let received = transport
            .exchange(&device("tablet"), vec![outgoing.clone(), outgoing.clone()])
            .await
            .unwrap();

        assert_eq!(received, vec![incoming]);
        assert_eq!(transport.received(&"tablet".into()), vec![outgoing]);
        assert_eq!(transport.exchange_count(&"tablet".into()), 1);
    }

    #[tokio::test]
    async fn scripted_failure_and_unknown_peer_are_unreachable() {
        let transport = LoopbackTransport::new();
        transport.set_failure("watch", Some("bluetooth off"));

        let error = transport
            .exchange(&device("watch"), Vec::new())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("bluetooth off"));
        assert!(transport.exchange(&device("ghost"), Vec::new()).await.is_err());
        assert_eq!(transport.exchange_count(&"watch".into()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_observed() {
        let transport = LoopbackTransport::new();
        transport.set_delay("desktop", Some(Duration::from_secs(5)));

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            transport.exchange(&device("desktop"), Vec::new()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(transport.exchange_count(&"desktop".into()), 0);
    }
}
