//! Known peer devices and their liveness.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{ConnectedDevice, DeviceId, DeviceSyncStatus};
use crate::util::duration_to_ms;

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The write carried an older `last_seen` than the stored entry and was dropped
    Stale,
}

/// One entry per device id. `last_seen` is the logical clock for writes.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<DeviceId, ConnectedDevice>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a device on discovery or heartbeat.
    ///
    /// Writes older than the stored `last_seen` are rejected; equal clocks
    /// are accepted so a re-announce can update the name or online flag.
    pub fn upsert(&self, device: ConnectedDevice) -> UpsertOutcome {
        let mut devices = self.devices.write();
        match devices.get_mut(&device.device_id) {
            Some(existing) if device.last_seen < existing.last_seen => {
                tracing::debug!(
                    "Ignoring stale registry write for {} ({} < {})",
                    device.device_id,
                    device.last_seen,
                    existing.last_seen
                );
                UpsertOutcome::Stale
            }
            Some(existing) => {
                let sync_status = existing.sync_status;
                *existing = ConnectedDevice {
                    sync_status,
                    ..device
                };
                UpsertOutcome::Updated
            }
            None => {
                tracing::info!("Discovered device {} ({})", device.device_id, device.device_name);
                devices.insert(device.device_id.clone(), device);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Record a heartbeat, bringing the device back online
    pub fn heartbeat(&self, device_id: &DeviceId, at: i64) -> Result<UpsertOutcome> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
        if at < device.last_seen {
            return Ok(UpsertOutcome::Stale);
        }
        if !device.is_online {
            tracing::info!("Device {} is back online", device_id);
        }
        device.last_seen = at;
        device.is_online = true;
        Ok(UpsertOutcome::Updated)
    }

    /// Mark a device offline. History is kept for later reconciliation.
    pub fn mark_offline(&self, device_id: &DeviceId) -> Result<()> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
        if device.is_online {
            tracing::info!("Device {} went offline", device_id);
        }
        device.is_online = false;
        Ok(())
    }

    /// Mark every online device silent for longer than `liveness_window` as offline
    pub fn expire_stale(&self, now: i64, liveness_window: Duration) -> Vec<DeviceId> {
        let cutoff = now.saturating_sub(duration_to_ms(liveness_window));
        let mut devices = self.devices.write();
        let mut expired = Vec::new();
        for device in devices.values_mut() {
            if device.is_online && device.last_seen < cutoff {
                device.is_online = false;
                expired.push(device.device_id.clone());
            }
        }
        if !expired.is_empty() {
            tracing::info!("Marked {} silent device(s) offline", expired.len());
        }
        expired
    }

    /// Online devices, ordered by id
    pub fn reachable_devices(&self) -> Vec<ConnectedDevice> {
        self.devices
            .read()
            .values()
            .filter(|device| device.is_online)
            .cloned()
            .collect()
    }

    pub fn set_sync_status(&self, device_id: &DeviceId, status: DeviceSyncStatus) {
        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.sync_status = status;
        }
    }

    /// Refresh `last_seen` after a successful exchange without reviving offline devices
    pub fn touch(&self, device_id: &DeviceId, at: i64) {
        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.last_seen = device.last_seen.max(at);
        }
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<ConnectedDevice> {
        self.devices.read().get(device_id).cloned()
    }

    /// All known devices, online or not, ordered by id
    pub fn devices(&self) -> Vec<ConnectedDevice> {
        self.devices.read().values().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.devices
            .read()
            .values()
            .filter(|device| device.is_online)
            .count()
    }

    /// Drop a device entry. Callers must ensure nothing is pending for it.
    pub(crate) fn remove(&self, device_id: &DeviceId) -> Option<ConnectedDevice> {
        self.devices.write().remove(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceType;
    use pretty_assertions::assert_eq;

    fn device(id: &str, last_seen: i64) -> ConnectedDevice {
        ConnectedDevice::new(id, format!("{id} device"), DeviceType::Phone, last_seen)
    }

    #[test]
    fn upsert_keeps_one_entry_per_device() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.upsert(device("watch", 10)), UpsertOutcome::Inserted);
        assert_eq!(registry.upsert(device("watch", 20)), UpsertOutcome::Updated);
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.get(&"watch".into()).unwrap().last_seen, 20);
    }

    #[test]
    fn upsert_rejects_older_writes() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("watch", 20));

        let stale = ConnectedDevice {
            device_name: "renamed".to_string(),
            ..device("watch", 10)
        };
        assert_eq!(registry.upsert(stale), UpsertOutcome::Stale);

        let stored = registry.get(&"watch".into()).unwrap();
        assert_eq!(stored.last_seen, 20);
        assert_eq!(stored.device_name, "watch device");
    }

    #[test]
    fn upsert_preserves_sync_status() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("tablet", 1));
        registry.set_sync_status(&"tablet".into(), DeviceSyncStatus::Failed);
        registry.upsert(device("tablet", 2));
        assert_eq!(
            registry.get(&"tablet".into()).unwrap().sync_status,
            DeviceSyncStatus::Failed
        );
    }

    #[test]
    fn expire_stale_marks_silent_devices_offline() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("desktop", 1_000));
        registry.upsert(device("watch", 95_000));

        let expired = registry.expire_stale(100_000, Duration::from_secs(30));
        assert_eq!(expired, vec![DeviceId::new("desktop")]);

        let reachable = registry
            .reachable_devices()
            .into_iter()
            .map(|d| d.device_id)
            .collect::<Vec<_>>();
        assert_eq!(reachable, vec![DeviceId::new("watch")]);
        assert_eq!(registry.devices().len(), 2);
    }

    #[test]
    fn heartbeat_revives_offline_device() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("watch", 10));
        registry.mark_offline(&"watch".into()).unwrap();
        assert_eq!(registry.online_count(), 0);

        assert_eq!(
            registry.heartbeat(&"watch".into(), 5).unwrap(),
            UpsertOutcome::Stale
        );
        assert_eq!(registry.online_count(), 0);

        registry.heartbeat(&"watch".into(), 50).unwrap();
        assert_eq!(registry.online_count(), 1);
        assert!(registry.heartbeat(&"ghost".into(), 50).is_err());
    }
}
