//! Peer device model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Device form factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Phone,
    Tablet,
    Watch,
    Desktop,
    #[default]
    Other,
}

impl DeviceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Watch => "watch",
            Self::Desktop => "desktop",
            Self::Other => "other",
        }
    }
}

/// Per-device exchange state, mirrored from the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSyncStatus {
    /// Never exchanged, or waiting for the next cycle
    #[default]
    Idle,
    /// Exchange in flight
    Syncing,
    /// Last exchange completed
    Synced,
    /// Last exchange failed; retried next cycle
    Failed,
}

/// A known peer device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub device_id: DeviceId,
    /// Human readable name (e.g. "Ana's Watch")
    pub device_name: String,
    pub device_type: DeviceType,
    /// Result of the last liveness probe
    pub is_online: bool,
    /// Last heartbeat (Unix ms), also the logical clock for upserts
    pub last_seen: i64,
    pub sync_status: DeviceSyncStatus,
}

impl ConnectedDevice {
    /// A freshly discovered, online device
    #[must_use]
    pub fn new(
        device_id: impl Into<DeviceId>,
        device_name: impl Into<String>,
        device_type: DeviceType,
        last_seen: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
            is_online: true,
            last_seen,
            sync_status: DeviceSyncStatus::Idle,
        }
    }

    #[must_use]
    pub const fn offline(mut self) -> Self {
        self.is_online = false;
        self
    }
}

/// Identity of the device the engine runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDevice {
    pub device_id: DeviceId,
    pub device_name: String,
    pub device_type: DeviceType,
}

impl LocalDevice {
    #[must_use]
    pub fn new(
        device_id: impl Into<DeviceId>,
        device_name: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_devices_start_online_and_idle() {
        let device = ConnectedDevice::new("tablet-1", "Kitchen iPad", DeviceType::Tablet, 10);
        assert!(device.is_online);
        assert_eq!(device.sync_status, DeviceSyncStatus::Idle);
        assert!(!device.offline().is_online);
    }

    #[test]
    fn device_id_serializes_transparently() {
        let json = serde_json::to_string(&DeviceId::new("watch")).unwrap();
        assert_eq!(json, "\"watch\"");
    }
}
