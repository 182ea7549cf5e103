//! Connectivity classification and the sync gate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::util::unix_timestamp_ms;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Current connectivity as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[serde(rename = "wifi")]
    WiFi,
    Cellular,
    /// Connected over a link the platform did not classify
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

impl NetworkStatus {
    /// Whether a new exchange may start
    #[must_use]
    pub const fn allows_sync(self) -> bool {
        matches!(self, Self::WiFi | Self::Cellular | Self::Connected)
    }

    /// Whether an exchange already in flight must be aborted.
    ///
    /// `Unknown` blocks new cycles but leaves established exchanges alone.
    #[must_use]
    pub const fn aborts_in_flight(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WiFi => "wifi",
            Self::Cellular => "cellular",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Unknown => "unknown",
        }
    }
}

/// A status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    /// Unix ms
    pub timestamp: i64,
}

/// Platform reachability source (implemented per OS)
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// Current status as the platform sees it
    async fn current_status(&self) -> NetworkStatus;

    /// Start emitting status transitions
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;
}

/// Holds the current status and fans out transitions.
///
/// The coordinator watches the status channel for gating; observers take
/// the event stream.
#[derive(Debug)]
pub struct NetworkMonitor {
    status: watch::Sender<NetworkStatus>,
    events: broadcast::Sender<NetworkStatusEvent>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Unknown)
    }
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { status, events }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn allows_sync(&self) -> bool {
        self.status().allows_sync()
    }

    /// Update the status. Returns `true` when it actually changed.
    pub fn set_status(&self, new_status: NetworkStatus) -> bool {
        let mut old_status = new_status;
        let changed = self.status.send_if_modified(|current| {
            if *current == new_status {
                return false;
            }
            old_status = *current;
            *current = new_status;
            true
        });

        if changed {
            tracing::info!(
                "Network status changed: {} -> {}",
                old_status.as_str(),
                new_status.as_str()
            );
            let _ = self.events.send(NetworkStatusEvent {
                old_status,
                new_status,
                timestamp: unix_timestamp_ms(),
            });
        }
        changed
    }

    /// Stream of transitions
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.events.subscribe()
    }

    /// Latest-value channel, for gating
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Seed from a platform listener and forward its transitions
    pub async fn attach(
        self: &Arc<Self>,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<JoinHandle<()>> {
        self.set_status(listener.current_status().await);
        let mut receiver = listener.start_monitoring().await?;
        let monitor = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        monitor.set_status(event.new_status);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Network listener lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Network listener closed");
        }))
    }
}
