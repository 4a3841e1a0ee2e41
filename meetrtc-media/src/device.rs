//! Host device snapshot with added/removed diffs

use crate::track::{DeviceKind, MediaDeviceInfo, MediaDevices};
use meetrtc_core::{Emitter, EventStream, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one snapshot refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicesUpdated {
    /// Full snapshot after the refresh
    pub devices: Vec<MediaDeviceInfo>,
    /// Devices present before and missing now
    pub removed_devices: Vec<MediaDeviceInfo>,
    /// Devices missing before and present now
    pub new_devices: Vec<MediaDeviceInfo>,
}

/// Device registry events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Snapshot refreshed
    DevicesUpdated(DevicesUpdated),
}

/// Tracks the host's media devices
///
/// Identity is the device id. Each [`DeviceRegistry::refresh`] replaces the
/// snapshot and publishes the set difference against the previous one.
pub struct DeviceRegistry {
    media_devices: Arc<dyn MediaDevices>,
    devices: RwLock<Vec<MediaDeviceInfo>>,
    events: Emitter<DeviceEvent>,
}

impl DeviceRegistry {
    /// Create an empty registry over the host capability
    pub fn new(media_devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            media_devices,
            devices: RwLock::new(Vec::new()),
            events: Emitter::new(),
        }
    }

    /// Host capability used for enumeration and capture
    pub fn media_devices(&self) -> &Arc<dyn MediaDevices> {
        &self.media_devices
    }

    /// Current snapshot
    pub fn devices(&self) -> Vec<MediaDeviceInfo> {
        self.devices.read().clone()
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> EventStream<DeviceEvent> {
        self.events.subscribe()
    }

    /// Re-enumerate and publish the diff
    ///
    /// Entries without an id are dropped. An empty enumeration leaves the
    /// snapshot untouched and returns `None`.
    pub async fn refresh(&self) -> Result<Option<DevicesUpdated>> {
        debug!("Refreshing media devices");

        let listed: Vec<MediaDeviceInfo> = self
            .media_devices
            .enumerate_devices()
            .await?
            .into_iter()
            .filter(|d| !d.device_id.is_empty())
            .collect();

        if listed.is_empty() {
            return Ok(None);
        }

        let update = {
            let mut devices = self.devices.write();
            let removed_devices = devices
                .iter()
                .filter(|old| !listed.iter().any(|d| d.device_id == old.device_id))
                .cloned()
                .collect();
            let new_devices = listed
                .iter()
                .filter(|d| !devices.iter().any(|old| old.device_id == d.device_id))
                .cloned()
                .collect();
            *devices = listed;

            DevicesUpdated {
                devices: devices.clone(),
                removed_devices,
                new_devices,
            }
        };

        self.events.emit(DeviceEvent::DevicesUpdated(update.clone()));
        Ok(Some(update))
    }

    /// Resolve the device to capture from
    ///
    /// Returns `requested` when it is in the snapshot, else the first device
    /// of `kind`.
    pub fn resolve_device_id(&self, requested: Option<&str>, kind: DeviceKind) -> Option<String> {
        let devices = self.devices.read();

        if let Some(requested) = requested.filter(|id| !id.is_empty()) {
            if let Some(device) = devices.iter().find(|d| d.device_id == requested) {
                return Some(device.device_id.clone());
            }
            warn!(
                device_id = %requested,
                kind = ?kind,
                "Requested device not found, falling back to first available"
            );
        }

        devices
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| d.device_id.clone())
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDevices;

    fn registry(devices: &MockDevices) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(devices.clone()))
    }

    #[tokio::test]
    async fn test_refresh_diff() {
        let host = MockDevices::new();
        host.set_devices(vec![
            MediaDeviceInfo::new("cam-1", DeviceKind::VideoInput, "Camera"),
            MediaDeviceInfo::new("mic-1", DeviceKind::AudioInput, "Mic"),
        ]);
        let registry = registry(&host);
        let mut events = registry.subscribe();

        let first = registry.refresh().await.unwrap().unwrap();
        assert_eq!(first.new_devices.len(), 2);
        assert!(first.removed_devices.is_empty());

        host.set_devices(vec![
            MediaDeviceInfo::new("cam-1", DeviceKind::VideoInput, "Camera"),
            MediaDeviceInfo::new("cam-2", DeviceKind::VideoInput, "USB Camera"),
        ]);
        let second = registry.refresh().await.unwrap().unwrap();
        assert_eq!(second.new_devices[0].device_id, "cam-2");
        assert_eq!(second.removed_devices[0].device_id, "mic-1");
        assert_eq!(registry.devices().len(), 2);

        let published = events.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1], DeviceEvent::DevicesUpdated(second));
    }

    #[tokio::test]
    async fn test_empty_enumeration_keeps_snapshot() {
        let host = MockDevices::new();
        host.set_devices(vec![MediaDeviceInfo::new(
            "mic-1",
            DeviceKind::AudioInput,
            "Mic",
        )]);
        let registry = registry(&host);
        registry.refresh().await.unwrap();

        host.set_devices(vec![MediaDeviceInfo::new("", DeviceKind::AudioInput, "")]);
        assert_eq!(registry.refresh().await.unwrap(), None);
        assert_eq!(registry.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_device_fallback() {
        let host = MockDevices::with_default_devices();
        let registry = registry(&host);
        registry.refresh().await.unwrap();

        assert_eq!(
            registry.resolve_device_id(Some("cam-1"), DeviceKind::VideoInput),
            Some("cam-1".to_string())
        );
        assert_eq!(
            registry.resolve_device_id(Some("unplugged"), DeviceKind::VideoInput),
            Some("cam-1".to_string())
        );
        assert_eq!(
            registry.resolve_device_id(None, DeviceKind::AudioInput),
            Some("mic-1".to_string())
        );

        host.set_devices(vec![MediaDeviceInfo::new(
            "spk-1",
            DeviceKind::AudioOutput,
            "Speakers",
        )]);
        registry.refresh().await.unwrap();
        assert_eq!(registry.resolve_device_id(None, DeviceKind::VideoInput), None);
    }

    #[tokio::test]
    async fn test_enumeration_failure_propagates() {
        let host = MockDevices::with_default_devices();
        host.fail_enumeration(true);
        let registry = registry(&host);

        assert!(registry.refresh().await.is_err());
        assert!(registry.devices().is_empty());
    }
}
