// ── Device state store ──
//
// In-memory device table keyed by hub index. The session is the only
// writer; readers take snapshots or subscribe through `DeviceStream`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::collection::IndexedCollection;
use crate::error::CoreError;
use crate::model::{Battery, ContactState, Device, DevicePatch};
use crate::stream::DeviceStream;

/// Outcome of merging a patch into the store.
#[derive(Debug, Clone)]
pub struct Applied {
    pub device: Arc<Device>,
    /// Any field or the online flag changed, or the device is new.
    pub changed: bool,
}

pub struct DeviceStore {
    devices: IndexedCollection<Device>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            devices: IndexedCollection::new(),
        }
    }

    /// Merge `patch` into the device at `index`, creating it if needed.
    pub fn upsert(&self, index: u16, patch: &DevicePatch) -> Arc<Device> {
        self.apply(index, patch, Utc::now()).device
    }

    /// Merge a frame observed at `now`: fields present in `patch` overwrite,
    /// the device is marked online and `last_updated` is refreshed.
    pub fn apply(&self, index: u16, patch: &DevicePatch, now: DateTime<Utc>) -> Applied {
        let (device, changed) = self.devices.upsert_with(
            index,
            || Device::new(index, now),
            |device| {
                let came_online = !device.online;
                device.online = true;
                device.last_updated = now;
                device.merge(patch) || came_online
            },
        );
        Applied { device, changed }
    }

    pub fn get(&self, index: u16) -> Result<Arc<Device>, CoreError> {
        self.devices
            .get(index)
            .ok_or(CoreError::DeviceNotFound { index })
    }

    /// Mark one device offline. Returns it only if it was online.
    pub fn mark_offline(&self, index: u16) -> Option<Arc<Device>> {
        let (device, changed) = self
            .devices
            .modify(index, |device| std::mem::replace(&mut device.online, false))?;
        changed.then_some(device)
    }

    /// Mark every device offline, returning the ones that were online.
    pub fn mark_all_offline(&self) -> Vec<Arc<Device>> {
        self.devices
            .modify_all(|device| std::mem::replace(&mut device.online, false))
    }

    /// Mark offline every online device with no frame since `cutoff`.
    pub fn mark_stale(&self, cutoff: DateTime<Utc>) -> Vec<Arc<Device>> {
        self.devices.modify_all(|device| {
            if device.online && device.last_updated < cutoff {
                device.online = false;
                true
            } else {
                false
            }
        })
    }

    /// Record that the device's state could not be determined: contact
    /// state, battery and alarm all become unknown.
    ///
    /// Does not count as an observation: `online`, `last_updated` and the
    /// name are kept.
    pub fn mark_unknown(&self, index: u16) -> Arc<Device> {
        let now = Utc::now();
        let (device, _) = self.devices.upsert_with(
            index,
            || Device::new(index, now),
            |device| {
                let before = (device.state, device.battery, device.alarm_active);
                device.state = ContactState::Unknown;
                device.battery = Battery::Unknown;
                device.alarm_active = None;
                before != (device.state, device.battery, device.alarm_active)
            },
        );
        device
    }

    /// All devices ordered by index, as one consistent snapshot.
    pub fn all(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn subscribe(&self) -> DeviceStream {
        DeviceStream::new(self.devices.subscribe())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.len() == 0
    }

    /// Drop every device (session teardown).
    pub fn clear(&self) {
        self.devices.clear();
    }
}
