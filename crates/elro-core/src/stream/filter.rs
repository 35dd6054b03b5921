// ── Filter predicates for device snapshots ──
//
// Used by the CLI to narrow listings without another round trip.

use crate::model::{Device, DeviceType};

/// Filter predicate for device collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    ByType(DeviceType),
    /// Only an alarm the hub reported; an unknown alarm flag never matches.
    Alarm,
    Offline,
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::ByType(t) => device.device_type == *t,
            Self::Alarm => device.in_alarm(),
            Self::Offline => !device.online,
        }
    }
}
