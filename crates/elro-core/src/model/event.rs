// ── Device event types ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use super::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceEventKind {
    /// Status frame (battery, open/closed, alarm flag).
    Status,
    /// Alarm trigger from the hub.
    Alarm,
    /// Name table entry.
    Name,
    /// Device went offline (stale or hub unreachable).
    Offline,
}

/// Fan-out payload for subscribers and the broadcast channel.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device: Arc<Device>,
    pub received_at: DateTime<Utc>,
}
