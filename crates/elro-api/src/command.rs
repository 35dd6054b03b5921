//! The closed catalog of command ids understood by the K1 hub.
//!
//! Outbound requests and inbound replies/pushes share one numeric space
//! carried in `params.data.cmdId`. Anything outside this table is rejected
//! by the codec with [`DecodeError::UnknownCommand`](crate::DecodeError).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Command id carried in the `cmdId` field of every envelope body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "i64")]
pub enum CommandId {
    // ── App → hub ────────────────────────────────────────────────────
    /// Drive a device output (alarm test uses this).
    EquipmentControl,
    /// Select a scene group (arm / disarm profiles).
    ChooseSceneGroup,
    /// Request device names; `device_ID: 0` streams the whole table.
    GetDeviceName,
    /// Request the status of every paired device.
    GetAllEquipmentStatus,
    /// Keepalive probe; echoed back by the hub.
    TimeCheck,
    /// Request the current status of one device.
    SynDeviceStatus,

    // ── Hub → app ────────────────────────────────────────────────────
    DeviceNameReply,
    DeviceStatusUpdate,
    DeviceAlarmTrigger,
    SceneStatusUpdate,
}

impl CommandId {
    pub const fn code(self) -> u16 {
        match self {
            Self::EquipmentControl => 1,
            Self::ChooseSceneGroup => 6,
            Self::GetDeviceName => 14,
            Self::GetAllEquipmentStatus => 15,
            Self::DeviceNameReply => 17,
            Self::DeviceStatusUpdate => 19,
            Self::TimeCheck => 21,
            Self::DeviceAlarmTrigger => 25,
            Self::SceneStatusUpdate => 26,
            Self::SynDeviceStatus => 29,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::EquipmentControl,
            6 => Self::ChooseSceneGroup,
            14 => Self::GetDeviceName,
            15 => Self::GetAllEquipmentStatus,
            17 => Self::DeviceNameReply,
            19 => Self::DeviceStatusUpdate,
            21 => Self::TimeCheck,
            25 => Self::DeviceAlarmTrigger,
            26 => Self::SceneStatusUpdate,
            29 => Self::SynDeviceStatus,
            _ => return None,
        })
    }

    /// Human-readable name, as used in logs and CLI output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::EquipmentControl => "equipment_control",
            Self::ChooseSceneGroup => "choose_scene_group",
            Self::GetDeviceName => "get_device_name",
            Self::GetAllEquipmentStatus => "get_all_equipment_status",
            Self::DeviceNameReply => "device_name_reply",
            Self::DeviceStatusUpdate => "device_status_update",
            Self::TimeCheck => "time_check",
            Self::DeviceAlarmTrigger => "device_alarm_trigger",
            Self::SceneStatusUpdate => "scene_status_update",
            Self::SynDeviceStatus => "syn_device_status",
        }
    }
}

impl From<CommandId> for u16 {
    fn from(id: CommandId) -> Self {
        id.code()
    }
}

impl TryFrom<i64> for CommandId {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown command id {code}"))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
