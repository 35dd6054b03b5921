// ── Hub commands ──
//
// The operations the session can send, each mapped to its wire command
// id, argument map and expected reply shape.

use elro_api::{CommandBody, CommandId};

use crate::model::DeviceType;
use crate::transaction::ReplyShape;

/// `device_status` payload that makes a sensor sound its test alarm.
const TEST_ALARM_PAYLOAD: &str = "BB000000";
/// Fire alarms use their own test payload.
const TEST_ALARM_PAYLOAD_FIRE: &str = "17000000";

/// A request to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Status of every paired device; the device enumeration query.
    QueryAllStatus,
    /// Status of one device.
    QueryDeviceStatus { index: u16 },
    /// The whole name table.
    QueryNames,
    /// Name of one device.
    QueryDeviceName { index: u16 },
    /// Sound the device's test alarm. Completes on the hub's acknowledgement.
    TestAlarm { index: u16, device_type: DeviceType },
    /// Switch the active scene group (arm / disarm profiles).
    ChooseSceneGroup { group: u8 },
}

impl Command {
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            Self::QueryAllStatus => ReplyShape::StatusList,
            Self::QueryNames => ReplyShape::NameList,
            _ => ReplyShape::Single,
        }
    }

    pub fn command_id(&self) -> CommandId {
        match self {
            Self::QueryAllStatus => CommandId::GetAllEquipmentStatus,
            Self::QueryDeviceStatus { .. } => CommandId::SynDeviceStatus,
            Self::QueryNames | Self::QueryDeviceName { .. } => CommandId::GetDeviceName,
            Self::TestAlarm { .. } => CommandId::EquipmentControl,
            Self::ChooseSceneGroup { .. } => CommandId::ChooseSceneGroup,
        }
    }

    pub fn body(&self) -> CommandBody {
        let body = CommandBody::new(self.command_id());
        match self {
            Self::QueryAllStatus => body.with_arg("device_status", ""),
            Self::QueryDeviceStatus { index } => body
                .with_arg("device_ID", *index)
                .with_arg("device_status", ""),
            Self::QueryNames => body.with_arg("device_ID", 0),
            Self::QueryDeviceName { index } => body.with_arg("device_ID", *index),
            Self::TestAlarm { index, device_type } => {
                let payload = if *device_type == DeviceType::Smoke {
                    TEST_ALARM_PAYLOAD_FIRE
                } else {
                    TEST_ALARM_PAYLOAD
                };
                body.with_arg("device_ID", *index)
                    .with_arg("device_status", payload)
            }
            // The vendor firmware spells the key this way.
            Self::ChooseSceneGroup { group } => body.with_arg("sence_group", *group),
        }
    }
}
