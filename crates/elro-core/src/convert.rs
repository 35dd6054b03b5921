// ── Hub frame → domain conversion ──
//
// Decodes the hex-packed payloads of status (19), name (17) and alarm (25)
// bodies into sparse `DevicePatch`es. Pure functions; the session decides
// what to do with the result.

use elro_api::{CommandBody, CommandId};

use crate::model::{Battery, ContactState, DevicePatch, DeviceType};

/// `device_name` value closing a status list.
pub const STATUS_LIST_END: &str = "STATUES";
/// `answer_content` value closing a name list.
pub const NAME_LIST_END: &str = "NAME_OVER";

const NAME_HEX_LEN: usize = 32;

/// One decoded status frame, before the device type is known for sure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub index: u16,
    pub type_code: Option<String>,
    pub battery: Option<Battery>,
    pub status_code: Option<String>,
}

impl StatusFrame {
    /// Interpret the status code for `known` unless the frame names a type.
    pub fn into_patch(self, known: DeviceType) -> DevicePatch {
        let device_type = self
            .type_code
            .as_deref()
            .map_or(known, DeviceType::from_code);

        let mut patch = DevicePatch {
            type_code: self.type_code,
            battery: self.battery,
            ..DevicePatch::default()
        };

        if let Some(code) = self.status_code.as_deref() {
            if device_type.is_contact() {
                patch.state = Some(if code.eq_ignore_ascii_case("AA") {
                    ContactState::Closed
                } else {
                    ContactState::Open
                });
            } else if code.eq_ignore_ascii_case("BB") {
                patch.alarm_active = Some(true);
            } else if code.eq_ignore_ascii_case("AA") {
                patch.alarm_active = Some(false);
            }
        }
        patch
    }
}

/// What a command body means for the device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Status(StatusFrame),
    Name { index: u16, name: String },
    Alarm { index: u16 },
    StatusListEnd,
    NameListEnd,
    /// Recognized but carries no device data (time check, scene status).
    Informational,
    /// Recognized command with an unusable payload.
    Invalid(&'static str),
}

pub fn parse(body: &CommandBody) -> Frame {
    match body.command_id {
        CommandId::DeviceStatusUpdate => parse_status(body),
        CommandId::DeviceNameReply => parse_name(body),
        CommandId::DeviceAlarmTrigger => parse_alarm(body),
        _ => Frame::Informational,
    }
}

/// Index carried by a status frame, if any (used to enumerate devices).
pub fn status_index(body: &CommandBody) -> Option<u16> {
    match parse(body) {
        Frame::Status(status) => Some(status.index),
        _ => None,
    }
}

pub fn is_status_list_end(body: &CommandBody) -> bool {
    body.command_id == CommandId::DeviceStatusUpdate
        && body.arg_str("device_name").as_deref() == Some(STATUS_LIST_END)
}

pub fn is_name_list_end(body: &CommandBody) -> bool {
    body.command_id == CommandId::DeviceNameReply
        && body.arg_str("answer_content").as_deref() == Some(NAME_LIST_END)
}

fn parse_status(body: &CommandBody) -> Frame {
    if is_status_list_end(body) {
        return Frame::StatusListEnd;
    }
    let Some(index) = body.arg_u16("device_ID") else {
        return Frame::Invalid("status frame without device_ID");
    };

    let type_code = body
        .arg_str("device_name")
        .filter(|code| !code.is_empty());

    let status = body.arg_str("device_status").unwrap_or_default();
    let battery = status
        .get(2..4)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .map(Battery::from_raw);

    // Status byte sits after the battery; long frames end in a checksum byte.
    let raw_code = if status.len() > 6 {
        status.get(4..status.len() - 2)
    } else {
        status.get(4..)
    };
    let status_code = raw_code
        .filter(|code| !code.is_empty())
        .map(str::to_owned);

    Frame::Status(StatusFrame {
        index,
        type_code,
        battery,
        status_code,
    })
}

fn parse_name(body: &CommandBody) -> Frame {
    if is_name_list_end(body) {
        return Frame::NameListEnd;
    }
    let content = body.arg_str("answer_content").unwrap_or_default();
    let (Some(id_hex), Some(name_hex)) = (content.get(0..4), content.get(4..4 + NAME_HEX_LEN))
    else {
        return Frame::Invalid("name reply shorter than 36 hex digits");
    };
    let Ok(index) = u16::from_str_radix(id_hex, 16) else {
        return Frame::Invalid("name reply index is not hex");
    };
    match decode_name(name_hex) {
        Some(name) => Frame::Name { index, name },
        None => Frame::Invalid("name reply payload is not a name"),
    }
}

fn parse_alarm(body: &CommandBody) -> Frame {
    let content = body.arg_str("answer_content").unwrap_or_default();
    content
        .get(6..10)
        .and_then(|hex| u16::from_str_radix(hex, 16).ok())
        .map_or(Frame::Invalid("alarm trigger without device index"), |index| {
            Frame::Alarm { index }
        })
}

/// 16 hex-encoded bytes, NUL padded; `@` and `$` are filler.
fn decode_name(hex: &str) -> Option<String> {
    let mut name = String::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(pair).ok()?;
        let byte = u8::from_str_radix(pair, 16).ok()?;
        if byte != 0 && byte != b'@' && byte != b'$' {
            name.push(char::from(byte));
        }
    }
    let name = name.trim().to_owned();
    (!name.is_empty()).then_some(name)
}
