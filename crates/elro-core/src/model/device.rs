// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

/// Sensor family, decoded from the hub's 4-digit type code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceType {
    Door,
    Smoke,
    Co,
    Heat,
    Water,
    Unknown,
}

impl DeviceType {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0000" => Self::Co,
            "0003" => Self::Heat,
            "0004" => Self::Water,
            "0005" => Self::Smoke,
            "0101" => Self::Door,
            _ => Self::Unknown,
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            Self::Door => "Door/Window Sensor",
            Self::Smoke => "Fire Alarm",
            Self::Co => "CO Alarm",
            Self::Heat => "Heat Alarm",
            Self::Water => "Water Alarm",
            Self::Unknown => "Unknown",
        }
    }

    /// Door/window contacts report open/closed rather than alarm/normal.
    pub fn is_contact(self) -> bool {
        matches!(self, Self::Door)
    }
}

/// Open/closed state of a contact sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContactState {
    Open,
    Closed,
    Unknown,
}

/// Battery level as reported by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "Option<u8>")]
pub enum Battery {
    Percent(u8),
    Unknown,
}

impl Battery {
    /// Hub bytes above 100 are not percentages.
    pub fn from_raw(raw: u8) -> Self {
        if raw <= 100 {
            Self::Percent(raw)
        } else {
            Self::Unknown
        }
    }

    pub fn percent(self) -> Option<u8> {
        match self {
            Self::Percent(p) => Some(p),
            Self::Unknown => None,
        }
    }
}

impl From<Battery> for Option<u8> {
    fn from(b: Battery) -> Self {
        b.percent()
    }
}

/// Last-known state of one paired sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Hub-assigned index, 1-based and stable per physical device.
    pub index: u16,
    pub device_type: DeviceType,
    /// Raw type code exactly as the hub sent it.
    pub type_code: Option<String>,
    pub name: Option<String>,
    pub battery: Battery,
    /// `None` until the hub reports it, and again after a failed refresh.
    pub alarm_active: Option<bool>,
    pub state: ContactState,
    pub last_updated: DateTime<Utc>,
    pub online: bool,
}

impl Device {
    pub fn new(index: u16, now: DateTime<Utc>) -> Self {
        Self {
            index,
            device_type: DeviceType::Unknown,
            type_code: None,
            name: None,
            battery: Battery::Unknown,
            alarm_active: None,
            state: ContactState::Unknown,
            last_updated: now,
            online: true,
        }
    }

    /// True only for an alarm the hub actually reported.
    pub fn in_alarm(&self) -> bool {
        self.alarm_active == Some(true)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Device {}", self.index))
    }

    /// Merge the fields present in `patch`. Returns whether anything changed.
    ///
    /// `last_updated` and `online` are bookkeeping and handled by the store.
    pub fn merge(&mut self, patch: &DevicePatch) -> bool {
        let before = (
            self.device_type,
            self.type_code.clone(),
            self.name.clone(),
            self.battery,
            self.alarm_active,
            self.state,
        );

        if let Some(code) = &patch.type_code {
            self.device_type = DeviceType::from_code(code);
            self.type_code = Some(code.clone());
        }
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(battery) = patch.battery {
            self.battery = battery;
        }
        if let Some(alarm) = patch.alarm_active {
            self.alarm_active = Some(alarm);
        }
        if let Some(state) = patch.state {
            self.state = state;
        }

        before
            != (
                self.device_type,
                self.type_code.clone(),
                self.name.clone(),
                self.battery,
                self.alarm_active,
                self.state,
            )
    }
}

/// Sparse update: `Some` means "the frame carried this field".
///
/// A zero battery or a cleared alarm is still `Some`; only absent fields are
/// left untouched by [`Device::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePatch {
    pub type_code: Option<String>,
    pub name: Option<String>,
    pub battery: Option<Battery>,
    pub alarm_active: Option<bool>,
    pub state: Option<ContactState>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
