//! Device listing handlers.

use std::sync::Arc;

use elro_core::{ContactState, Device, DeviceFilter, Session};
use tabled::Tabled;

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, Tone, paint};

use super::sync::run_with_spinner;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "#")]
    index: u16,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    dtype: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Alarm")]
    alarm: String,
    #[tabled(rename = "Online")]
    online: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

#[derive(Tabled)]
struct NameRow {
    #[tabled(rename = "#")]
    index: u16,
    #[tabled(rename = "Name")]
    name: String,
}

fn battery_cell(device: &Device, color: bool) -> String {
    match device.battery.percent() {
        Some(p) if p < 20 => paint(&format!("{p}%"), Tone::Bad, color),
        Some(p) if p < 50 => paint(&format!("{p}%"), Tone::Warn, color),
        Some(p) => format!("{p}%"),
        None => paint("-", Tone::Muted, color),
    }
}

fn state_cell(device: &Device, color: bool) -> String {
    if !device.device_type.is_contact() {
        return paint("-", Tone::Muted, color);
    }
    match device.state {
        ContactState::Open => paint("open", Tone::Warn, color),
        ContactState::Closed => paint("closed", Tone::Good, color),
        ContactState::Unknown => paint("unknown", Tone::Muted, color),
    }
}

fn device_row(device: &Arc<Device>, color: bool) -> DeviceRow {
    DeviceRow {
        index: device.index,
        name: device.display_name(),
        dtype: device.device_type.model_name().to_owned(),
        battery: battery_cell(device, color),
        state: state_cell(device, color),
        alarm: match device.alarm_active {
            Some(true) => paint("ALARM", Tone::Bad, color),
            Some(false) => paint("no", Tone::Muted, color),
            None => paint("-", Tone::Muted, color),
        },
        online: if device.online {
            paint("yes", Tone::Good, color)
        } else {
            paint("no", Tone::Bad, color)
        },
        last_seen: output::age(device.last_updated),
    }
}

/// Every requested filter must match.
fn filters(args: &DevicesArgs) -> Vec<DeviceFilter> {
    let mut out = Vec::new();
    if let Some(t) = args.device_type {
        out.push(DeviceFilter::ByType(t));
    }
    if args.alarm {
        out.push(DeviceFilter::Alarm);
    }
    if args.offline {
        out.push(DeviceFilter::Offline);
    }
    out
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle(
    session: &Session,
    args: &DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let report = run_with_spinner(session, global).await?;
    if !report.failed.is_empty() {
        tracing::warn!(failed = ?report.failed, "some devices did not answer");
    }

    let filters = filters(args);
    let devices: Vec<Arc<Device>> = session
        .current_devices()
        .iter()
        .filter(|d| filters.iter().all(|f| f.matches(d)))
        .cloned()
        .collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &devices,
        |d| device_row(d, color),
        |d| d.index.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn names(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = session.get_device_names().await?;
    let out = output::render_list(
        &global.output,
        &devices,
        |d| NameRow {
            index: d.index,
            name: d.name.clone().unwrap_or_default(),
        },
        |d| format!("{}\t{}", d.index, d.name.as_deref().unwrap_or("")),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use elro_core::{Battery, DeviceType};

    use super::*;

    fn door(online: bool, alarm: bool) -> Device {
        let mut d = Device::new(4, Utc::now());
        d.device_type = DeviceType::Door;
        d.state = ContactState::Open;
        d.battery = Battery::Percent(15);
        d.online = online;
        d.alarm_active = Some(alarm);
        d
    }

    #[test]
    fn row_without_color_is_plain_text() {
        let row = device_row(&Arc::new(door(true, false)), false);
        assert_eq!(row.index, 4);
        assert_eq!(row.name, "Device 4");
        assert_eq!(row.dtype, "Door/Window Sensor");
        assert_eq!(row.battery, "15%");
        assert_eq!(row.state, "open");
        assert_eq!(row.alarm, "no");
        assert_eq!(row.online, "yes");
    }

    #[test]
    fn non_contact_sensors_have_no_state() {
        let mut smoke = Device::new(2, Utc::now());
        smoke.device_type = DeviceType::Smoke;
        assert_eq!(state_cell(&smoke, false), "-");
        assert_eq!(battery_cell(&smoke, false), "-");
        assert_eq!(device_row(&Arc::new(smoke), false).alarm, "-");
    }

    #[test]
    fn all_filters_must_match() {
        let args = DevicesArgs {
            device_type: Some(DeviceType::Door),
            alarm: true,
            offline: true,
        };
        let filters = filters(&args);
        assert_eq!(filters.len(), 3);

        let hit = door(false, true);
        let miss = door(true, true);
        assert!(filters.iter().all(|f| f.matches(&hit)));
        assert!(!filters.iter().all(|f| f.matches(&miss)));
    }
}
