//! `elro monitor`: stream device events until Ctrl-C or `--duration`.

use std::sync::Arc;

use chrono::Local;
use elro_core::{ContactState, DeviceEvent, DeviceEventKind, Session};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::warn;

use crate::cli::{GlobalOpts, MonitorArgs, OutputFormat};
use crate::error::CliError;
use crate::output::{self, Tone, paint};

use super::sync::run_with_spinner;

fn summary(event: &DeviceEvent) -> String {
    let device = &event.device;
    match event.kind {
        DeviceEventKind::Alarm => "alarm triggered".into(),
        DeviceEventKind::Name => format!("named \"{}\"", device.display_name()),
        DeviceEventKind::Offline => "went offline".into(),
        DeviceEventKind::Status => {
            let battery = device
                .battery
                .percent()
                .map_or_else(|| "-".into(), |p| format!("{p}%"));
            if device.device_type.is_contact() && device.state != ContactState::Unknown {
                format!("{}, battery {battery}", device.state)
            } else {
                match device.alarm_active {
                    Some(true) => format!("alarm active, battery {battery}"),
                    Some(false) => format!("normal, battery {battery}"),
                    None => format!("state unknown, battery {battery}"),
                }
            }
        }
    }
}

fn render_event(event: &DeviceEvent, format: &OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Table => {
            let tone = match event.kind {
                DeviceEventKind::Alarm => Tone::Bad,
                DeviceEventKind::Offline => Tone::Warn,
                DeviceEventKind::Status | DeviceEventKind::Name => Tone::Good,
            };
            let when = event.received_at.with_timezone(&Local).format("%H:%M:%S");
            let kind = format!("{:<7}", event.kind.to_string().to_uppercase());
            format!(
                "{}  {}  #{:<3} {:<20} {}",
                paint(&when.to_string(), Tone::Muted, color),
                paint(&kind, tone, color),
                event.device.index,
                event.device.display_name(),
                summary(event),
            )
        }
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true),
        OutputFormat::Yaml => format!("---\n{}", output::render_yaml(event)),
        OutputFormat::Plain => format!("{}\t{}", event.kind, event.device.index),
    }
}

pub async fn handle(
    session: &Session,
    args: &MonitorArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Subscribe before the initial sync so nothing it reports is missed.
    let mut events = session.events();
    run_with_spinner(session, global).await?;

    let color = output::should_color(&global.color);
    let deadline = args.duration.map(|d| Instant::now() + d);
    if !global.quiet {
        eprintln!(
            "Watching {} device(s), Ctrl-C to stop",
            session.current_devices().len()
        );
    }

    loop {
        let event: Arc<DeviceEvent> = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            () = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => break,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "monitor fell behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        output::print_output(&render_event(&event, &global.output, color), global.quiet);
    }
    Ok(())
}
