//! `elro sync`: full device refresh with a progress spinner.

use std::time::Duration;

use elro_core::{Session, SyncReport};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

/// Run a sync, showing a spinner on interactive stderr.
pub async fn run_with_spinner(
    session: &Session,
    global: &GlobalOpts,
) -> Result<SyncReport, CliError> {
    let spinner = (!global.quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.set_message("Syncing devices from hub...");
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    });

    let result = session.sync_devices().await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    Ok(result?)
}

fn join(indices: &[u16]) -> String {
    if indices.is_empty() {
        return "-".into();
    }
    indices
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn detail(report: &SyncReport) -> String {
    let took = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    [
        format!("Devices:   {}", report.devices.len()),
        format!("Refreshed: {}", join(&report.refreshed)),
        format!("Failed:    {}", join(&report.failed)),
        format!("Took:      {}", humantime::format_duration(took)),
    ]
    .join("\n")
}

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let report = run_with_spinner(session, global).await?;
    let out = output::render_single(&global.output, &report, detail, |r| join(&r.devices));
    output::print_output(&out, global.quiet);
    Ok(())
}
