//! `elro probe`: show the session state after a successful handshake.

use chrono::{DateTime, Utc};
use elro_core::{Session, SessionState};

use crate::cli::GlobalOpts;
use crate::output::{self, Tone, paint};

fn detail(state: &SessionState, color: bool) -> String {
    let tone = if state.status.is_connected() {
        Tone::Good
    } else {
        Tone::Warn
    };
    let when = |at: Option<DateTime<Utc>>| at.map_or_else(|| "-".into(), output::age);
    [
        format!("Hub:            {}", state.hub_address),
        format!("Device id:      {}", state.device_id),
        format!(
            "Status:         {}",
            paint(&state.status.to_string(), tone, color)
        ),
        format!("Last inbound:   {}", when(state.last_inbound_at)),
        format!("Last heartbeat: {}", when(state.last_heartbeat_at)),
    ]
    .join("\n")
}

pub fn handle(session: &Session, global: &GlobalOpts) {
    let state = session.state().borrow().clone();
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &state,
        |s| detail(s, color),
        |s| s.status.to_string(),
    );
    output::print_output(&out, global.quiet);
}
