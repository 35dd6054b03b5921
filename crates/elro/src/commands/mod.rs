//! Command dispatch: bridges CLI args -> session calls -> output formatting.

pub mod actions;
pub mod config_cmd;
pub mod devices;
pub mod monitor;
pub mod probe;
pub mod sync;

use elro_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a hub-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(session, &args, global).await,
        Command::Names => devices::names(session, global).await,
        Command::Sync => sync::handle(session, global).await,
        Command::TestAlarm(args) => actions::test_alarm(session, &args, global).await,
        Command::Scene(args) => actions::scene(session, &args, global).await,
        Command::Monitor(args) => monitor::handle(session, &args, global).await,
        Command::Probe => {
            probe::handle(session, global);
            Ok(())
        }
        // Config and Completions never reach a session
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "does not talk to the hub".into(),
        }),
    }
}
