//! Hub actions: test alarm, scene group.

use elro_core::Session;

use crate::cli::{GlobalOpts, SceneArgs, TestAlarmArgs};
use crate::error::CliError;

use super::sync::run_with_spinner;

pub async fn test_alarm(
    session: &Session,
    args: &TestAlarmArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // The alarm payload depends on the device type, which only a sync knows.
    run_with_spinner(session, global).await?;
    let device = session.device(args.index)?;
    session.test_alarm(args.index).await?;

    if !global.quiet {
        eprintln!(
            "✓ Test alarm sent to {} (#{})",
            device.display_name(),
            device.index
        );
    }
    Ok(())
}

pub async fn scene(
    session: &Session,
    args: &SceneArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session.set_scene_group(args.group).await?;
    if !global.quiet {
        eprintln!("✓ Scene group {} selected", args.group);
    }
    Ok(())
}
