//! Clap derive structures for the `elro` CLI.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use elro_core::DeviceType;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// elro -- talk to an ELRO Connects K1 hub on the local network
#[derive(Debug, Parser)]
#[command(
    name = "elro",
    version,
    about = "Monitor and control ELRO Connects K1 alarm hubs",
    long_about = "Talks to a K1 hub over its local UDP protocol (port 1025).\n\n\
        Lists paired sensors, streams alarms and status changes,\n\
        and sends test alarms and scene changes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Hub profile to use
    #[arg(long, short = 'p', env = "ELRO_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Hub IP address (overrides profile)
    #[arg(long, short = 'H', env = "ELRO_HOST", global = true)]
    pub host: Option<String>,

    /// Hub id, `ST_` + MAC (overrides profile)
    #[arg(long, short = 'd', env = "ELRO_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// Control key (overrides profile and keyring)
    #[arg(long, env = "ELRO_CTRL_KEY", global = true, hide_env = true)]
    pub ctrl_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ELRO_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Per-request reply timeout (e.g. 3s, 500ms)
    #[arg(long, env = "ELRO_TIMEOUT", value_parser = humantime::parse_duration, global = true)]
    pub timeout: Option<Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync and list paired devices
    #[command(alias = "dev", alias = "ls")]
    Devices(DevicesArgs),

    /// Run a full device sync and report the outcome
    Sync,

    /// Read the hub's device name table
    Names,

    /// Sound a device's test alarm
    TestAlarm(TestAlarmArgs),

    /// Select a scene group (arm / disarm profile)
    Scene(SceneArgs),

    /// Stream device events until interrupted
    #[command(alias = "watch")]
    Monitor(MonitorArgs),

    /// Check that the hub answers and show session state
    Probe,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Device commands ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Only devices of this type (door, smoke, co, heat, water)
    #[arg(long = "type", short = 't', value_parser = parse_device_type)]
    pub device_type: Option<DeviceType>,

    /// Only devices currently in alarm
    #[arg(long)]
    pub alarm: bool,

    /// Only devices marked offline
    #[arg(long)]
    pub offline: bool,
}

fn parse_device_type(raw: &str) -> Result<DeviceType, String> {
    raw.parse()
        .map_err(|_| format!("unknown device type '{raw}' (door, smoke, co, heat, water)"))
}

#[derive(Debug, Args)]
pub struct TestAlarmArgs {
    /// Device index as shown by `elro devices`
    pub index: u16,
}

#[derive(Debug, Args)]
pub struct SceneArgs {
    /// Scene group number
    pub group: u8,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Stop after this long (e.g. 10m); runs until Ctrl-C when omitted
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a hub profile with guided setup
    Init,

    /// Display current configuration (control keys masked)
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a control key in the system keyring
    SetKey {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
