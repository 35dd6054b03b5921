//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use elro_config::ConfigError;
use elro_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Hub at {addr} did not answer")]
    #[diagnostic(
        code(elro::unreachable),
        help(
            "Check that the hub is powered and on the same network.\n\
             Address: {addr}\n\
             Try: elro probe -vv"
        )
    )]
    Unreachable {
        addr: String,
        #[source]
        source: CoreError,
    },

    #[error("Lost the connection to the hub")]
    #[diagnostic(
        code(elro::disconnected),
        help("The hub stopped answering mid-command. Retry once it is reachable.")
    )]
    Disconnected,

    #[error("No reply from hub within {millis} ms")]
    #[diagnostic(
        code(elro::timeout),
        help("Increase the timeout with --timeout or check the hub's network link.")
    )]
    Timeout { millis: u64 },

    // ── Resources ────────────────────────────────────────────────────
    #[error("device {index} not found")]
    #[diagnostic(
        code(elro::not_found),
        help("Run: elro devices to see paired devices")
    )]
    DeviceNotFound { index: u16 },

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("Hub error: {message}")]
    #[diagnostic(code(elro::hub))]
    Hub { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(elro::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(elro::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: elro config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No hub configured")]
    #[diagnostic(
        code(elro::no_config),
        help(
            "Create a profile with: elro config init\n\
             Or pass --host and --device-id.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(elro::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::DeviceNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout { timeout_ms } => Self::Timeout { millis: timeout_ms },
            CoreError::Disconnected | CoreError::Cancelled | CoreError::Closed => {
                Self::Disconnected
            }
            CoreError::DeviceNotFound { index } => Self::DeviceNotFound { index },
            CoreError::Config { message } => Self::Validation {
                field: "hub".into(),
                reason: message,
            },
            CoreError::Busy => Self::Hub {
                message: "too many requests in flight".into(),
            },
            CoreError::Decode { message } | CoreError::Io { message } => Self::Hub { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(other),
        }
    }
}
