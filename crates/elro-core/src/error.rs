// ── Core error types ──
//
// Session-level errors surfaced to consumers. Socket and codec failures
// from elro-api are translated by the `From` impl below so callers never
// match on transport details.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// `Clone` because one failure (a cancelled session, a coalesced sync) is
/// delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Malformed frame from hub: {message}")]
    Decode { message: String },

    #[error("No reply from hub within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Hub session is not connected")]
    Disconnected,

    #[error("Too many outstanding requests; every message id is in use")]
    Busy,

    #[error("Request cancelled by session teardown")]
    Cancelled,

    #[error("Hub session is closed")]
    Closed,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {index}")]
    DeviceNotFound { index: u16 },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl CoreError {
    pub(crate) fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<elro_api::Error> for CoreError {
    fn from(err: elro_api::Error) -> Self {
        match err {
            elro_api::Error::Io(e) => CoreError::Io {
                message: e.to_string(),
            },
            elro_api::Error::WouldBlock => CoreError::Io {
                message: "socket send buffer full".into(),
            },
            elro_api::Error::NotBound => CoreError::Disconnected,
            elro_api::Error::Decode(e) => CoreError::Decode {
                message: e.to_string(),
            },
        }
    }
}
