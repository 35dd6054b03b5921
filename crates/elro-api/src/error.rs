use thiserror::Error;

/// Top-level error type for the `elro-api` crate.
///
/// Covers every failure mode of the wire layer: socket I/O and frame
/// decoding. `elro-core` maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket error (bind, connect, send, receive).
    #[error("UDP transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket send buffer is full; the datagram was not sent.
    #[error("UDP send would block")]
    WouldBlock,

    /// No socket is bound (session not connected or already torn down).
    #[error("hub socket is not bound")]
    NotBound,

    // ── Data ────────────────────────────────────────────────────────
    /// An inbound datagram could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Returns `true` if retrying the same send later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WouldBlock => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::Interrupted
            ),
            Self::NotBound | Self::Decode(_) => false,
        }
    }
}

/// Classified reasons a datagram is rejected by the codec.
///
/// Decode failures are never fatal: the session logs and drops the frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,

    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("unknown command id {0}")]
    UnknownCommand(i64),

    #[error("unrecognized control frame `{0}`")]
    UnknownControlFrame(String),
}
