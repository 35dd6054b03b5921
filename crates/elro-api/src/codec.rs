//! K1 envelope codec.
//!
//! Every JSON datagram exchanged with the hub is one envelope:
//!
//! ```text
//! {"msgId": 7, "action": "appSend",
//!  "params": {"devTid": "ST_...", "ctrlKey": "0", "appTid": "0",
//!             "data": {"cmdId": 29, "device_ID": 3}}}
//! ```
//!
//! Besides envelopes the hub emits a couple of bare control frames
//! (`{ST_answer_OK}`, `IOT_KEY...`), handled by [`decode_datagram`].
//! The codec never allocates message ids; [`encode`] writes whatever id
//! the caller supplies so a retransmitted frame keeps its original id.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::command::CommandId;
use crate::error::DecodeError;

/// Control key / app id used when the caller has none configured.
pub const DEFAULT_KEY: &str = "0";

/// Hub acknowledgement of a handshake probe or a raw frame.
pub const HUB_ACK: &str = "{ST_answer_OK}";

/// Acknowledgement the app sends after every JSON frame from the hub.
pub const APP_ACK: &[u8] = b"APP_answer_OK";

const KEY_PREFIX: &str = "IOT_KEY";

// ── Envelope types ───────────────────────────────────────────────────

/// Envelope `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    AppSend,
    AppReply,
    Heartbeat,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppSend => "appSend",
            Self::AppReply => "appReply",
            Self::Heartbeat => "heartbeat",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "appSend" => Some(Self::AppSend),
            "appReply" => Some(Self::AppReply),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `params.data` object: a command id plus its loosely-typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBody {
    pub command_id: CommandId,
    pub args: Map<String, Value>,
}

impl CommandBody {
    pub fn new(command_id: CommandId) -> Self {
        Self {
            command_id,
            args: Map::new(),
        }
    }

    /// Builder-style argument insertion.
    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_owned(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// String argument; numbers are rendered to their decimal text.
    pub fn arg_str(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// 16-bit numeric argument, accepting JSON numbers or numeric strings.
    pub fn arg_u16(&self, key: &str) -> Option<u16> {
        self.args.get(key).and_then(lenient_u16)
    }
}

/// A decoded K1 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: u16,
    pub action: Action,
    pub device_tid: String,
    pub ctrl_key: String,
    pub app_tid: String,
    pub body: CommandBody,
}

/// Anything the hub can put in a datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// `{ST_answer_OK}`
    HubAck,
    /// `IOT_KEY...` reply to a key probe; carries the text after the prefix.
    KeyReply(String),
    Envelope(Envelope),
}

/// Result of classifying a decoded envelope against the pending set.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a transaction this session is tracking.
    Reply { message_id: u16, body: CommandBody },
    /// Push event, or a reply nobody is waiting for.
    Event { message_id: u16, body: CommandBody },
}

// ── Encoding ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "msgId")]
    msg_id: u16,
    action: &'static str,
    params: WireParams<'a>,
}

#[derive(Serialize)]
struct WireParams<'a> {
    #[serde(rename = "devTid")]
    dev_tid: &'a str,
    #[serde(rename = "ctrlKey")]
    ctrl_key: &'a str,
    #[serde(rename = "appTid")]
    app_tid: &'a str,
    data: WireData<'a>,
}

#[derive(Serialize)]
struct WireData<'a> {
    #[serde(rename = "cmdId")]
    cmd_id: CommandId,
    #[serde(flatten)]
    args: &'a Map<String, Value>,
}

/// Encode an envelope to its wire bytes.
pub fn encode(envelope: &Envelope) -> Bytes {
    let wire = WireEnvelope {
        msg_id: envelope.message_id,
        action: envelope.action.as_str(),
        params: WireParams {
            dev_tid: &envelope.device_tid,
            ctrl_key: &envelope.ctrl_key,
            app_tid: &envelope.app_tid,
            data: WireData {
                cmd_id: envelope.body.command_id,
                args: &envelope.body.args,
            },
        },
    };
    // Serializing a struct of strings, integers and a JSON map cannot fail.
    Bytes::from(serde_json::to_vec(&wire).unwrap_or_default())
}

/// The bare key probe `IOT_KEY?<devTid>` used for the handshake.
pub fn key_probe(device_tid: &str) -> Bytes {
    Bytes::from(format!("{KEY_PREFIX}?{device_tid}"))
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode a JSON envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    let root: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;
    envelope_from_value(root)
}

/// Decode any datagram the hub may send: control frames or an envelope.
pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    if text == HUB_ACK {
        return Ok(Datagram::HubAck);
    }
    if let Some(rest) = text.strip_prefix(KEY_PREFIX) {
        return Ok(Datagram::KeyReply(rest.trim_start_matches([':', '?']).to_owned()));
    }
    if text.starts_with('{') {
        return decode(text.as_bytes()).map(Datagram::Envelope);
    }
    Err(DecodeError::UnknownControlFrame(text.chars().take(32).collect()))
}

fn envelope_from_value(root: Value) -> Result<Envelope, DecodeError> {
    let Value::Object(mut root) = root else {
        return Err(DecodeError::MalformedJson("envelope is not an object".into()));
    };

    let message_id = root
        .get("msgId")
        .ok_or(DecodeError::MissingField("msgId"))
        .and_then(|v| {
            lenient_u16(v).ok_or(DecodeError::InvalidField {
                field: "msgId",
                expected: "16-bit integer",
            })
        })?;

    let action = match root.get("action") {
        None => return Err(DecodeError::MissingField("action")),
        Some(Value::String(s)) => {
            Action::parse(s).ok_or_else(|| DecodeError::UnknownAction(s.clone()))?
        }
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "action",
                expected: "string",
            });
        }
    };

    let Some(Value::Object(mut params)) = root.remove("params") else {
        return Err(DecodeError::MissingField("params"));
    };

    let device_tid = match params.get("devTid") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "devTid",
                expected: "string",
            });
        }
        None => return Err(DecodeError::MissingField("devTid")),
    };
    let ctrl_key = opaque_string(params.get("ctrlKey"));
    let app_tid = opaque_string(params.get("appTid"));

    let Some(Value::Object(mut data)) = params.remove("data") else {
        return Err(DecodeError::MissingField("data"));
    };

    let raw_cmd = data.remove("cmdId").ok_or(DecodeError::MissingField("cmdId"))?;
    let code = lenient_i64(&raw_cmd).ok_or(DecodeError::InvalidField {
        field: "cmdId",
        expected: "integer",
    })?;
    let command_id = CommandId::from_code(code).ok_or(DecodeError::UnknownCommand(code))?;

    Ok(Envelope {
        message_id,
        action,
        device_tid,
        ctrl_key,
        app_tid,
        body: CommandBody {
            command_id,
            args: data,
        },
    })
}

fn opaque_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_KEY.to_owned(),
    }
}

// ── Classification ───────────────────────────────────────────────────

/// Split an envelope into the reply path or the event path.
///
/// Only an `appReply` whose id is currently tracked is a reply. Everything
/// else, including replies for ids that already resolved or timed out, is
/// handed to event processing.
pub fn classify(envelope: Envelope, is_tracked: impl FnOnce(u16) -> bool) -> Inbound {
    let Envelope {
        message_id,
        action,
        body,
        ..
    } = envelope;

    if action == Action::AppReply && is_tracked(message_id) {
        return Inbound::Reply { message_id, body };
    }
    if action == Action::AppReply {
        tracing::debug!(
            message_id,
            command = %body.command_id,
            "untracked reply, handling as event"
        );
    }
    Inbound::Event { message_id, body }
}

// ── Lenient numerics ─────────────────────────────────────────────────

/// Parse a JSON number or numeric string as `i64`.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a JSON number or numeric string as `u16`.
pub fn lenient_u16(value: &Value) -> Option<u16> {
    lenient_i64(value).and_then(|n| u16::try_from(n).ok())
}
