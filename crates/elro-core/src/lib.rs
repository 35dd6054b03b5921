//! Session, device state and sync between `elro-api` and consumers (CLI).
//!
//! - **[`Session`]** owns one hub connection: the handshake, heartbeats and
//!   liveness, reconnect probes, request/reply matching with retransmission,
//!   and synchronous fan-out of [`DeviceEvent`]s to subscribers.
//!
//! - **[`DeviceStore`]** keeps the last-known [`Device`] table keyed by hub
//!   index. Snapshots are index-ordered and published on a `watch` channel;
//!   [`DeviceStream`] is the subscription handle.
//!
//! - **[`Command`]** is the typed set of requests the hub accepts. Each one
//!   maps to an envelope and a [`ReplyShape`] the transaction tracker waits
//!   for.
//!
//! - **[`SyncReport`]** is the outcome of a full device refresh
//!   ([`Session::sync_devices`]); concurrent callers share one round.

pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod session;
pub mod store;
pub mod stream;
pub mod sync;
pub mod transaction;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::Command;
pub use config::HubConfig;
pub use error::CoreError;
pub use session::{BoxError, ConnectionStatus, Session, SessionState, SubscriptionId};
pub use store::DeviceStore;
pub use stream::{DeviceFilter, DeviceStream};
pub use sync::SyncReport;
pub use transaction::{PendingReply, Reply, ReplyShape};

pub use model::{
    Battery, ContactState, Device, DeviceEvent, DeviceEventKind, DevicePatch, DeviceType,
};
