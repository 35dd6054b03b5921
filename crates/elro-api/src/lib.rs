//! Wire layer for the ELRO Connects K1 hub: JSON envelopes over UDP port 1025.
//!
//! - **[`codec`]** encodes outbound envelopes and classifies inbound datagrams
//!   ([`Datagram`]: hub ack, key reply or [`Envelope`]). Replies and events
//!   are told apart by [`Inbound`].
//! - **[`CommandId`]** is the catalog of numeric command ids the hub speaks.
//! - **[`HubSocket`]** is a UDP socket connected to one hub, with
//!   non-blocking sends and the reconnect backoff schedule
//!   ([`calculate_backoff`]).
//!
//! Nothing here keeps session state; that lives in `elro-core`.

pub mod codec;
pub mod command;
pub mod error;
pub mod transport;

pub use codec::{Action, CommandBody, Datagram, Envelope, Inbound};
pub use command::CommandId;
pub use error::{DecodeError, Error};
pub use transport::{DEFAULT_PORT, HubSocket, ReconnectConfig, calculate_backoff};
