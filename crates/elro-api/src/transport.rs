// ── Hub socket ──
//
// A UDP socket connected to one hub. Sends are non-blocking (`try_send`)
// so callers can register and transmit a frame without awaiting; receives
// are async and only ever block on socket input.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::codec::{self, APP_ACK, Envelope};
use crate::error::Error;

/// UDP port the K1 hub listens on.
pub const DEFAULT_PORT: u16 = 1025;

const MAX_DATAGRAM: usize = 4096;

// ── HubSocket ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct HubSocket {
    socket: UdpSocket,
}

impl HubSocket {
    /// Bind an ephemeral local port and connect it to `peer`.
    pub async fn bind(peer: SocketAddr) -> Result<Self, Error> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        tracing::debug!(%peer, local = ?socket.local_addr().ok(), "hub socket bound");
        Ok(Self { socket })
    }

    /// Send one datagram without waiting for socket readiness.
    pub fn try_send(&self, frame: &[u8]) -> Result<(), Error> {
        match self.socket.try_send(frame) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::WouldBlock),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Encode and send an envelope, returning the frame for retransmission.
    pub fn try_send_envelope(&self, envelope: &Envelope) -> Result<Bytes, Error> {
        let frame = codec::encode(envelope);
        self.try_send(&frame)?;
        tracing::trace!(
            message_id = envelope.message_id,
            command = %envelope.body.command_id,
            "sent envelope"
        );
        Ok(frame)
    }

    /// Send the `IOT_KEY?` handshake probe.
    pub fn try_send_probe(&self, device_tid: &str) -> Result<(), Error> {
        self.try_send(&codec::key_probe(device_tid))
    }

    /// Acknowledge a JSON frame received from the hub.
    pub fn try_send_ack(&self) -> Result<(), Error> {
        self.try_send(APP_ACK)
    }

    /// Wait for the next datagram from the hub.
    pub async fn recv(&self) -> Result<Bytes, Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff for handshake probes and reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Probe retries during `connect()` before falling back to `Degraded`.
    /// `None` means keep probing until the transaction timeout budget runs out
    /// once; reconnection from `Degraded` always continues indefinitely.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(3),
        }
    }
}

/// Backoff delay for the given attempt (0-based), capped and jittered.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}
