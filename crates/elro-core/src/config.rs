// ── Runtime hub configuration ──
//
// Describes *how* to talk to one hub: address, identity and timing.
// Never touches disk; the CLI builds a `HubConfig` from a profile.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use elro_api::ReconnectConfig;
use elro_api::codec::DEFAULT_KEY;
use secrecy::SecretString;

use crate::error::CoreError;

/// Required prefix of a K1 hub device id.
pub const DEVICE_ID_PREFIX: &str = "ST_";

/// Configuration for one hub session.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub IP address.
    pub host: IpAddr,
    /// UDP port (1025 on every known hub).
    pub port: u16,
    /// Hub id, `ST_` followed by the hub MAC.
    pub device_id: String,
    /// Control key (opaque, `"0"` unless the hub was provisioned with one).
    pub ctrl_key: SecretString,
    /// App id (opaque, default `"0"`).
    pub app_id: String,

    /// Per-request reply deadline.
    pub transaction_timeout: Duration,
    /// Retransmissions after the first send before a request times out.
    pub retransmissions: u32,
    /// Heartbeat period while connected.
    pub heartbeat_interval: Duration,
    /// Silent heartbeat periods tolerated before degrading.
    pub missed_heartbeats: u32,
    /// Backoff for the handshake probe and reconnection.
    pub reconnect: ReconnectConfig,
    /// Time spent degraded before every device is marked offline.
    pub offline_grace: Duration,
    /// A device with no frame for this long is marked offline.
    pub device_stale_after: Duration,
    /// Periodic full sync. `None` disables it.
    pub sync_interval: Option<Duration>,
    /// Run a full sync in the background once connected.
    pub sync_on_connect: bool,
    /// Tick of the maintenance loop (expiry sweep granularity).
    pub sweep_interval: Duration,
}

impl HubConfig {
    /// Config with default timing for the given hub.
    pub fn new(host: IpAddr, device_id: impl Into<String>) -> Self {
        Self {
            host,
            port: elro_api::DEFAULT_PORT,
            device_id: device_id.into(),
            ctrl_key: SecretString::from(DEFAULT_KEY.to_owned()),
            app_id: DEFAULT_KEY.to_owned(),
            transaction_timeout: Duration::from_secs(3),
            retransmissions: 2,
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeats: 3,
            reconnect: ReconnectConfig::default(),
            offline_grace: Duration::from_secs(60),
            device_stale_after: Duration::from_secs(300),
            sync_interval: Some(Duration::from_secs(60)),
            sync_on_connect: true,
            sweep_interval: Duration::from_millis(250),
        }
    }

    pub fn hub_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Silence tolerated before the session degrades.
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats.max(1)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let suffix = self
            .device_id
            .strip_prefix(DEVICE_ID_PREFIX)
            .ok_or_else(|| CoreError::Config {
                message: format!(
                    "device id `{}` must start with `{DEVICE_ID_PREFIX}`",
                    self.device_id
                ),
            })?;
        if suffix.is_empty() {
            return Err(CoreError::Config {
                message: "device id has nothing after the `ST_` prefix".into(),
            });
        }
        if self.port == 0 {
            return Err(CoreError::Config {
                message: "port must be non-zero".into(),
            });
        }
        if self.transaction_timeout.is_zero()
            || self.heartbeat_interval.is_zero()
            || self.sweep_interval.is_zero()
        {
            return Err(CoreError::Config {
                message: "timeouts and intervals must be non-zero".into(),
            });
        }
        Ok(())
    }
}
