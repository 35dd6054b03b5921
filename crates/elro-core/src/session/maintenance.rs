// ── Maintenance loop ──
//
// One ticking task per connection: retransmission and expiry of pending
// requests, heartbeats, liveness, reconnect probes, offline marking and
// the periodic sync.

use std::time::Duration;

use chrono::Utc;
use elro_api::{Action, CommandBody, CommandId, HubSocket, calculate_backoff};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{ConnectionStatus, Session, SessionCore, lock};
use crate::model::DeviceEventKind;
use crate::transaction::Expired;

/// Heartbeats are fire-and-forget and never take a tracker id.
const HEARTBEAT_MESSAGE_ID: u16 = 0;

pub(super) async fn maintenance_task(session: Session, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(session.inner.config.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => session.maintain(Instant::now()),
        }
    }
    debug!("maintenance loop exiting");
}

/// Side effects decided under the core lock, performed after releasing it.
#[derive(Default)]
struct Followups {
    mark_offline: bool,
    sync: bool,
}

impl Session {
    fn maintain(&self, now: Instant) {
        let Some(socket) = self.inner.socket.load_full() else {
            return;
        };

        let followups = {
            let mut core = lock(&self.inner.core);
            sweep_expired(&mut core, &socket, now);
            match self.status() {
                ConnectionStatus::Connected => self.keep_alive(&mut core, &socket, now),
                ConnectionStatus::Degraded { .. } => self.probe(&mut core, &socket, now),
                _ => Followups::default(),
            }
        };

        if followups.mark_offline {
            let devices = self.inner.store.mark_all_offline();
            warn!(count = devices.len(), "hub unreachable, devices marked offline");
            for device in devices {
                self.notify(DeviceEventKind::Offline, device);
            }
        }

        let stale_after = chrono::Duration::from_std(self.inner.config.device_stale_after);
        if let Ok(stale_after) = stale_after {
            for device in self.inner.store.mark_stale(Utc::now() - stale_after) {
                debug!(index = device.index, "device stale, marked offline");
                self.notify(DeviceEventKind::Offline, device);
            }
        }

        if followups.sync {
            self.spawn_sync("periodic");
        }
    }

    fn keep_alive(&self, core: &mut SessionCore, socket: &HubSocket, now: Instant) -> Followups {
        let config = &self.inner.config;
        let silent_for = core
            .last_inbound
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        if silent_for >= config.liveness_window() {
            self.degrade(core, now, "hub silent");
            return Followups::default();
        }

        if core
            .last_heartbeat
            .is_none_or(|at| now.saturating_duration_since(at) >= config.heartbeat_interval)
        {
            self.send_heartbeat(socket);
            core.last_heartbeat = Some(now);
        }

        let mut followups = Followups::default();
        if let Some(period) = config.sync_interval {
            match core.next_sync_at {
                None => core.next_sync_at = Some(now + period),
                Some(at) if now >= at => {
                    core.next_sync_at = Some(now + period);
                    followups.sync = true;
                }
                Some(_) => {}
            }
        }
        followups
    }

    fn probe(&self, core: &mut SessionCore, socket: &HubSocket, now: Instant) -> Followups {
        let config = &self.inner.config;
        if core.next_probe_at.is_none_or(|at| now >= at) {
            if let Err(e) = socket.try_send_probe(&config.device_id) {
                debug!(error = %e, "reconnect probe not sent");
            }
            let delay = calculate_backoff(core.probe_attempt, &config.reconnect);
            core.probe_attempt = core.probe_attempt.saturating_add(1);
            core.next_probe_at = Some(now + delay);
            trace!(
                attempt = core.probe_attempt,
                next_in_ms = delay.as_millis(),
                "reconnect probe"
            );
            self.set_status(ConnectionStatus::Degraded {
                attempt: core.probe_attempt,
            });
        }

        let degraded_for = core
            .degraded_since
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        let mut followups = Followups::default();
        if !core.offline_marked && degraded_for >= config.offline_grace {
            core.offline_marked = true;
            followups.mark_offline = true;
        }
        followups
    }

    fn send_heartbeat(&self, socket: &HubSocket) {
        let envelope = self.envelope(
            HEARTBEAT_MESSAGE_ID,
            Action::Heartbeat,
            CommandBody::new(CommandId::TimeCheck),
        );
        match socket.try_send_envelope(&envelope) {
            Ok(_) => {
                self.inner
                    .state
                    .send_modify(|s| s.last_heartbeat_at = Some(Utc::now()));
                trace!("heartbeat sent");
            }
            Err(e) => debug!(error = %e, "heartbeat not sent"),
        }
    }
}

fn sweep_expired(core: &mut SessionCore, socket: &HubSocket, now: Instant) {
    for expired in core.tracker.expire_older_than(now) {
        match expired {
            Expired::Retransmit { message_id, frame } => {
                debug!(message_id, "retransmitting");
                if let Err(e) = socket.try_send(&frame) {
                    debug!(message_id, error = %e, "retransmission not sent");
                }
            }
            Expired::TimedOut { message_id } => debug!(message_id, "request timed out"),
        }
    }
}
