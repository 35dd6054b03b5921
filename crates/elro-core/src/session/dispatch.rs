// ── Inbound path ──
//
// Receive loop, frame routing between the tracker and the store, and
// synchronous subscriber fan-out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use elro_api::codec::{self, Datagram, Inbound};
use elro_api::{Action, CommandBody, DecodeError, Envelope, HubSocket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionStatus, Handler, Session, SubscriptionId, lock};
use crate::convert::{self, Frame};
use crate::model::{Device, DeviceEvent, DeviceEventKind, DevicePatch, DeviceType};

/// How a frame reached us; decides whether an unchanged update notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Unsolicited hub push: always notifies.
    Push,
    /// Reply to a request (ours or a stale one): notifies only on change.
    Reply,
}

pub(super) async fn receive_task(
    session: Session,
    socket: Arc<HubSocket>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = socket.recv() => received,
        };
        match received {
            Ok(bytes) => session.handle_datagram(&bytes, &socket),
            Err(e) if e.is_transient() => debug!(error = %e, "transient receive error"),
            Err(e) => warn!(error = %e, "receive error"),
        }
    }
    debug!("receive loop exiting");
}

impl Session {
    fn handle_datagram(&self, bytes: &[u8], socket: &HubSocket) {
        match codec::decode_datagram(bytes) {
            Ok(Datagram::HubAck) => {
                trace!("hub ack");
                self.note_inbound();
            }
            Ok(Datagram::KeyReply(key)) => {
                debug!(%key, "key reply");
                self.note_inbound();
            }
            Ok(Datagram::Envelope(envelope)) => {
                if let Err(e) = socket.try_send_ack() {
                    debug!(error = %e, "ack not sent");
                }
                self.note_inbound();
                self.dispatch_envelope(envelope);
            }
            // Well-formed but outside the catalog: the hub is alive.
            Err(DecodeError::UnknownCommand(code)) => {
                debug!(code, "ignoring unknown command id");
                self.note_inbound();
            }
            Err(e) => debug!(error = %e, len = bytes.len(), "dropping undecodable datagram"),
        }
    }

    /// Any valid frame proves the hub is reachable.
    fn note_inbound(&self) {
        let now = Instant::now();
        let recovered = {
            let mut core = lock(&self.inner.core);
            let recovered = match self.status() {
                ConnectionStatus::Connecting => {
                    core.last_heartbeat = Some(now);
                    self.set_status(ConnectionStatus::Connected);
                    false
                }
                ConnectionStatus::Degraded { attempt } => {
                    debug!(attempt, "hub answered while degraded");
                    core.reset_link();
                    core.last_heartbeat = Some(now);
                    self.set_status(ConnectionStatus::Connected);
                    true
                }
                _ => false,
            };
            core.last_inbound = Some(now);
            recovered
        };
        self.inner
            .state
            .send_modify(|s| s.last_inbound_at = Some(Utc::now()));

        if recovered {
            info!("hub reachable again, resynchronizing");
            self.spawn_sync("recovery");
        }
    }

    fn dispatch_envelope(&self, envelope: Envelope) {
        let push = envelope.action != Action::AppReply;
        let inbound = {
            let core = lock(&self.inner.core);
            codec::classify(envelope, |id| core.tracker.is_pending(id))
        };

        match inbound {
            Inbound::Reply { message_id, body } => {
                self.apply_body(&body, Delivery::Reply);
                let resolved = lock(&self.inner.core)
                    .tracker
                    .resolve(message_id, body, Instant::now());
                trace!(message_id, resolved, "reply routed");
            }
            Inbound::Event { message_id, body } => {
                trace!(message_id, command = %body.command_id, push, "event routed");
                let delivery = if push { Delivery::Push } else { Delivery::Reply };
                self.apply_body(&body, delivery);
            }
        }
    }

    /// Merge a frame into the store and notify when warranted.
    fn apply_body(&self, body: &CommandBody, delivery: Delivery) {
        let (index, patch, kind) = match convert::parse(body) {
            Frame::Status(status) => {
                let known = self
                    .inner
                    .store
                    .get(status.index)
                    .map_or(DeviceType::Unknown, |d| d.device_type);
                let index = status.index;
                let patch = status.into_patch(known);
                let kind = if patch.alarm_active == Some(true) {
                    DeviceEventKind::Alarm
                } else {
                    DeviceEventKind::Status
                };
                (index, patch, kind)
            }
            Frame::Name { index, name } => (
                index,
                DevicePatch {
                    name: Some(name),
                    ..DevicePatch::default()
                },
                DeviceEventKind::Name,
            ),
            Frame::Alarm { index } => (
                index,
                DevicePatch {
                    alarm_active: Some(true),
                    ..DevicePatch::default()
                },
                DeviceEventKind::Alarm,
            ),
            Frame::Invalid(reason) => {
                debug!(reason, command = %body.command_id, "unusable frame");
                return;
            }
            Frame::StatusListEnd | Frame::NameListEnd | Frame::Informational => return,
        };

        let applied = self.inner.store.apply(index, &patch, Utc::now());
        if delivery == Delivery::Push || applied.changed {
            if kind == DeviceEventKind::Alarm {
                warn!(index, name = %applied.device.display_name(), "alarm raised");
            }
            self.notify(kind, applied.device);
        }
    }

    /// Publish on the broadcast channel, then call every subscriber in
    /// registration order. A failing handler never stops the others.
    pub(super) fn notify(&self, kind: DeviceEventKind, device: Arc<Device>) {
        let event = Arc::new(DeviceEvent {
            kind,
            device,
            received_at: Utc::now(),
        });
        let _ = self.inner.event_tx.send(Arc::clone(&event));

        let handlers: Vec<(SubscriptionId, Handler)> = lock(&self.inner.subscribers).clone();
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subscription = id.0, error = %e, "device event handler failed");
                }
                Err(_) => error!(subscription = id.0, "device event handler panicked"),
            }
        }
    }
}
