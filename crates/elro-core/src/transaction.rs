// ── Transaction tracker ──
//
// Correlates hub replies with outstanding requests by message id. Owns id
// allocation, per-request deadlines, retransmission bookkeeping and the
// accumulation of multi-frame list replies. Purely synchronous: the session
// drives it under its state mutex and supplies the clock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use elro_api::CommandBody;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::convert;
use crate::error::CoreError;

type ReplyResult = Result<Reply, CoreError>;

/// What a complete reply looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// First matching frame completes the transaction.
    Single,
    /// Status frames until a `STATUES` terminator.
    StatusList,
    /// Name frames until a `NAME_OVER` terminator.
    NameList,
}

impl ReplyShape {
    fn is_terminator(self, body: &CommandBody) -> bool {
        match self {
            Self::Single => true,
            Self::StatusList => convert::is_status_list_end(body),
            Self::NameList => convert::is_name_list_end(body),
        }
    }
}

/// A completed reply: every frame received for one message id, in order,
/// without the list terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message_id: u16,
    pub frames: Vec<CommandBody>,
}

/// A freshly registered transaction.
#[derive(Debug)]
pub struct Registration {
    pub message_id: u16,
    pub reply: PendingReply,
}

/// Outcome of an expiry sweep for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expired {
    /// Deadline passed with retransmissions left: resend `frame` as-is.
    Retransmit { message_id: u16, frame: Bytes },
    /// No retransmissions left; the caller received `Timeout`.
    TimedOut { message_id: u16 },
}

struct Pending {
    shape: ReplyShape,
    issued_at: Instant,
    deadline: Instant,
    timeout: Duration,
    retries_left: u32,
    frame: Option<Bytes>,
    frames: Vec<CommandBody>,
    tx: oneshot::Sender<ReplyResult>,
}

impl Pending {
    fn finish(self, result: ReplyResult) {
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = self.tx.send(result);
    }
}

// ── TransactionTracker ───────────────────────────────────────────────

pub struct TransactionTracker {
    pending: HashMap<u16, Pending>,
    last_id: u16,
    max_id: u16,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::with_id_space(u16::MAX)
    }

    /// Tracker allocating ids in `1..=max_id`.
    pub fn with_id_space(max_id: u16) -> Self {
        Self {
            pending: HashMap::new(),
            last_id: 0,
            max_id: max_id.max(1),
        }
    }

    /// Allocate an id and start tracking a request.
    ///
    /// Fails with `Busy` when every id in the space is pending.
    pub fn register(
        &mut self,
        shape: ReplyShape,
        timeout: Duration,
        retries: u32,
        now: Instant,
    ) -> Result<Registration, CoreError> {
        let message_id = self.allocate().ok_or(CoreError::Busy)?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            message_id,
            Pending {
                shape,
                issued_at: now,
                deadline: now + timeout,
                timeout,
                retries_left: retries,
                frame: None,
                frames: Vec::new(),
                tx,
            },
        );
        Ok(Registration {
            message_id,
            reply: PendingReply { message_id, rx },
        })
    }

    /// Remember the encoded frame so expiry can retransmit it.
    pub fn set_frame(&mut self, message_id: u16, frame: Bytes) {
        if let Some(p) = self.pending.get_mut(&message_id) {
            p.frame = Some(frame);
        }
    }

    /// Stop tracking `message_id`, failing its caller with `error`.
    pub fn fail(&mut self, message_id: u16, error: CoreError) -> bool {
        self.pending
            .remove(&message_id)
            .map(|p| p.finish(Err(error)))
            .is_some()
    }

    /// Feed one reply frame. `false` if nothing is waiting on `message_id`.
    ///
    /// Single-shaped transactions complete on the first frame. List-shaped
    /// ones accumulate until the terminator; each new frame pushes the
    /// deadline out and exact duplicates are ignored.
    pub fn resolve(&mut self, message_id: u16, body: CommandBody, now: Instant) -> bool {
        let Some(pending) = self.pending.get_mut(&message_id) else {
            tracing::trace!(message_id, "stale reply dropped");
            return false;
        };

        if !pending.shape.is_terminator(&body) {
            if !pending.frames.contains(&body) {
                pending.frames.push(body);
                pending.deadline = now + pending.timeout;
            }
            return true;
        }

        if let Some(mut done) = self.pending.remove(&message_id) {
            if done.shape == ReplyShape::Single {
                done.frames.push(body);
            }
            tracing::trace!(
                message_id,
                frames = done.frames.len(),
                elapsed_ms = u64::try_from(now.saturating_duration_since(done.issued_at).as_millis())
                    .unwrap_or(u64::MAX),
                "transaction resolved"
            );
            let frames = std::mem::take(&mut done.frames);
            done.finish(Ok(Reply { message_id, frames }));
        }
        true
    }

    /// Sweep deadlines: retransmit where retries remain, time out the rest.
    pub fn expire_older_than(&mut self, now: Instant) -> Vec<Expired> {
        let due: Vec<u16> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for message_id in due {
            let retransmit = self.pending.get_mut(&message_id).and_then(|p| {
                if p.retries_left == 0 {
                    return None;
                }
                let frame = p.frame.clone()?;
                p.retries_left -= 1;
                p.deadline = now + p.timeout;
                Some(frame)
            });

            match retransmit {
                Some(frame) => expired.push(Expired::Retransmit { message_id, frame }),
                None => {
                    if let Some(p) = self.pending.remove(&message_id) {
                        let timeout = p.timeout;
                        p.finish(Err(CoreError::timeout(timeout)));
                    }
                    expired.push(Expired::TimedOut { message_id });
                }
            }
        }
        expired
    }

    /// Fail every pending transaction with `error`. Returns how many.
    pub fn cancel_all(&mut self, error: &CoreError) -> usize {
        let count = self.pending.len();
        for (_, p) in self.pending.drain() {
            p.finish(Err(error.clone()));
        }
        count
    }

    pub fn is_pending(&self, message_id: u16) -> bool {
        self.pending.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Next free id after the last one handed out, wrapping and skipping 0.
    fn allocate(&mut self) -> Option<u16> {
        for _ in 0..self.max_id {
            self.last_id = if self.last_id >= self.max_id {
                1
            } else {
                self.last_id + 1
            };
            if !self.pending.contains_key(&self.last_id) {
                return Some(self.last_id);
            }
        }
        None
    }
}

// ── PendingReply ─────────────────────────────────────────────────────

/// Handle to an in-flight request; resolves when the tracker completes it.
#[derive(Debug)]
pub struct PendingReply {
    message_id: u16,
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    pub fn message_id(&self) -> u16 {
        self.message_id
    }
}

impl Future for PendingReply {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CoreError::Cancelled)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use elro_api::CommandId;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn status(index: u16) -> CommandBody {
        CommandBody::new(CommandId::DeviceStatusUpdate)
            .with_arg("device_ID", index)
            .with_arg("device_status", "0464AA")
    }

    fn status_end() -> CommandBody {
        CommandBody::new(CommandId::DeviceStatusUpdate).with_arg("device_name", "STATUES")
    }

    #[test]
    fn ids_skip_zero_and_wrap() {
        let mut tracker = TransactionTracker::with_id_space(3);
        let now = Instant::now();
        let a = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let b = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        assert_eq!((a.message_id, b.message_id), (1, 2));

        assert!(tracker.resolve(1, status(1), now));
        let c = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let d = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        // 3 is next, then wraps past 0 to the freed 1.
        assert_eq!((c.message_id, d.message_id), (3, 1));
    }

    #[test]
    fn busy_when_every_id_is_pending() {
        let mut tracker = TransactionTracker::with_id_space(2);
        let now = Instant::now();
        let _a = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let _b = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        assert_eq!(
            tracker
                .register(ReplyShape::Single, TIMEOUT, 0, now)
                .unwrap_err(),
            CoreError::Busy
        );
    }

    #[test]
    fn reply_is_delivered_once() {
        let mut tracker = TransactionTracker::new();
        let now = Instant::now();
        let reg = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let mut reply = task::spawn(reg.reply);
        assert_pending!(reply.poll());

        assert!(tracker.resolve(reg.message_id, status(3), now));
        assert!(!tracker.resolve(reg.message_id, status(3), now));

        let reply = assert_ready!(reply.poll()).unwrap();
        assert_eq!(reply.frames, vec![status(3)]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn out_of_order_replies_match_by_id() {
        let mut tracker = TransactionTracker::new();
        let now = Instant::now();
        let first = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let second = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let mut first_reply = task::spawn(first.reply);
        let mut second_reply = task::spawn(second.reply);

        tracker.resolve(second.message_id, status(2), now);
        tracker.resolve(first.message_id, status(1), now);

        let a = assert_ready!(first_reply.poll()).unwrap();
        let b = assert_ready!(second_reply.poll()).unwrap();
        assert_eq!(a.frames, vec![status(1)]);
        assert_eq!(b.frames, vec![status(2)]);
    }

    #[test]
    fn list_reply_accumulates_until_terminator() {
        let mut tracker = TransactionTracker::new();
        let start = Instant::now();
        let reg = tracker
            .register(ReplyShape::StatusList, TIMEOUT, 0, start)
            .unwrap();
        let id = reg.message_id;
        let mut reply = task::spawn(reg.reply);

        tracker.resolve(id, status(1), start);
        tracker.resolve(id, status(1), start);
        // A frame near the original deadline extends it.
        let late = start + Duration::from_millis(2900);
        tracker.resolve(id, status(2), late);
        assert!(tracker.expire_older_than(start + TIMEOUT).is_empty());
        assert_pending!(reply.poll());

        tracker.resolve(id, status_end(), late);
        let reply = assert_ready!(reply.poll()).unwrap();
        assert_eq!(reply.frames, vec![status(1), status(2)]);
    }

    #[test]
    fn expiry_retransmits_same_frame_then_times_out() {
        let mut tracker = TransactionTracker::new();
        let start = Instant::now();
        let reg = tracker.register(ReplyShape::Single, TIMEOUT, 1, start).unwrap();
        let id = reg.message_id;
        tracker.set_frame(id, Bytes::from_static(b"frame"));
        let mut reply = task::spawn(reg.reply);

        assert!(tracker.expire_older_than(start + Duration::from_secs(1)).is_empty());

        let first = tracker.expire_older_than(start + TIMEOUT);
        assert_eq!(
            first,
            vec![Expired::Retransmit {
                message_id: id,
                frame: Bytes::from_static(b"frame")
            }]
        );
        assert!(tracker.is_pending(id));
        assert_pending!(reply.poll());

        let second = tracker.expire_older_than(start + TIMEOUT * 2);
        assert_eq!(second, vec![Expired::TimedOut { message_id: id }]);
        let err = assert_ready!(reply.poll()).unwrap_err();
        assert_eq!(err, CoreError::Timeout { timeout_ms: 3000 });

        // A late reply after timeout is stale.
        assert!(!tracker.resolve(id, status(1), start + TIMEOUT * 3));
    }

    #[test]
    fn reply_before_deadline_never_times_out() {
        let mut tracker = TransactionTracker::new();
        let start = Instant::now();
        let reg = tracker.register(ReplyShape::Single, TIMEOUT, 0, start).unwrap();
        tracker.resolve(reg.message_id, status(1), start + Duration::from_secs(1));
        assert!(tracker.expire_older_than(start + TIMEOUT * 10).is_empty());
    }

    #[test]
    fn cancel_all_fails_every_waiter() {
        let mut tracker = TransactionTracker::new();
        let now = Instant::now();
        let a = tracker.register(ReplyShape::Single, TIMEOUT, 0, now).unwrap();
        let b = tracker.register(ReplyShape::NameList, TIMEOUT, 0, now).unwrap();
        let mut a = task::spawn(a.reply);
        let mut b = task::spawn(b.reply);

        assert_eq!(tracker.cancel_all(&CoreError::Cancelled), 2);
        assert_eq!(assert_ready!(a.poll()).unwrap_err(), CoreError::Cancelled);
        assert_eq!(assert_ready!(b.poll()).unwrap_err(), CoreError::Cancelled);
        assert!(tracker.is_empty());
    }

    #[test]
    fn dropped_tracker_reports_cancelled() {
        let mut tracker = TransactionTracker::new();
        let reg = tracker
            .register(ReplyShape::Single, TIMEOUT, 0, Instant::now())
            .unwrap();
        let mut reply = task::spawn(reg.reply);
        drop(tracker);
        assert_eq!(assert_ready!(reply.poll()).unwrap_err(), CoreError::Cancelled);
    }
}
