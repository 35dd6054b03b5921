// ── Discovery / sync driver ──
//
// Full refresh of the device table: enumerate every paired device, then
// query name and status for each one concurrently. Concurrent callers
// share a single in-flight round.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::convert;
use crate::error::CoreError;
use crate::session::Session;

/// Outcome of one sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Every index the hub enumerated, ascending.
    pub devices: Vec<u16>,
    /// Indices whose name and status were both refreshed.
    pub refreshed: Vec<u16>,
    /// Indices whose refresh failed; their state is now unknown.
    pub failed: Vec<u16>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

type SyncRound = Shared<BoxFuture<'static, Result<SyncReport, CoreError>>>;

/// Coalesces overlapping sync requests onto one round.
#[derive(Default)]
pub(crate) struct SyncDriver {
    in_flight: Mutex<Option<SyncRound>>,
}

impl SyncDriver {
    /// Join the running round or start a new one. The flag is `true` when
    /// this call started it.
    fn join_or_start(
        &self,
        start: impl FnOnce() -> BoxFuture<'static, Result<SyncReport, CoreError>>,
    ) -> (SyncRound, bool) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = slot.as_ref().filter(|round| round.peek().is_none()) {
            return (running.clone(), false);
        }
        let round = start().shared();
        *slot = Some(round.clone());
        (round, true)
    }

    /// Forget the current round (session teardown).
    pub(crate) fn reset(&self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Session {
    /// Refresh every device from the hub.
    ///
    /// Fails only when the enumeration itself fails or the link drops
    /// mid-round. A device whose own queries time out is marked unknown
    /// and listed in [`SyncReport::failed`].
    pub async fn sync_devices(&self) -> Result<SyncReport, CoreError> {
        let session = self.clone();
        let (round, started) = self
            .sync_driver()
            .join_or_start(move || run_round(session).boxed());
        if !started {
            debug!("joining sync already in progress");
        }
        round.await
    }
}

async fn run_round(session: Session) -> Result<SyncReport, CoreError> {
    let started_at = Utc::now();
    let listing = session.send_command(Command::QueryAllStatus).await?;

    let mut devices: Vec<u16> = listing
        .frames
        .iter()
        .filter_map(convert::status_index)
        .collect();
    devices.sort_unstable();
    devices.dedup();
    debug!(count = devices.len(), "devices enumerated");

    let outcomes = join_all(devices.iter().map(|&index| {
        let session = session.clone();
        async move {
            let (name, status) = tokio::join!(
                session.send_command(Command::QueryDeviceName { index }),
                session.send_command(Command::QueryDeviceStatus { index }),
            );
            (index, name.and(status))
        }
    }))
    .await;

    let mut refreshed = Vec::with_capacity(outcomes.len());
    let mut failed = Vec::new();
    for (index, outcome) in outcomes {
        match outcome {
            Ok(_) => refreshed.push(index),
            Err(e @ (CoreError::Disconnected | CoreError::Cancelled | CoreError::Closed)) => {
                return Err(e);
            }
            Err(e) => {
                warn!(index, error = %e, "device refresh failed");
                session.store().mark_unknown(index);
                failed.push(index);
            }
        }
    }

    info!(
        devices = devices.len(),
        failed = failed.len(),
        "device sync complete"
    );
    Ok(SyncReport {
        devices,
        refreshed,
        failed,
        started_at,
        finished_at: Utc::now(),
    })
}
