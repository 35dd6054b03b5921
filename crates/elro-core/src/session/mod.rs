// ── Hub session ──
//
// Full lifecycle of one hub connection: handshake, keepalive, reply
// correlation, push-event fan-out and automatic recovery. Cheaply
// cloneable; every clone drives the same session.

mod dispatch;
mod maintenance;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use elro_api::{Action, CommandBody, Envelope, HubSocket, calculate_backoff, codec};
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::HubConfig;
use crate::convert::{self, Frame};
use crate::error::CoreError;
use crate::model::{Device, DeviceEvent};
use crate::store::DeviceStore;
use crate::stream::DeviceStream;
use crate::sync::SyncDriver;
use crate::transaction::{PendingReply, Reply, TransactionTracker};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No socket bound. `connect()` is allowed.
    Disconnected,
    /// Socket bound, handshake in progress.
    Connecting,
    Connected,
    /// Hub went silent; probing on the backoff schedule.
    Degraded { attempt: u32 },
    /// Shut down for good.
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Degraded { attempt } => write!(f, "degraded (probe {attempt})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Snapshot of the session published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    #[serde(flatten)]
    pub status: ConnectionStatus,
    pub hub_address: SocketAddr,
    pub device_id: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

// ── Subscriptions ────────────────────────────────────────────────────

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&DeviceEvent) -> Result<(), BoxError> + Send + Sync>;

/// Handle returned by [`Session::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ── Session ──────────────────────────────────────────────────────────

/// One logical session with one hub.
///
/// Create with [`Session::new`], then [`connect()`](Self::connect). The
/// session owns its socket, device store and background tasks; all store
/// and tracker mutation happens inside it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: HubConfig,
    store: DeviceStore,
    socket: ArcSwapOption<HubSocket>,
    state: watch::Sender<SessionState>,
    event_tx: broadcast::Sender<Arc<DeviceEvent>>,
    /// Tracker plus link timers. Never held across `.await`.
    core: Mutex<SessionCore>,
    subscribers: Mutex<Vec<(SubscriptionId, Handler)>>,
    next_subscription: AtomicU64,
    sync: SyncDriver,
    cancel: CancellationToken,
    /// Child token for the current connection; replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes connect / disconnect / shutdown.
    lifecycle: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct SessionCore {
    tracker: TransactionTracker,
    last_inbound: Option<Instant>,
    last_heartbeat: Option<Instant>,
    degraded_since: Option<Instant>,
    next_probe_at: Option<Instant>,
    probe_attempt: u32,
    offline_marked: bool,
    next_sync_at: Option<Instant>,
}

impl SessionCore {
    fn reset_link(&mut self) {
        self.last_inbound = None;
        self.last_heartbeat = None;
        self.degraded_since = None;
        self.next_probe_at = None;
        self.probe_attempt = 0;
        self.offline_marked = false;
        self.next_sync_at = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Create a session. Does NOT touch the network until `connect()`.
    pub fn new(config: HubConfig) -> Self {
        let (state, _) = watch::channel(SessionState {
            status: ConnectionStatus::Disconnected,
            hub_address: config.hub_addr(),
            device_id: config.device_id.clone(),
            last_heartbeat_at: None,
            last_inbound_at: None,
        });
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(SessionInner {
                config,
                store: DeviceStore::new(),
                socket: ArcSwapOption::empty(),
                state,
                event_tx,
                core: Mutex::new(SessionCore::default()),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                sync: SyncDriver::default(),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Bind the socket, start the background tasks and run the handshake.
    ///
    /// On success the session is `Connected` and (if configured) an initial
    /// sync runs in the background. If the hub never answers, the session
    /// is left `Degraded`, keeps probing on its own, and this returns
    /// `Timeout`.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        match self.status() {
            ConnectionStatus::Closed => return Err(CoreError::Closed),
            ConnectionStatus::Disconnected => {}
            _ => return Ok(()),
        }

        let config = &self.inner.config;
        config.validate()?;

        self.set_status(ConnectionStatus::Connecting);
        let socket = match HubSocket::bind(config.hub_addr()).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.set_status(ConnectionStatus::Disconnected);
                return Err(e.into());
            }
        };
        self.inner.socket.store(Some(Arc::clone(&socket)));

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *lock(&self.inner.cancel_child) = child.clone();
        lock(&self.inner.core).reset_link();

        self.track(tokio::spawn(dispatch::receive_task(
            self.clone(),
            Arc::clone(&socket),
            child.clone(),
        )));
        self.track(tokio::spawn(maintenance::maintenance_task(
            self.clone(),
            child,
        )));

        let answered = self.handshake(&socket).await;

        let mut core = lock(&self.inner.core);
        if answered || self.status().is_connected() {
            drop(core);
            info!(hub = %config.hub_addr(), "connected to hub");
            if config.sync_on_connect {
                self.spawn_sync("initial");
            }
            Ok(())
        } else {
            self.degrade(&mut core, Instant::now(), "handshake unanswered");
            Err(CoreError::timeout(config.transaction_timeout))
        }
    }

    /// Send `IOT_KEY?` probes until any valid frame moves us to `Connected`.
    async fn handshake(&self, socket: &HubSocket) -> bool {
        let config = &self.inner.config;
        let attempts = config.reconnect.max_retries.unwrap_or(0).saturating_add(1);
        let mut state = self.inner.state.subscribe();

        for attempt in 0..attempts {
            if let Err(e) = socket.try_send_probe(&config.device_id) {
                warn!(error = %e, attempt, "handshake probe not sent");
            }
            let answered = matches!(
                tokio::time::timeout(
                    config.transaction_timeout,
                    state.wait_for(|s| s.status.is_connected()),
                )
                .await,
                Ok(Ok(_))
            );
            if answered {
                return true;
            }
            if attempt + 1 < attempts {
                let delay = calculate_backoff(attempt, &config.reconnect);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "handshake unanswered, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// Tear down the connection. The session may `connect()` again.
    pub async fn disconnect(&self) {
        self.teardown(ConnectionStatus::Disconnected).await;
    }

    /// Tear down for good: `Closed`, subscribers dropped.
    pub async fn shutdown(&self) {
        self.teardown(ConnectionStatus::Closed).await;
        lock(&self.inner.subscribers).clear();
    }

    async fn teardown(&self, final_status: ConnectionStatus) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.status() == ConnectionStatus::Closed {
            return;
        }

        lock(&self.inner.cancel_child).cancel();
        if final_status == ConnectionStatus::Closed {
            self.inner.cancel.cancel();
        }

        let cancelled = {
            let mut core = lock(&self.inner.core);
            self.set_status(final_status);
            core.reset_link();
            core.tracker.cancel_all(&CoreError::Cancelled)
        };

        let handles = std::mem::take(&mut *lock(&self.inner.task_handles));
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(error = %e, "session task panicked");
                }
            }
        }

        self.inner.socket.store(None);
        self.inner.sync.reset();
        self.inner.store.clear();
        self.inner.state.send_modify(|s| {
            s.last_heartbeat_at = None;
            s.last_inbound_at = None;
        });
        debug!(cancelled, "session torn down");
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Register and transmit `command` without waiting for the reply.
    ///
    /// Fails immediately with `Disconnected` unless the session is
    /// connected, or with `Busy` when every message id is outstanding.
    pub fn submit(&self, command: &Command) -> Result<PendingReply, CoreError> {
        let config = &self.inner.config;
        let mut core = lock(&self.inner.core);
        match self.status() {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Closed => return Err(CoreError::Closed),
            _ => return Err(CoreError::Disconnected),
        }
        let socket = self
            .inner
            .socket
            .load_full()
            .ok_or(CoreError::Disconnected)?;

        let registration = core.tracker.register(
            command.reply_shape(),
            config.transaction_timeout,
            config.retransmissions,
            Instant::now(),
        )?;
        let message_id = registration.message_id;
        let frame = codec::encode(&self.envelope(message_id, Action::AppSend, command.body()));
        core.tracker.set_frame(message_id, frame.clone());

        match socket.try_send(&frame) {
            Ok(()) => debug!(message_id, command = %command.command_id(), "request sent"),
            Err(e) if e.is_transient() => {
                debug!(message_id, error = %e, "send deferred to retransmission");
            }
            Err(e) => {
                let err = CoreError::from(e);
                core.tracker.fail(message_id, err.clone());
                return Err(err);
            }
        }
        Ok(registration.reply)
    }

    /// Send `command` and wait for its reply.
    pub async fn send_command(&self, command: Command) -> Result<Reply, CoreError> {
        self.submit(&command)?.await
    }

    /// Sound a device's test alarm; completes on the hub's acknowledgement.
    pub async fn test_alarm(&self, index: u16) -> Result<(), CoreError> {
        let device = self.inner.store.get(index)?;
        self.send_command(Command::TestAlarm {
            index,
            device_type: device.device_type,
        })
        .await
        .map(|_| ())
    }

    /// Fetch the name table; names are merged into the store as they arrive.
    pub async fn get_device_names(&self) -> Result<Vec<Arc<Device>>, CoreError> {
        let reply = self.send_command(Command::QueryNames).await?;
        Ok(reply
            .frames
            .iter()
            .filter_map(|body| match convert::parse(body) {
                Frame::Name { index, .. } => self.inner.store.get(index).ok(),
                _ => None,
            })
            .collect())
    }

    /// Select a scene group (arm / disarm profile).
    pub async fn set_scene_group(&self, group: u8) -> Result<(), CoreError> {
        self.send_command(Command::ChooseSceneGroup { group })
            .await
            .map(|_| ())
    }

    // ── Event subscription ───────────────────────────────────────────

    /// Register a handler invoked synchronously, in registration order, for
    /// every device event. Errors and panics are logged and swallowed.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Broadcast receiver for device events (async consumers).
    pub fn events(&self) -> broadcast::Receiver<Arc<DeviceEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.borrow().status.clone()
    }

    pub fn current_devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.all()
    }

    pub fn device(&self, index: u16) -> Result<Arc<Device>, CoreError> {
        self.inner.store.get(index)
    }

    pub fn devices(&self) -> DeviceStream {
        self.inner.store.subscribe()
    }

    // ── Internals shared with submodules and the sync driver ─────────

    pub(crate) fn store(&self) -> &DeviceStore {
        &self.inner.store
    }

    pub(crate) fn sync_driver(&self) -> &SyncDriver {
        &self.inner.sync
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.inner.state.send_if_modified(|s| {
            if s.status == status {
                return false;
            }
            debug!(from = %s.status, to = %status, "session state");
            s.status = status;
            true
        });
    }

    fn envelope(&self, message_id: u16, action: Action, body: CommandBody) -> Envelope {
        let config = &self.inner.config;
        Envelope {
            message_id,
            action,
            device_tid: config.device_id.clone(),
            ctrl_key: config.ctrl_key.expose_secret().to_owned(),
            app_tid: config.app_id.clone(),
            body,
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = lock(&self.inner.task_handles);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Run a sync in the background, joining one already in flight.
    fn spawn_sync(&self, reason: &'static str) {
        let session = self.clone();
        self.track(tokio::spawn(async move {
            match session.sync_devices().await {
                Ok(report) => debug!(
                    reason,
                    devices = report.devices.len(),
                    failed = report.failed.len(),
                    "background sync finished"
                ),
                Err(e) => debug!(reason, error = %e, "background sync failed"),
            }
        }));
    }

    /// Enter `Degraded`: fail in-flight requests and start probing.
    fn degrade(&self, core: &mut SessionCore, now: Instant, reason: &'static str) {
        let failed = core.tracker.cancel_all(&CoreError::Disconnected);
        core.reset_link();
        core.degraded_since = Some(now);
        core.next_probe_at = Some(now);
        self.set_status(ConnectionStatus::Degraded { attempt: 0 });
        warn!(reason, failed, "hub session degraded");
    }
}
