#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elro_api::codec::{self, HUB_ACK};
use elro_api::{Action, CommandId, Envelope, ReconnectConfig};
use elro_core::{
    Battery, Command, ConnectionStatus, ContactState, CoreError, DeviceEventKind, HubConfig,
    Session,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const DEVICE_ID: &str = "ST_0123456789ab";

// ── Fake hub ─────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Sensor {
    index: u16,
    type_code: &'static str,
    status: &'static str,
    name: &'static str,
}

const DOOR: Sensor = Sensor {
    index: 1,
    type_code: "0101",
    status: "0464AAFF",
    name: "Front door",
};
const SMOKE: Sensor = Sensor {
    index: 2,
    type_code: "0005",
    status: "0450AAFF",
    name: "Hallway",
};
const CO: Sensor = Sensor {
    index: 3,
    type_code: "0000",
    status: "0437AAFF",
    name: "Boiler room",
};

fn status_data(sensor: &Sensor, status: &str) -> Value {
    json!({
        "cmdId": 19,
        "device_ID": sensor.index,
        "device_name": sensor.type_code,
        "device_status": status,
    })
}

fn name_data(sensor: &Sensor) -> Value {
    let mut hex: String = sensor.name.bytes().map(|b| format!("{b:02x}")).collect();
    while hex.len() < 32 {
        hex.push_str("00");
    }
    json!({ "cmdId": 17, "answer_content": format!("{:04x}{hex}", sensor.index) })
}

fn frame(message_id: u16, action: &str, data: Value) -> String {
    json!({
        "msgId": message_id,
        "action": action,
        "params": { "devTid": DEVICE_ID, "data": data },
    })
    .to_string()
}

/// Answers like a K1 hub for a fixed set of sensors.
struct FakeHub {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    responsive: Arc<AtomicBool>,
    duplicate_replies: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<Envelope>>>,
    client: Arc<Mutex<Option<SocketAddr>>>,
    task: JoinHandle<()>,
}

impl FakeHub {
    async fn start(sensors: Vec<Sensor>, ignored: Vec<CommandId>) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let responsive = Arc::new(AtomicBool::new(true));
        let duplicate_replies = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(Mutex::new(None));

        let task = tokio::spawn({
            let socket = Arc::clone(&socket);
            let responsive = Arc::clone(&responsive);
            let duplicate_replies = Arc::clone(&duplicate_replies);
            let received = Arc::clone(&received);
            let client = Arc::clone(&client);
            async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                        break;
                    };
                    *client.lock().unwrap() = Some(from);
                    if !responsive.load(Ordering::SeqCst) {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                    if text.starts_with("IOT_KEY?") {
                        socket.send_to(HUB_ACK.as_bytes(), from).await.unwrap();
                        continue;
                    }
                    let Ok(env) = codec::decode(text.as_bytes()) else {
                        continue;
                    };
                    received.lock().unwrap().push(env.clone());
                    if env.action == Action::Heartbeat {
                        socket.send_to(HUB_ACK.as_bytes(), from).await.unwrap();
                        continue;
                    }
                    if ignored.contains(&env.body.command_id) {
                        continue;
                    }
                    let copies = if duplicate_replies.load(Ordering::SeqCst) {
                        2
                    } else {
                        1
                    };
                    for data in respond(&sensors, &env) {
                        let reply = frame(env.message_id, "appReply", data);
                        for _ in 0..copies {
                            socket.send_to(reply.as_bytes(), from).await.unwrap();
                        }
                    }
                }
            }
        });

        Self {
            socket,
            addr,
            responsive,
            duplicate_replies,
            received,
            client,
            task,
        }
    }

    fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Send every reply datagram twice, as a lossy network might.
    fn set_duplicate_replies(&self, duplicate: bool) {
        self.duplicate_replies.store(duplicate, Ordering::SeqCst);
    }

    fn count(&self, command: CommandId) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|env| env.action == Action::AppSend && env.body.command_id == command)
            .count()
    }

    fn last(&self, command: CommandId) -> Option<Envelope> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|env| env.body.command_id == command)
            .cloned()
    }

    /// Unsolicited `appSend` frame to the connected session.
    async fn push(&self, data: Value) {
        let client = self.client.lock().unwrap().unwrap();
        let push = frame(0, "appSend", data);
        self.socket.send_to(push.as_bytes(), client).await.unwrap();
    }
}

impl Drop for FakeHub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn respond(sensors: &[Sensor], env: &Envelope) -> Vec<Value> {
    let index = env.body.arg_u16("device_ID");
    let sensor = index.and_then(|i| sensors.iter().find(|s| s.index == i));

    match env.body.command_id {
        CommandId::GetAllEquipmentStatus => sensors
            .iter()
            .map(|s| status_data(s, s.status))
            .chain([json!({ "cmdId": 19, "device_name": "STATUES" })])
            .collect(),
        CommandId::GetDeviceName if index == Some(0) => sensors
            .iter()
            .map(name_data)
            .chain([json!({ "cmdId": 17, "answer_content": "NAME_OVER" })])
            .collect(),
        CommandId::GetDeviceName => sensor.map(name_data).into_iter().collect(),
        CommandId::SynDeviceStatus => sensor.map(|s| status_data(s, s.status)).into_iter().collect(),
        CommandId::EquipmentControl => sensor
            .map(|s| status_data(s, "0464BBFF"))
            .into_iter()
            .collect(),
        CommandId::ChooseSceneGroup => vec![json!({
            "cmdId": 26,
            "sence_group": env.body.arg("sence_group").cloned().unwrap_or(Value::Null),
        })],
        _ => Vec::new(),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn test_config(hub: SocketAddr) -> HubConfig {
    let mut config = HubConfig::new(hub.ip(), DEVICE_ID);
    config.port = hub.port();
    config.transaction_timeout = ms(200);
    config.retransmissions = 1;
    config.heartbeat_interval = ms(100);
    config.missed_heartbeats = 3;
    config.reconnect = ReconnectConfig {
        initial_delay: ms(50),
        max_delay: ms(200),
        max_retries: Some(1),
    };
    config.sync_interval = None;
    config.sync_on_connect = false;
    config.sweep_interval = ms(20);
    config
}

async fn connected(hub: &FakeHub) -> Session {
    connected_with(test_config(hub.addr)).await
}

async fn connected_with(config: HubConfig) -> Session {
    let session = Session::new(config);
    session.connect().await.unwrap();
    session
}

/// Count events of one kind delivered to a subscriber.
fn count_events(session: &Session, kind: DeviceEventKind) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    session.subscribe({
        let calls = Arc::clone(&calls);
        move |event| {
            if event.kind == kind {
                calls.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    });
    calls
}

async fn wait_for_status(session: &Session, want: impl Fn(&ConnectionStatus) -> bool) {
    let mut state = session.state();
    tokio::time::timeout(Duration::from_secs(3), state.wait_for(|s| want(&s.status)))
        .await
        .unwrap()
        .unwrap();
}

async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(ms(10)).await;
        }
    })
    .await
    .unwrap();
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_connects() {
    let hub = FakeHub::start(vec![CO], Vec::new()).await;
    let session = connected(&hub).await;

    assert_eq!(session.status(), ConnectionStatus::Connected);
    let state = session.state().borrow().clone();
    assert_eq!(state.hub_address, hub.addr);
    assert!(state.last_inbound_at.is_some());

    session.shutdown().await;
}

#[tokio::test]
async fn status_reply_resolves_request_and_updates_store() {
    let hub = FakeHub::start(vec![CO], Vec::new()).await;
    let session = connected(&hub).await;

    let reply = session
        .send_command(Command::QueryDeviceStatus { index: 3 })
        .await
        .unwrap();
    assert_eq!(reply.frames.len(), 1);

    let device = session.device(3).unwrap();
    assert_eq!(device.battery, Battery::Percent(55));
    assert_eq!(device.alarm_active, Some(false));
    assert!(device.online);

    let sent = hub.last(CommandId::SynDeviceStatus).unwrap();
    assert_eq!(sent.message_id, reply.message_id);
    assert_eq!(sent.device_tid, DEVICE_ID);

    session.shutdown().await;
}

#[tokio::test]
async fn push_alarm_notifies_each_subscriber_once() {
    let hub = FakeHub::start(vec![SMOKE], Vec::new()).await;
    let session = connected(&hub).await;

    // A failing and a panicking handler must not starve the others.
    session.subscribe(|_| Err("handler refused".into()));
    session.subscribe(|_| panic!("handler blew up"));

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    for counter in [&first, &second] {
        let counter = Arc::clone(counter);
        session.subscribe(move |event| {
            assert_eq!(event.device.index, 5);
            assert_eq!(event.kind, DeviceEventKind::Alarm);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let mut events = session.events();

    let siren = Sensor {
        index: 5,
        ..SMOKE
    };
    hub.push(status_data(&siren, "0464BBFF")).await;

    eventually(|| second.load(Ordering::SeqCst) >= 1).await;
    tokio::time::sleep(ms(100)).await;
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.device.index, 5);
    assert!(session.device(5).unwrap().in_alarm());

    session.shutdown().await;
}

#[tokio::test]
async fn unsubscribed_handler_is_not_called() {
    let hub = FakeHub::start(vec![DOOR], Vec::new()).await;
    let session = connected(&hub).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let id = session.subscribe({
        let calls = Arc::clone(&calls);
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    assert!(session.unsubscribe(id));
    assert!(!session.unsubscribe(id));

    let mut events = session.events();
    hub.push(status_data(&DOOR, "0464BBFF")).await;
    let event = events.recv().await.unwrap();
    assert_eq!(event.device.state, ContactState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn silent_hub_degrades_then_recovers() {
    let hub = FakeHub::start(vec![DOOR], Vec::new()).await;
    let session = connected(&hub).await;

    hub.set_responsive(false);
    wait_for_status(&session, |s| matches!(s, ConnectionStatus::Degraded { .. })).await;

    let err = session
        .send_command(Command::QueryAllStatus)
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::Disconnected);

    hub.set_responsive(true);
    wait_for_status(&session, ConnectionStatus::is_connected).await;
    assert!(session.send_command(Command::QueryAllStatus).await.is_ok());

    session.shutdown().await;
}

#[tokio::test]
async fn unanswered_handshake_times_out_degraded() {
    let hub = FakeHub::start(Vec::new(), Vec::new()).await;
    hub.set_responsive(false);

    let session = Session::new(test_config(hub.addr));
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }));
    assert!(matches!(
        session.status(),
        ConnectionStatus::Degraded { .. }
    ));

    // The session keeps probing and picks the hub up once it answers.
    hub.set_responsive(true);
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn unanswered_request_is_retransmitted_then_times_out() {
    let hub = FakeHub::start(vec![DOOR], vec![CommandId::ChooseSceneGroup]).await;
    let session = connected(&hub).await;

    let err = session.set_scene_group(1).await.unwrap_err();
    assert_eq!(err, CoreError::Timeout { timeout_ms: 200 });
    assert_eq!(hub.count(CommandId::ChooseSceneGroup), 2);
    assert_eq!(session.status(), ConnectionStatus::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn concurrent_syncs_share_one_round() {
    let hub = FakeHub::start(vec![DOOR, SMOKE, CO], Vec::new()).await;
    let session = connected(&hub).await;

    let (a, b) = tokio::join!(session.sync_devices(), session.sync_devices());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(a.devices, [1, 2, 3]);
    assert_eq!(a.refreshed, [1, 2, 3]);
    assert!(a.failed.is_empty());
    assert_eq!(hub.count(CommandId::GetAllEquipmentStatus), 1);

    let door = session.device(1).unwrap();
    assert_eq!(door.name.as_deref(), Some("Front door"));
    assert_eq!(door.state, ContactState::Closed);
    assert_eq!(session.device(2).unwrap().battery, Battery::Percent(80));
    assert_eq!(session.current_devices().len(), 3);

    // A later call starts a fresh round.
    session.sync_devices().await.unwrap();
    assert_eq!(hub.count(CommandId::GetAllEquipmentStatus), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn sync_marks_unresponsive_device_unknown() {
    let hub = FakeHub::start(vec![DOOR], vec![CommandId::SynDeviceStatus]).await;
    let session = connected(&hub).await;

    let report = session.sync_devices().await.unwrap();
    assert_eq!(report.devices, [1]);
    assert_eq!(report.failed, [1]);
    assert_eq!(session.device(1).unwrap().state, ContactState::Unknown);

    session.shutdown().await;
}

#[tokio::test]
async fn sync_failure_clears_battery_and_alarm() {
    let hub = FakeHub::start(vec![SMOKE], vec![CommandId::SynDeviceStatus]).await;
    let session = connected(&hub).await;

    let report = session.sync_devices().await.unwrap();
    assert_eq!(report.devices, [2]);
    assert_eq!(report.failed, [2]);

    // The status list reported 80% and no alarm; the failed refresh must not
    // leave those values looking current.
    let smoke = session.device(2).unwrap();
    assert_eq!(smoke.battery, Battery::Unknown);
    assert_eq!(smoke.alarm_active, None);
    assert!(!smoke.in_alarm());
    assert_eq!(smoke.name.as_deref(), Some("Hallway"));
    assert!(smoke.online);

    session.shutdown().await;
}

#[tokio::test]
async fn unreachable_hub_marks_devices_offline_after_grace() {
    let hub = FakeHub::start(vec![DOOR, SMOKE], Vec::new()).await;
    let mut config = test_config(hub.addr);
    config.offline_grace = ms(100);
    let session = connected_with(config).await;
    session.sync_devices().await.unwrap();
    let offline = count_events(&session, DeviceEventKind::Offline);

    hub.set_responsive(false);
    wait_for_status(&session, |s| matches!(s, ConnectionStatus::Degraded { .. })).await;
    eventually(|| session.current_devices().iter().all(|d| !d.online)).await;
    tokio::time::sleep(ms(100)).await;
    assert_eq!(offline.load(Ordering::SeqCst), 2);

    // Offline keeps the last-known data.
    let door = session.device(1).unwrap();
    assert_eq!(door.name.as_deref(), Some("Front door"));
    assert_eq!(door.state, ContactState::Closed);
    let smoke = session.device(2).unwrap();
    assert_eq!(smoke.name.as_deref(), Some("Hallway"));
    assert_eq!(smoke.battery, Battery::Percent(80));
    assert_eq!(smoke.alarm_active, Some(false));

    session.shutdown().await;
}

#[tokio::test]
async fn silent_device_goes_stale_while_hub_stays_connected() {
    let hub = FakeHub::start(vec![DOOR], Vec::new()).await;
    let mut config = test_config(hub.addr);
    config.device_stale_after = ms(300);
    let session = connected_with(config).await;
    session.sync_devices().await.unwrap();
    let offline = count_events(&session, DeviceEventKind::Offline);

    eventually(|| !session.device(1).unwrap().online).await;
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert_eq!(offline.load(Ordering::SeqCst), 1);
    let door = session.device(1).unwrap();
    assert_eq!(door.name.as_deref(), Some("Front door"));
    assert_eq!(door.battery, Battery::Percent(100));

    // Any frame for the device brings it back.
    hub.push(status_data(&DOOR, "0464BBFF")).await;
    eventually(|| session.device(1).unwrap().online).await;
    assert_eq!(session.device(1).unwrap().state, ContactState::Open);

    session.shutdown().await;
}

#[tokio::test]
async fn duplicated_replies_resolve_and_notify_once() {
    let hub = FakeHub::start(vec![DOOR, CO], Vec::new()).await;
    let session = connected(&hub).await;
    hub.set_duplicate_replies(true);
    let statuses = count_events(&session, DeviceEventKind::Status);

    let reply = session
        .send_command(Command::QueryDeviceStatus { index: 3 })
        .await
        .unwrap();
    assert_eq!(reply.frames.len(), 1);
    tokio::time::sleep(ms(100)).await;
    assert_eq!(statuses.load(Ordering::SeqCst), 1);

    let list = session.send_command(Command::QueryAllStatus).await.unwrap();
    assert_eq!(list.frames.len(), 2);
    tokio::time::sleep(ms(100)).await;
    // Only the door is new; the boiler room is unchanged.
    assert_eq!(statuses.load(Ordering::SeqCst), 2);
    assert_eq!(session.current_devices().len(), 2);

    // Leftover copies must not disturb the next exchange.
    let again = session
        .send_command(Command::QueryDeviceStatus { index: 1 })
        .await
        .unwrap();
    assert_eq!(again.frames.len(), 1);
    assert_ne!(again.message_id, reply.message_id);

    session.shutdown().await;
}

#[tokio::test]
async fn name_table_is_merged() {
    let hub = FakeHub::start(vec![DOOR, CO], Vec::new()).await;
    let session = connected(&hub).await;

    let named = session.get_device_names().await.unwrap();
    let names: Vec<_> = named.iter().filter_map(|d| d.name.clone()).collect();
    assert_eq!(names, ["Front door", "Boiler room"]);

    session.shutdown().await;
}

#[tokio::test]
async fn test_alarm_requires_known_device() {
    let hub = FakeHub::start(vec![SMOKE], Vec::new()).await;
    let session = connected(&hub).await;

    assert_eq!(
        session.test_alarm(2).await.unwrap_err(),
        CoreError::DeviceNotFound { index: 2 }
    );

    session.sync_devices().await.unwrap();
    session.test_alarm(2).await.unwrap();
    let sent = hub.last(CommandId::EquipmentControl).unwrap();
    assert_eq!(sent.body.arg_str("device_status").as_deref(), Some("17000000"));
    assert!(session.device(2).unwrap().in_alarm());

    session.shutdown().await;
}

#[tokio::test]
async fn disconnect_cancels_pending_and_allows_reconnect() {
    let hub = FakeHub::start(vec![DOOR], vec![CommandId::ChooseSceneGroup]).await;
    let session = connected(&hub).await;
    session.sync_devices().await.unwrap();

    let pending = session
        .submit(&Command::ChooseSceneGroup { group: 2 })
        .unwrap();
    session.disconnect().await;

    assert_eq!(pending.await.unwrap_err(), CoreError::Cancelled);
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(session.current_devices().is_empty());
    assert_eq!(
        session.submit(&Command::QueryNames).unwrap_err(),
        CoreError::Disconnected
    );

    session.connect().await.unwrap();
    assert_eq!(session.status(), ConnectionStatus::Connected);
    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_final() {
    let hub = FakeHub::start(Vec::new(), Vec::new()).await;
    let session = connected(&hub).await;

    session.shutdown().await;
    assert_eq!(session.status(), ConnectionStatus::Closed);
    assert_eq!(session.connect().await.unwrap_err(), CoreError::Closed);
    assert_eq!(
        session.submit(&Command::QueryAllStatus).unwrap_err(),
        CoreError::Closed
    );
}
