//! Integration tests for a running daemon.
//!
//! Devices are simulated with in-memory pipes; everything else (log files,
//! hub, fan-out, HTTP listener) is real.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use seriallog_core::{DeviceDescriptor, TimestampedMessage, TIMESTAMP_FORMAT};
use seriallogd::device::{DeviceError, DeviceOpener, DeviceStream};
use seriallogd::hub::{
    CloseReason, SessionError, SessionEnd, SubscriberSession, SubscriberTransport, SEND_TIMEOUT,
};
use seriallogd::persist::START_MARKER;
use seriallogd::{Daemon, DaemonConfig, DaemonHandle};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything that should happen "promptly"
const WAIT: Duration = Duration::from_secs(3);

/// Interval between file polls
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Opener whose devices are in-memory pipes, keyed by path.
#[derive(Clone, Default)]
struct SimOpener {
    devices: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>>,
}

impl SimOpener {
    /// Registers `path`; every open of it yields a new pipe whose far end
    /// arrives on the returned receiver.
    fn plug(&self, path: &str) -> mpsc::UnboundedReceiver<DuplexStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.devices.lock().insert(path.to_string(), tx);
        rx
    }
}

#[async_trait]
impl DeviceOpener for SimOpener {
    async fn open(&self, device: &DeviceDescriptor) -> Result<DeviceStream, DeviceError> {
        let sender = self.devices.lock().get(&device.path).cloned();
        let Some(sender) = sender else {
            return Err(DeviceError::Open {
                path: device.path.clone(),
                reason: "unplugged".to_string(),
            });
        };

        let (ingest_side, device_side) = tokio::io::duplex(64 * 1024);
        sender.send(device_side).map_err(|_| DeviceError::Open {
            path: device.path.clone(),
            reason: "test gone".to_string(),
        })?;
        Ok(Box::new(ingest_side))
    }
}

/// Running daemon plus its temp log directory.
struct TestDaemon {
    handle: Option<DaemonHandle>,
    cancel_token: CancellationToken,
    log_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn spawn(opener: SimOpener, ports: &[&str]) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let config = DaemonConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_dir: temp_dir.path().to_path_buf(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            restart_delay_secs: 1,
            ..Default::default()
        };

        let cancel_token = CancellationToken::new();
        let handle = Daemon::with_opener(config, Arc::new(opener))
            .start(cancel_token.clone())
            .await
            .expect("daemon should start");

        TestDaemon {
            handle: Some(handle),
            cancel_token,
            log_dir: temp_dir.path().to_path_buf(),
            _temp_dir: temp_dir,
        }
    }

    fn handle(&self) -> &DaemonHandle {
        self.handle.as_ref().expect("daemon running")
    }

    fn log_path(&self, index: usize) -> PathBuf {
        self.log_dir.join(format!("differentmind_{index}.txt"))
    }

    async fn wait_for_log(&self, index: usize, predicate: impl Fn(Option<&str>) -> bool) {
        let path = self.log_path(index);
        timeout(WAIT, async {
            loop {
                let text = std::fs::read(&path)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                if predicate(text.as_deref()) {
                    return;
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .expect("log did not reach expected state");
    }

    async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            timeout(WAIT, handle.wait())
                .await
                .expect("daemon should stop")
                .expect("daemon should stop cleanly");
        }
    }
}

async fn next_pipe(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
    timeout(WAIT, rx.recv())
        .await
        .expect("device was not opened")
        .expect("opener dropped")
}

/// Transport forwarding delivered messages to a channel.
struct ChannelTransport {
    sender: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SubscriberTransport for ChannelTransport {
    async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        self.sender
            .send(text.to_string())
            .map_err(|_| SessionError::Closed)
    }

    async fn close(&mut self, _reason: CloseReason) {}
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<String>, count: usize) -> Vec<TimestampedMessage> {
    let mut messages = Vec::new();
    while messages.len() < count {
        let text = timeout(WAIT, rx.recv())
            .await
            .expect("message not delivered")
            .expect("session ended");
        messages.push(TimestampedMessage::parse_broadcast(&text).expect("broadcast format"));
    }
    messages
}

// ============================================================================
// Broadcast Tests
// ============================================================================

#[tokio::test]
async fn test_two_devices_two_subscribers() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let mut dev1 = opener.plug("sim1");
    let daemon = TestDaemon::spawn(opener, &["sim0", "sim1"]).await;

    let mut receivers = Vec::new();
    let mut controls = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SubscriberSession::attach(
            daemon.handle().hub(),
            ChannelTransport { sender: tx },
            SEND_TIMEOUT,
        );
        controls.push(session.control());
        tokio::spawn(session.run());
        receivers.push(rx);
    }
    assert_eq!(daemon.handle().hub().subscriber_count(), 2);

    let mut pipe0 = next_pipe(&mut dev0).await;
    let mut pipe1 = next_pipe(&mut dev1).await;
    pipe0.write_all(b"hello\r\n").await.unwrap();
    pipe1.write_all(b"world\r\n").await.unwrap();

    for rx in receivers.iter_mut() {
        let mut got: Vec<(usize, String)> = collect(rx, 2)
            .await
            .into_iter()
            .map(|m| (m.source, m.line))
            .collect();
        // Cross-device order is unspecified
        got.sort();
        assert_eq!(
            got,
            vec![(0, "hello".to_string()), (1, "world".to_string())]
        );
    }

    for control in controls {
        control.peer_closed();
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_open_sessions() {
    let opener = SimOpener::default();
    let _dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let session = SubscriberSession::attach(
        daemon.handle().hub(),
        ChannelTransport { sender: tx },
        SEND_TIMEOUT,
    );
    let session = tokio::spawn(session.run());

    daemon.shutdown().await;

    let end = timeout(WAIT, session).await.expect("session should end").unwrap();
    assert_eq!(end, SessionEnd::HubClosed);
}

#[tokio::test]
async fn test_per_device_order_is_preserved() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;

    let mut sub = daemon.handle().hub().subscribe(|| {});
    let mut pipe = next_pipe(&mut dev0).await;
    for i in 0..10 {
        pipe.write_all(format!("line {i}\n").as_bytes()).await.unwrap();
    }

    for i in 0..10 {
        let text = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        let message = TimestampedMessage::parse_broadcast(&text).unwrap();
        assert_eq!(message.line, format!("line {i}"));
    }

    drop(sub);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_session_ends_when_peer_closes() {
    let opener = SimOpener::default();
    let _dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let session = SubscriberSession::attach(
        daemon.handle().hub(),
        ChannelTransport { sender: tx },
        SEND_TIMEOUT,
    );
    let control = session.control();
    let task = tokio::spawn(session.run());

    control.peer_closed();
    let end = timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::PeerClosed);
    assert_eq!(daemon.handle().hub().subscriber_count(), 0);

    daemon.shutdown().await;
}

// ============================================================================
// Delete Tests
// ============================================================================

#[tokio::test]
async fn test_delete_while_active_removes_log_and_restarts() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;

    let mut pipe = next_pipe(&mut dev0).await;
    pipe.write_all(b"before delete\n").await.unwrap();
    daemon
        .wait_for_log(0, |text| text.is_some_and(|t| t.contains("] before delete\r\n")))
        .await;

    assert!(daemon.handle().deletes().request_delete(0));
    daemon.wait_for_log(0, |text| text.is_none()).await;

    // The ingestor goes back to Opening after the restart delay
    let _pipe = next_pipe(&mut dev0).await;
    daemon
        .wait_for_log(0, |text| {
            text.is_some_and(|t| t.starts_with(START_MARKER) && !t.contains("before delete"))
        })
        .await;

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_double_delete_is_harmless() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;

    let mut pipe = next_pipe(&mut dev0).await;
    pipe.write_all(b"x\n").await.unwrap();
    daemon
        .wait_for_log(0, |text| text.is_some_and(|t| t.contains("] x\r\n")))
        .await;

    daemon.handle().deletes().request_delete(0);
    daemon.handle().deletes().request_delete(0);
    daemon.wait_for_log(0, |text| text.is_none()).await;

    // Second request is not replayed into the next cycle
    let _pipe = next_pipe(&mut dev0).await;
    daemon.wait_for_log(0, |text| text.is_some()).await;
    sleep(Duration::from_millis(100)).await;
    assert!(daemon.log_path(0).exists());

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_delete_for_inactive_index_is_ignored() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;
    let _pipe = next_pipe(&mut dev0).await;
    daemon.wait_for_log(0, |text| text.is_some()).await;

    daemon.handle().deletes().request_delete(2);
    sleep(Duration::from_millis(100)).await;
    assert!(daemon.log_path(0).exists());

    daemon.shutdown().await;
}

// ============================================================================
// Clock Tests
// ============================================================================

#[tokio::test]
async fn test_device_clock_round_trip() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;
    let mut sub = daemon.handle().hub().subscribe(|| {});

    let mut pipe = next_pipe(&mut dev0).await;
    pipe.write_all(b"2023-06-01 10:00:00\nafter sync\n").await.unwrap();

    let naive = NaiveDateTime::parse_from_str("2023-06-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    let device_time = Local.from_local_datetime(&naive).earliest().unwrap();

    let mut after = None;
    for _ in 0..2 {
        let text = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        let message = TimestampedMessage::parse_broadcast(&text).unwrap();
        if message.line == "after sync" {
            after = Some(message);
        }
    }
    let after = after.expect("line after the sync was broadcast");

    let stamped: DateTime<FixedOffset> =
        DateTime::parse_from_str(&after.timestamp, TIMESTAMP_FORMAT).unwrap();
    let delta = stamped.signed_duration_since(device_time);
    assert!(
        delta.num_milliseconds().abs() <= 1000,
        "timestamp {stamped} not within 1s of device time {device_time}"
    );

    let expected_offset = device_time.signed_duration_since(Local::now());
    let offset = daemon.handle().clock().read();
    assert!((offset - expected_offset).num_milliseconds().abs() <= 1000);

    drop(sub);
    daemon.shutdown().await;
}

// ============================================================================
// HTTP Tests
// ============================================================================

async fn http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_http_ports_and_data() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let _dev1 = opener.plug("sim1");
    let daemon = TestDaemon::spawn(opener, &["sim0", "sim1"]).await;
    let addr = daemon.handle().local_addr();

    let response = http(
        addr,
        "GET /ports HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with(r#"{"ports":2}"#));

    let mut pipe = next_pipe(&mut dev0).await;
    pipe.write_all(b"served\n").await.unwrap();
    daemon
        .wait_for_log(0, |text| text.is_some_and(|t| t.contains("] served\r\n")))
        .await;

    let response = http(
        addr,
        "GET /data/0 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("] served\r\n"));

    let response = http(
        addr,
        "GET /data/x HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400"));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_http_delete_removes_log() {
    let opener = SimOpener::default();
    let mut dev0 = opener.plug("sim0");
    let daemon = TestDaemon::spawn(opener, &["sim0"]).await;
    let addr = daemon.handle().local_addr();

    let _pipe = next_pipe(&mut dev0).await;
    daemon.wait_for_log(0, |text| text.is_some()).await;

    let response = http(
        addr,
        "POST /delete/0 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"));
    daemon.wait_for_log(0, |text| text.is_none()).await;

    daemon.shutdown().await;
}

// ============================================================================
// Startup Tests
// ============================================================================

#[tokio::test]
async fn test_start_without_ports_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        log_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };

    let result = Daemon::with_opener(config, Arc::new(SimOpener::default()))
        .start(CancellationToken::new())
        .await;
    assert!(matches!(result, Err(seriallogd::DaemonError::NoDevices)));
}

#[tokio::test]
async fn test_unplugged_device_does_not_stop_daemon() {
    let opener = SimOpener::default();
    let mut dev1 = opener.plug("sim1");
    // sim0 is never plugged; its ingestor keeps retrying
    let daemon = TestDaemon::spawn(opener, &["sim0", "sim1"]).await;

    let mut sub = daemon.handle().hub().subscribe(|| {});
    let mut pipe = next_pipe(&mut dev1).await;
    pipe.write_all(b"alive\n").await.unwrap();

    let text = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert!(text.starts_with("{1}["));
    assert!(!daemon.log_path(0).exists());

    drop(sub);
    daemon.shutdown().await;
}
