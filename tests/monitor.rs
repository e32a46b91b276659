//! Monitor controller integration tests
//!
//! Walks the full enumerate / subscribe / act cycle against a fake console.

mod support;

use std::sync::Arc;
use std::time::Duration;

use monitorctl::client::ClientConfig;
use monitorctl::domain::ConnectionState;
use monitorctl::monitor::{Fanout, MonitorConfig, MonitorController, MonitorState, SnapshotStore};
use serde_json::json;
use support::{FakeConsole, Peer, WAIT};
use tempfile::TempDir;
use tokio::sync::watch;

const OUTPUT: &str = "/devices/0/outputs/4";

struct Harness {
    _dir: TempDir,
    store: Arc<SnapshotStore>,
    controller: Arc<MonitorController>,
    states: watch::Receiver<MonitorState>,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SnapshotStore::open(dir.path().join("state.json")).unwrap());
    let (tx, states) = watch::channel(MonitorState::default());
    let sink = Fanout::new().with(store.clone()).with(Arc::new(tx));
    let controller = MonitorController::new(MonitorConfig::default(), Arc::new(sink));
    controller.attach(
        ClientConfig::default().with_reconnect(Duration::from_millis(50), Duration::from_millis(200)),
    );
    Harness {
        _dir: dir,
        store,
        controller,
        states,
    }
}

async fn wait_state(states: &mut watch::Receiver<MonitorState>, f: impl FnMut(&MonitorState) -> bool) -> MonitorState {
    tokio::time::timeout(WAIT, states.wait_for(f))
        .await
        .expect("timed out waiting for monitor state")
        .unwrap()
        .clone()
}

/// Answer the enumeration requests and check the subscriptions.
async fn enumerate(peer: &mut Peer) {
    assert_eq!(peer.recv().await, "get /devices");
    peer.push(r#"{"path":"/devices","data":{"children":{"0":{}}}}"#).await;
    assert_eq!(peer.recv().await, "get /devices/0/outputs");
    peer.push(r#"{"path":"/devices/0/outputs","data":{"children":{"1":{},"4":{}}}}"#).await;

    for property in ["CRMonitorLevel", "Mute", "DimOn", "MixToMono"] {
        assert_eq!(peer.recv().await, format!("get {}/{}", OUTPUT, property));
        assert_eq!(peer.recv().await, format!("subscribe {}/{}", OUTPUT, property));
    }
}

/// Answer the property reads with the engine's current values.
async fn report(peer: &mut Peer, level_db: f64, muted: bool, dimmed: bool, mono: bool) {
    peer.push(&format!(r#"{{"path":"{}/CRMonitorLevel","data":{}}}"#, OUTPUT, level_db))
        .await;
    for (property, on) in [("Mute", muted), ("DimOn", dimmed), ("MixToMono", mono)] {
        peer.push(&format!(r#"{{"path":"{}/{}","data":{}}}"#, OUTPUT, property, on))
            .await;
    }
}

/// Numeric value of a `set` command.
fn set_value(command: &str) -> f64 {
    command.rsplit(' ').next().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_enumeration_and_value_updates() {
    let mut h = harness();
    let console = FakeConsole::bind().await;
    h.controller.connect_to(console.endpoint()).unwrap();
    let mut peer = console.accept().await;

    enumerate(&mut peer).await;
    let state = wait_state(&mut h.states, |s| s.output.is_some()).await;
    assert_eq!(state.output_path().as_deref(), Some(OUTPUT));
    assert_eq!(state.connection, ConnectionState::Connected);

    peer.push(r#"{"path":"/devices/0/outputs/4/CRMonitorLevel","data":-24.0}"#).await;
    peer.push(r#"{"path":"/devices/0/outputs/4/Mute","data":{"properties":{"value":{"value":true}}}}"#)
        .await;
    let state = wait_state(&mut h.states, |s| s.muted).await;
    assert_eq!(state.level_db, -24.0);
    assert_eq!(state.volume_display(), "-24.0");

    let snapshot = h.store.snapshot().unwrap();
    assert_eq!(snapshot["muted"], json!(true));
    assert_eq!(snapshot["level_db"], json!(-24.0));
    assert_eq!(snapshot["connected"], json!(true));

    h.controller.shutdown();
}

#[tokio::test]
async fn test_actions_send_set_commands() {
    let mut h = harness();
    let console = FakeConsole::bind().await;
    h.controller.connect_to(console.endpoint()).unwrap();
    let mut peer = console.accept().await;
    enumerate(&mut peer).await;
    report(&mut peer, -30.0, false, false, false).await;
    wait_state(&mut h.states, |s| s.is_synced()).await;

    assert!(h.controller.toggle_mute().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/Mute/value/ true", OUTPUT));

    h.controller.set_volume(50.0).unwrap();
    // The engine is already at the midpoint, so nothing goes out
    h.controller.set_volume(100.0).unwrap();
    assert_eq!(peer.recv().await, format!("set {}/CRMonitorLevel/value/ 0.0", OUTPUT));

    h.controller.set_volume(100.2).unwrap();
    h.controller.set_level_db(-12.0).unwrap();
    assert_eq!(peer.recv().await, format!("set {}/CRMonitorLevel/value/ -12.0", OUTPUT));

    assert!(h.controller.toggle_dim().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/DimOn/value/ true", OUTPUT));
    assert!(h.controller.toggle_mono().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/MixToMono/value/ true", OUTPUT));
    assert!(!h.controller.toggle_mono().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/MixToMono/value/ false", OUTPUT));

    let state = h.controller.state();
    assert!(state.muted && state.dimmed && !state.mono);
    assert_eq!(state.level_db, -12.0);

    h.controller.shutdown();
}

#[tokio::test]
async fn test_reconnect_enumerates_again() {
    let mut h = harness();
    let console = FakeConsole::bind().await;
    h.controller.connect_to(console.endpoint()).unwrap();
    let mut peer = console.accept().await;
    enumerate(&mut peer).await;
    wait_state(&mut h.states, |s| s.output.is_some()).await;

    drop(peer);
    let state = wait_state(&mut h.states, |s| !s.is_connected()).await;
    assert_eq!(state.output, None);
    assert!(matches!(
        h.controller.toggle_mute(),
        Err(monitorctl::MonitorError::NoOutput)
    ));

    let mut peer = console.accept().await;
    enumerate(&mut peer).await;
    let state = wait_state(&mut h.states, |s| s.output.is_some()).await;
    assert_eq!(state.connection, ConnectionState::Connected);

    h.controller.shutdown();
}

#[tokio::test]
async fn test_actions_start_from_reported_values() {
    let mut h = harness();
    let console = FakeConsole::bind().await;
    h.controller.connect_to(console.endpoint()).unwrap();
    let mut peer = console.accept().await;
    enumerate(&mut peer).await;
    let state = wait_state(&mut h.states, |s| s.output.is_some()).await;
    assert!(!state.is_synced());

    // Nothing reported yet: a toggle has no value to flip
    assert!(matches!(
        h.controller.toggle_mute(),
        Err(monitorctl::MonitorError::NotReported(_))
    ));

    report(&mut peer, -12.0, true, false, true).await;
    let state = wait_state(&mut h.states, |s| s.is_synced()).await;
    assert!(state.muted && state.mono);

    assert!(!h.controller.toggle_mute().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/Mute/value/ false", OUTPUT));
    assert!(!h.controller.toggle_mono().unwrap());
    assert_eq!(peer.recv().await, format!("set {}/MixToMono/value/ false", OUTPUT));

    // -12 dB is slider 80; one step up lands near -10.2 dB
    h.controller.increase_volume().unwrap();
    let command = peer.recv().await;
    assert!(command.starts_with(&format!("set {}/CRMonitorLevel/value/ ", OUTPUT)));
    assert!((set_value(&command) - -10.2).abs() < 1e-6, "{}", command);

    h.controller.shutdown();
}
