//! Integration tests for mqtt-bridge-heliotherm.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{mpsc, oneshot};

use mqtt_bridge_heliotherm::bridge::Bridge;
use mqtt_bridge_heliotherm::catalog::{ChannelCatalog, CHANNELS};
use mqtt_bridge_heliotherm::clock::ClockReconciler;
use mqtt_bridge_heliotherm::config::BridgeConfig;
use mqtt_bridge_heliotherm::device::{
    DeviceError, DeviceIdentity, HeatPumpConnector, HeatPumpSession,
};
use mqtt_bridge_heliotherm::mqtt::{BusError, MessageBus, Topics, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use mqtt_bridge_heliotherm::normalize::{canonical_key, normalize};
use mqtt_bridge_heliotherm::session::SessionRunner;
use mqtt_bridge_heliotherm::value::{RawRegisterSnapshot, RawValue, Value};

/// Scriptable in-memory device standing in for the serial transport.
#[derive(Default)]
struct FakePump {
    snapshot: Vec<(&'static str, RawValue)>,
    device_time: Option<NaiveDateTime>,
    fail_login: bool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    time_sets: AtomicUsize,
}

struct FakeSession {
    pump: Arc<FakePump>,
}

#[async_trait]
impl HeatPumpSession for FakeSession {
    async fn login(&mut self) -> Result<(), DeviceError> {
        if self.pump.fail_login {
            return Err(DeviceError::Login("ERR".into()));
        }
        Ok(())
    }

    async fn query(&mut self) -> Result<RawRegisterSnapshot, DeviceError> {
        Ok(self
            .pump
            .snapshot
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect())
    }

    async fn get_version(&mut self) -> Result<String, DeviceError> {
        Ok("3.0.20".to_string())
    }

    async fn get_serial_number(&mut self) -> Result<u32, DeviceError> {
        Ok(123456)
    }

    async fn get_date_time(&mut self) -> Result<(NaiveDateTime, u8), DeviceError> {
        self.pump
            .device_time
            .map(|t| (t, 4))
            .ok_or_else(|| DeviceError::Protocol("no clock scripted".into()))
    }

    async fn set_date_time_now(&mut self) -> Result<NaiveDateTime, DeviceError> {
        self.pump.time_sets.fetch_add(1, Ordering::SeqCst);
        self.pump
            .device_time
            .ok_or_else(|| DeviceError::Protocol("no clock scripted".into()))
    }

    async fn logout(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(self) {
        self.pump.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Local newtype so the library trait can be implemented without tripping
/// the orphan rule (`Arc` is not `#[fundamental]`).
struct FakeConnector(Arc<FakePump>);

#[async_trait]
impl HeatPumpConnector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self) -> Result<FakeSession, DeviceError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession { pump: self.0.clone() })
    }
}

fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(hh, mm, ss)
        .unwrap()
}

type PublishLog = Arc<Mutex<Vec<(String, String, bool)>>>;

/// In-memory bus that records every publication.
struct RecordingBus {
    topics: Topics,
    log: PublishLog,
}

impl RecordingBus {
    fn new(root: &str) -> (Self, PublishLog) {
        let log = PublishLog::default();
        (
            Self {
                topics: Topics::new(root),
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    fn is_connected(&self) -> bool {
        false
    }

    fn topics(&self) -> &Topics {
        &self.topics
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        self.log.lock().unwrap().push((
            topic.to_string(),
            String::from_utf8_lossy(&payload).into_owned(),
            retain,
        ));
        Ok(())
    }

    async fn publish_online(&self) -> Result<(), BusError> {
        let topic = self.topics.state.clone();
        self.publish(&topic, PAYLOAD_ONLINE.into(), true).await
    }

    async fn shutdown(self) {
        let topic = self.topics.state.clone();
        let _ = self.publish(&topic, PAYLOAD_OFFLINE.into(), true).await;
    }
}

fn bridge_config() -> BridgeConfig {
    json5::from_str(
        r#"{
        mqtt: { host: "localhost" },
        features: { clock_sync: false },
    }"#,
    )
    .unwrap()
}

#[test]
fn test_end_to_end_normalization() {
    let snapshot: RawRegisterSnapshot = vec![
        ("Temp. Aussen".to_string(), RawValue::Float(-60.0)),
        ("Hauptschalter".to_string(), RawValue::Bool(true)),
        ("Betriebsart".to_string(), RawValue::Int(1)),
    ];

    let map = normalize(&snapshot);

    assert_eq!(map.len(), 3);
    assert_eq!(map["tempaussen"], Value::Null);
    assert_eq!(map["hauptschalter"], Value::Text("ON".to_string()));
    assert_eq!(map["betriebsart"], Value::Text("Auto".to_string()));

    // The published payload is plain JSON null/number/string.
    let json = serde_json::to_string(&map).unwrap();
    assert_eq!(
        json,
        r#"{"betriebsart":"Auto","hauptschalter":"ON","tempaussen":null}"#
    );
}

#[test]
fn test_canonical_key_is_pure() {
    // Same input, same key, independent of anything else.
    for _ in 0..3 {
        assert_eq!(canonical_key("Temp. Aussen"), "tempaussen");
        assert_eq!(canonical_key("BSZ Verdichter Betriebsst. ges"), "bszverdichterbetriebsstges");
    }
}

#[test]
fn test_catalog_republish_keeps_identifiers_stable() {
    let identity = DeviceIdentity {
        manufacturer: "Heliotherm".to_string(),
        model: "Basic Comfort".to_string(),
        name: "Heliotherm Heat Pump".to_string(),
        sw_version: Some("3.0.20".to_string()),
        serial_number: Some("123456".to_string()),
    };

    // A reconnect constructs nothing new: two publications of the same
    // catalog carry identical topics and unique ids.
    let catalog = ChannelCatalog::new(identity, "heliotherm", "homeassistant", 0);
    let first = catalog.config_messages();
    let second = catalog.config_messages();
    assert_eq!(first, second);

    let mut ids: Vec<String> = first
        .iter()
        .map(|(_, payload)| {
            let json: serde_json::Value = serde_json::from_str(payload).unwrap();
            json["unique_id"].as_str().unwrap().to_string()
        })
        .collect();
    let count = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), count, "duplicate channel identifiers");
}

#[tokio::test]
async fn test_session_runner_polls_fake_pump() {
    let pump = Arc::new(FakePump {
        snapshot: vec![
            ("Temp. Vorlauf", RawValue::Float(32.1)),
            ("Verdichter", RawValue::Bool(false)),
            ("Betriebsart", RawValue::Int(9)),
        ],
        ..Default::default()
    });

    let runner = SessionRunner::new(Arc::new(FakeConnector(pump.clone())));
    let map = runner.poll().await.unwrap();

    assert_eq!(map["tempvorlauf"], Value::Number(32.1));
    assert_eq!(map["verdichter"], Value::Text("OFF".to_string()));
    assert_eq!(map["betriebsart"], Value::Null); // code 9 is undefined

    // One session per poll, released afterwards.
    assert_eq!(pump.opens.load(Ordering::SeqCst), 1);
    assert_eq!(pump.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_runner_releases_on_login_failure() {
    let pump = Arc::new(FakePump {
        fail_login: true,
        ..Default::default()
    });

    let runner = SessionRunner::new(Arc::new(FakeConnector(pump.clone())));
    assert!(runner.poll().await.is_err());
    assert_eq!(pump.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_degraded_identity_when_device_unreachable() {
    let pump = Arc::new(FakePump {
        fail_login: true,
        ..Default::default()
    });

    let identity = DeviceIdentity::read(&FakeConnector(pump.clone())).await;
    assert_eq!(identity.model, "Unknown");
    assert!(identity.serial_number.is_none());
    // The failed session was still released.
    assert_eq!(pump.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clock_reconciler_corrects_drift_once_per_day() {
    let host_midnight = at(2024, 3, 1, 0, 0, 0);
    let pump = Arc::new(FakePump {
        // Device clock 90 seconds ahead of the host.
        device_time: Some(at(2024, 3, 1, 0, 1, 30)),
        ..Default::default()
    });

    let mut clock =
        ClockReconciler::with_host_clock(Arc::new(FakeConnector(pump.clone())), || at(2024, 3, 1, 0, 0, 0));

    // Due at midnight: opens a session and corrects the drift.
    clock.reconcile_if_due(host_midnight).await;
    assert_eq!(pump.opens.load(Ordering::SeqCst), 1);
    assert_eq!(pump.time_sets.load(Ordering::SeqCst), 1);
    assert_eq!(pump.closes.load(Ordering::SeqCst), 1);

    // A second tick within the same trigger minute does nothing.
    clock.reconcile_if_due(host_midnight).await;
    assert_eq!(pump.opens.load(Ordering::SeqCst), 1);

    // Outside the trigger minute, nothing either.
    clock.reconcile_if_due(at(2024, 3, 1, 0, 1, 0)).await;
    assert_eq!(pump.opens.load(Ordering::SeqCst), 1);

    // The next day fires again.
    clock.reconcile_if_due(at(2024, 3, 2, 0, 0, 0)).await;
    assert_eq!(pump.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clock_reconciler_skips_set_when_in_sync() {
    let now = at(2024, 3, 1, 0, 0, 0);
    let pump = Arc::new(FakePump {
        device_time: Some(now),
        ..Default::default()
    });

    let mut clock =
        ClockReconciler::with_host_clock(Arc::new(FakeConnector(pump.clone())), || at(2024, 3, 1, 0, 0, 0));
    clock.reconcile_if_due(now).await;

    assert_eq!(pump.opens.load(Ordering::SeqCst), 1);
    assert_eq!(pump.time_sets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_edge_republishes_liveness_and_catalog() {
    let pump = Arc::new(FakePump::default());
    let (bus, log) = RecordingBus::new("heliotherm");
    let (connect_tx, connect_rx) = mpsc::unbounded_channel();

    let bridge = Bridge::with_bus(
        &bridge_config(),
        DeviceIdentity::degraded(),
        Arc::new(FakeConnector(pump)),
        bus,
        connect_rx,
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(bridge.run_until(async {
        let _ = stop_rx.await;
    }));

    // Two (re)connect edges.
    connect_tx.send(()).unwrap();
    connect_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let log = log.lock().unwrap();

    // One "online" plus one full catalog set per edge, liveness first.
    let online_positions: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, (topic, payload, _))| topic == "heliotherm/state" && payload == "online")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(online_positions, vec![0, 1 + CHANNELS.len()]);

    let configs = log
        .iter()
        .filter(|(topic, _, _)| topic.ends_with("/config"))
        .count();
    assert_eq!(configs, 2 * CHANNELS.len());

    // Shutdown leaves a retained "offline".
    let (topic, payload, retain) = log.last().unwrap();
    assert_eq!(topic, "heliotherm/state");
    assert_eq!(payload, "offline");
    assert!(*retain);
}

#[tokio::test]
async fn test_shutdown_fired_before_loop_start_still_stops_the_bridge() {
    let pump = Arc::new(FakePump::default());
    let (bus, log) = RecordingBus::new("heliotherm");
    let (_connect_tx, connect_rx) = mpsc::unbounded_channel();

    let bridge = Bridge::with_bus(
        &bridge_config(),
        DeviceIdentity::degraded(),
        Arc::new(FakeConnector(pump)),
        bus,
        connect_rx,
    );

    // An already-completed shutdown future models a signal latched before
    // the loop reaches its select; the bridge must exit immediately.
    tokio::time::timeout(Duration::from_secs(5), bridge.run_until(async {}))
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, "offline");
}
