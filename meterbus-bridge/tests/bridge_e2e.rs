//! Emulator -> bridge -> bus -> distributor, all in one process.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test publishes under its
//! own topic root.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;

use meterbus_bridge::config::ModbusConfig;
use meterbus_bridge::{Bridge, BridgeState, CycleOutcome, ModbusSource, PollSettings, PollerError};
use meterbus_common::{Measurement, MeterReading, PayloadFormat, Transport, subtree_pattern};
use meterbus_distributor::Distributor;
use meterbus_emulator::{
    DeviceEmulator, EmulatorError, EmulatorReport, FixedReadings, RegisterStore,
};
use meterbus_framework::{Bus, BusConfig, Shutdown};

fn unique_root() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}/metermodule/MeterReadingProfile", nanos)
}

fn modbus_config(addr: SocketAddr) -> ModbusConfig {
    ModbusConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..ModbusConfig::default()
    }
}

type EmulatorHandle = JoinHandle<Result<EmulatorReport, EmulatorError>>;

/// Start an emulator on `bind` serving a fixed reading and wait for its first
/// cycle.
async fn start_emulator_on(bind: &str, shutdown: &Shutdown) -> (SocketAddr, EmulatorHandle) {
    let store = RegisterStore::new(&[1, 2], 5000);
    let reading = MeterReading::from_samples(3.5, 60.0, 124.0, 0.9);
    let mut emulator = DeviceEmulator::new(
        store.clone(),
        FixedReadings::constant(reading),
        Duration::from_millis(100),
    );
    let addr = emulator.bind(bind).await.unwrap();

    let signal = shutdown.signal();
    let handle = tokio::spawn(async move { emulator.run(signal).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.read(1, Measurement::Current.address(), 2).unwrap() == vec![0, 0] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("emulator never wrote a reading");

    (addr, handle)
}

async fn start_emulator(shutdown: &Shutdown) -> SocketAddr {
    start_emulator_on("127.0.0.1:0", shutdown).await.0
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reading_flows_end_to_end() {
    let emulator_shutdown = Shutdown::new();
    let addr = start_emulator(&emulator_shutdown).await;

    let root = unique_root();
    let topic = format!("{}/modbus", root);

    let source = ModbusSource::connect(&modbus_config(addr)).await.unwrap();
    let bus = Bus::connect(&BusConfig::default(), "test").await.unwrap();
    let mut subscription = bus
        .subscribe(&subtree_pattern(&root, Transport::Zenoh), 16)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let settings = PollSettings {
        unit_id: 1,
        address: Measurement::Current.address(),
        count: Measurement::WIDTH,
        interval: Duration::from_millis(100),
        topic: topic.clone(),
        format: PayloadFormat::Raw,
    };
    let mut bridge = Bridge::new(source, bus.publisher(), settings);
    assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);

    let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Subscription closed");
    assert_eq!(message.payload, b"0, 16480");

    let mut distributor = Distributor::new(1);
    let delivery = distributor.on_message(&message.topic, &message.payload);
    assert_eq!(delivery.sequence, 1);
    assert_eq!(delivery.topic, topic);
    assert_eq!(delivery.value, Some(3.5));

    emulator_shutdown.trigger();
    bus.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bridge_run_publishes_until_shutdown() {
    let emulator_shutdown = Shutdown::new();
    let addr = start_emulator(&emulator_shutdown).await;

    let root = unique_root();
    let bus = Bus::connect(&BusConfig::default(), "test").await.unwrap();
    let subscription = bus
        .subscribe(&subtree_pattern(&root, Transport::Zenoh), 64)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let distributor_shutdown = Shutdown::new();
    let distributor_signal = distributor_shutdown.signal();
    let distributor = tokio::spawn(async move {
        let mut distributor = Distributor::new(1);
        let handled = distributor.run(subscription, distributor_signal).await;
        (handled, distributor.next_sequence())
    });

    let source = ModbusSource::connect(&modbus_config(addr)).await.unwrap();
    let settings = PollSettings {
        unit_id: 2,
        address: Measurement::Voltage.address(),
        count: Measurement::WIDTH,
        interval: Duration::from_millis(50),
        topic: format!("{}/modbus", root),
        format: PayloadFormat::Value,
    };
    let mut bridge = Bridge::new(source, bus.publisher(), settings);

    let bridge_shutdown = Shutdown::new();
    let bridge_signal = bridge_shutdown.signal();
    let bridge_task = tokio::spawn(async move { bridge.run(bridge_signal).await });

    tokio::time::sleep(Duration::from_millis(400)).await;
    bridge_shutdown.trigger();
    let report = bridge_task.await.unwrap();
    assert!(report.published >= 3);
    assert_eq!(report.skipped, 0);

    // Let the last messages arrive.
    tokio::time::sleep(Duration::from_millis(200)).await;
    distributor_shutdown.trigger();
    let (handled, next_sequence) = distributor.await.unwrap();
    assert_eq!(handled, report.published);
    assert_eq!(next_sequence, handled + 1);

    emulator_shutdown.trigger();
    bus.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exception_skips_cycle() {
    let emulator_shutdown = Shutdown::new();
    let addr = start_emulator(&emulator_shutdown).await;

    let source = ModbusSource::connect(&modbus_config(addr)).await.unwrap();
    let bus = Bus::connect(&BusConfig::default(), "test").await.unwrap();
    let settings = PollSettings {
        unit_id: 1,
        address: 4999,
        count: 2,
        interval: Duration::from_millis(100),
        topic: format!("{}/modbus", unique_root()),
        format: PayloadFormat::Raw,
    };
    let mut bridge = Bridge::new(source, bus.publisher(), settings);

    assert_eq!(bridge.poll_cycle().await, CycleOutcome::Skipped);
    assert_eq!(bridge.report().skipped, 1);
    assert_eq!(bridge.report().published, 0);

    emulator_shutdown.trigger();
    bus.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_device_is_fatal() {
    // Grab a free port, then close it again.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = ModbusSource::connect(&modbus_config(addr)).await;
    assert!(matches!(result, Err(PollerError::Connect { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bridge_reconnects_after_device_restart() {
    let first_shutdown = Shutdown::new();
    let (addr, first) = start_emulator_on("127.0.0.1:0", &first_shutdown).await;

    let source = ModbusSource::connect(&modbus_config(addr)).await.unwrap();
    let bus = Bus::connect(&BusConfig::default(), "test").await.unwrap();
    let settings = PollSettings {
        unit_id: 1,
        address: Measurement::Current.address(),
        count: Measurement::WIDTH,
        interval: Duration::from_millis(100),
        topic: format!("{}/modbus", unique_root()),
        format: PayloadFormat::Raw,
    };
    let mut bridge = Bridge::new(source, bus.publisher(), settings);
    assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);

    // The device goes away, taking the open connection with it.
    first_shutdown.trigger();
    first.await.unwrap().unwrap();
    assert_eq!(bridge.poll_cycle().await, CycleOutcome::Disconnected);
    assert_eq!(bridge.state(), BridgeState::Disconnected);

    // Same address, new device.
    let second_shutdown = Shutdown::new();
    let (_, second) = start_emulator_on(&addr.to_string(), &second_shutdown).await;
    assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);

    let report = bridge.report();
    assert_eq!(report.published, 2);
    assert_eq!(report.disconnects, 1);
    assert_eq!(report.reconnects, 1);

    second_shutdown.trigger();
    second.await.unwrap().unwrap();
    bus.close().await.unwrap();
}
