use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use blesync::{
    BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID, BleError, CharacteristicRef, ConnectionFailure,
    ConnectionManager, ConnectionState, FakeController, FakeControllerConfig, FakeHandle,
    FakeOperation, FakePeripheral, FakeRequest, FakeResponse, OperationKind, PeripheralId,
    PeripheralInfo, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID, WriteKind,
};

const WAIT: Duration = Duration::from_secs(2);

fn thermometer() -> PeripheralInfo {
    PeripheralInfo::new(PeripheralId::from("AA:BB:CC"), Some("Thermo".into()), Some(-48))
}

fn speaker() -> PeripheralInfo {
    PeripheralInfo::new(PeripheralId::from("00:11:22"), Some("Speaker".into()), Some(-71))
}

fn battery_level() -> CharacteristicRef {
    CharacteristicRef::new(BATTERY_SERVICE_UUID, BATTERY_LEVEL_UUID)
}

fn start_with(
    responses: HashMap<FakeOperation, FakeResponse>,
) -> (ConnectionManager, FakeHandle) {
    let config = FakeControllerConfig::builder()
        .peripherals(vec![
            FakePeripheral::new(thermometer()),
            FakePeripheral::new(speaker()),
        ])
        .responses(responses)
        .build();
    let (adapter, handle) =
        FakeController::start_adapter(config).expect("fake adapter should start");
    (ConnectionManager::new(adapter), handle)
}

fn start() -> (ConnectionManager, FakeHandle) {
    start_with(HashMap::new())
}

fn connected() -> (ConnectionManager, FakeHandle) {
    let (manager, handle) = start();
    manager
        .connect(thermometer().id())
        .expect("fake connection should succeed");
    (manager, handle)
}

fn wait_for_pending(manager: &ConnectionManager, kind: OperationKind) {
    let deadline = Instant::now() + WAIT;
    while manager.pending(kind) == 0 {
        assert!(Instant::now() < deadline, "no pending {kind} call appeared");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn full_session_walks_the_state_machine() {
    let (manager, handle) = start();
    assert_eq!(ConnectionState::Idle, manager.state());

    let info = manager
        .connect(thermometer().id())
        .expect("connect should succeed");
    assert_eq!(thermometer(), info);
    assert_eq!(ConnectionState::Connected, manager.state());
    assert_eq!(Some(thermometer()), manager.active_peripheral());

    let services = manager
        .discover_services(&[])
        .expect("service discovery should succeed");
    let uuids: Vec<_> = services.iter().map(|service| service.uuid()).collect();
    assert_eq!(vec![BATTERY_SERVICE_UUID, UART_SERVICE_UUID], uuids);

    let characteristics = manager
        .discover_characteristics(&[], UART_SERVICE_UUID)
        .expect("characteristic discovery should succeed");
    let uuids: Vec<_> = characteristics.iter().map(|found| found.uuid()).collect();
    assert_eq!(vec![UART_TX_UUID, UART_RX_UUID], uuids);

    let cached = manager.services();
    let uart = cached
        .iter()
        .find(|service| service.uuid() == UART_SERVICE_UUID)
        .expect("UART service should be cached");
    assert_eq!(2, uart.characteristics().len());

    manager
        .disconnect(thermometer().id())
        .expect("disconnect should succeed");
    assert_eq!(ConnectionState::Idle, manager.state());
    assert_eq!(None, manager.active_peripheral());
    assert!(manager.services().is_empty());
    assert!(!handle.is_connected(thermometer().id()));
}

#[test]
fn refused_connection_carries_the_stack_error() {
    let (manager, _handle) = start_with(HashMap::from([(
        FakeOperation::Connect,
        FakeResponse::Fail("gatt 0x3e".into()),
    )]));

    let error = manager
        .connect(thermometer().id())
        .expect_err("connection should be refused");

    assert_matches!(
        error,
        BleError::Connection { reason: ConnectionFailure::Refused, cause: Some(cause), .. }
            if cause.message() == "gatt 0x3e"
    );
    assert_eq!(ConnectionState::Idle, manager.state());
}

#[test]
fn connecting_an_unknown_peripheral_is_refused() {
    let (manager, _handle) = start();

    let error = manager
        .connect(&PeripheralId::from("FF:FF:FF"))
        .expect_err("unknown peripheral should be refused");

    assert_matches!(
        error,
        BleError::Connection {
            reason: ConnectionFailure::Refused,
            ..
        }
    );
}

#[test]
fn connect_while_connected_reports_busy() {
    let (manager, _handle) = connected();

    let error = manager
        .connect(speaker().id())
        .expect_err("second connect should be rejected");

    assert_matches!(
        error,
        BleError::Connection {
            reason: ConnectionFailure::Busy {
                state: ConnectionState::Connected
            },
            ..
        }
    );
    assert_eq!(Some(thermometer()), manager.active_peripheral());
}

#[test]
fn operations_require_a_connection() {
    let (manager, _handle) = start();

    assert_matches!(manager.discover_services(&[]), Err(BleError::NotConnected));
    assert_matches!(
        manager.discover_characteristics(&[], BATTERY_SERVICE_UUID),
        Err(BleError::NotConnected)
    );
    assert_matches!(
        manager.configure_notification(&battery_level()),
        Err(BleError::NotConnected)
    );
    assert_matches!(
        manager.write_with_response(&[1], &battery_level()),
        Err(BleError::NotConnected)
    );
    assert_matches!(manager.read_value(&battery_level()), Err(BleError::NotConnected));
    assert_matches!(
        manager.disconnect(thermometer().id()),
        Err(BleError::NotConnected)
    );
    assert!(!manager.write_without_response(&[1], &battery_level()));
}

#[test]
fn discovery_failure_is_reported() {
    let (manager, handle) = connected();
    handle.set_response(
        FakeOperation::DiscoverServices,
        FakeResponse::Fail("insufficient authentication".into()),
    );

    let error = manager
        .discover_services(&[BATTERY_SERVICE_UUID])
        .expect_err("discovery should fail");

    assert_matches!(error, BleError::ServicesDiscovery { cause } if cause.message() == "insufficient authentication");
    assert_eq!(ConnectionState::Connected, manager.state());
}

#[test]
fn unlock_wakes_a_blocked_discovery() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::DiscoverServices, FakeResponse::Ignore);

    thread::scope(|scope| {
        let blocked = scope.spawn(|| manager.discover_services(&[]));
        wait_for_pending(&manager, OperationKind::DiscoverServices);

        assert_eq!(1, manager.unlock());
        let result = blocked.join().expect("discovery thread should not panic");
        assert_matches!(result, Err(BleError::NotConnected));
    });

    assert_eq!(0, manager.pending(OperationKind::DiscoverServices));
    assert_eq!(ConnectionState::Connected, manager.state());
}

#[test]
fn unlock_abandons_a_blocked_connect() {
    let (manager, handle) = start_with(HashMap::from([(
        FakeOperation::Connect,
        FakeResponse::Ignore,
    )]));

    thread::scope(|scope| {
        let blocked = scope.spawn(|| manager.connect(thermometer().id()));
        wait_for_pending(&manager, OperationKind::Connect);

        manager.unlock();
        let result = blocked.join().expect("connect thread should not panic");
        assert_matches!(result, Err(BleError::NotConnected));
    });

    assert_eq!(ConnectionState::Idle, manager.state());
    assert!(
        handle
            .requests()
            .contains(&FakeRequest::CancelConnect(thermometer().id().clone()))
    );
}

#[test]
fn unlock_wakes_every_category() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::DiscoverCharacteristics, FakeResponse::Ignore);
    handle.set_response(FakeOperation::Configure, FakeResponse::Ignore);
    handle.set_response(FakeOperation::Write, FakeResponse::Ignore);

    thread::scope(|scope| {
        let characteristics =
            scope.spawn(|| manager.discover_characteristics(&[], BATTERY_SERVICE_UUID));
        let configure = scope.spawn(|| manager.configure_notification(&battery_level()));
        let write = scope.spawn(|| manager.write_with_response(&[0x01], &battery_level()));

        wait_for_pending(&manager, OperationKind::DiscoverCharacteristics);
        wait_for_pending(&manager, OperationKind::ConfigureNotification);
        wait_for_pending(&manager, OperationKind::WriteWithResponse);

        assert_eq!(3, manager.unlock());
        assert_matches!(characteristics.join().expect("no panic"), Err(BleError::NotConnected));
        assert_matches!(configure.join().expect("no panic"), Err(BleError::NotConnected));
        assert_matches!(write.join().expect("no panic"), Err(BleError::NotConnected));
    });
}

#[test]
fn link_loss_wakes_pending_calls_and_keeps_channels() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::DiscoverServices, FakeResponse::Ignore);
    manager
        .notifications()
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");

    let (lost_tx, lost_rx) = mpsc::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    manager.set_disconnect_handler(move |peripheral| {
        handler_calls.fetch_add(1, Ordering::SeqCst);
        lost_tx
            .send(peripheral.clone())
            .expect("test receiver should be alive");
    });

    thread::scope(|scope| {
        let blocked = scope.spawn(|| manager.discover_services(&[]));
        wait_for_pending(&manager, OperationKind::DiscoverServices);

        handle.drop_link(thermometer().id());
        assert_matches!(blocked.join().expect("no panic"), Err(BleError::NotConnected));
    });

    let lost = lost_rx.recv_timeout(WAIT).expect("handler should fire");
    assert_eq!(thermometer().id(), &lost);
    assert_eq!(ConnectionState::Idle, manager.state());
    assert!(manager.notifications().contains("battery"));
    assert!(lost_rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[test]
fn values_queued_before_link_loss_are_read_before_no_data() {
    let (manager, handle) = connected();
    let registry = Arc::clone(manager.notifications());
    registry
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");

    let (lost_tx, lost_rx) = mpsc::channel();
    let on_lost = Arc::clone(&registry);
    manager.set_disconnect_handler(move |peripheral| {
        on_lost
            .cancel_read("battery")
            .expect("battery channel should survive link loss");
        lost_tx
            .send(peripheral.clone())
            .expect("test receiver should be alive");
    });

    for level in [0x64, 0x63, 0x62] {
        handle.notify(thermometer().id(), battery_level(), &[level]);
    }
    handle.drop_link(thermometer().id());
    lost_rx.recv_timeout(WAIT).expect("handler should fire");

    let mut payloads = Vec::new();
    let stopped = loop {
        match registry.read("battery", 2, WAIT) {
            Ok(batch) => payloads.extend(batch.into_iter().map(|value| value.into_payload())),
            Err(error) => break error,
        }
    };

    assert_eq!(vec![vec![0x64], vec![0x63], vec![0x62]], payloads);
    assert_matches!(stopped, BleError::NoData);
}

#[test]
fn reset_wakes_a_blocked_discovery() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::DiscoverServices, FakeResponse::Ignore);

    thread::scope(|scope| {
        let blocked = scope.spawn(|| manager.discover_services(&[]));
        wait_for_pending(&manager, OperationKind::DiscoverServices);

        manager.reset();
        let result = blocked.join().expect("discovery thread should not panic");
        assert_matches!(result, Err(BleError::NotConnected));
    });

    assert_eq!(0, manager.pending(OperationKind::DiscoverServices));
    assert_eq!(ConnectionState::Idle, manager.state());
}

#[test]
fn unlock_forces_a_stuck_disconnect_idle() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::Disconnect, FakeResponse::Ignore);
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    manager.set_disconnect_handler(move |_peripheral| {
        handler_calls.fetch_add(1, Ordering::SeqCst);
    });

    thread::scope(|scope| {
        let blocked = scope.spawn(|| manager.disconnect(thermometer().id()));
        wait_for_pending(&manager, OperationKind::Disconnect);
        assert_eq!(ConnectionState::Disconnecting, manager.state());

        assert_eq!(1, manager.unlock());
        let result = blocked.join().expect("disconnect thread should not panic");
        assert_matches!(result, Err(BleError::Disconnection { cause: None, .. }));
    });

    assert_eq!(ConnectionState::Idle, manager.state());
    assert_eq!(None, manager.active_peripheral());
    assert_eq!(0, manager.pending(OperationKind::Disconnect));
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[test]
fn requested_disconnect_runs_the_handler_once_and_drops_channels() {
    let (manager, _handle) = connected();
    manager
        .notifications()
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");
    let (lost_tx, lost_rx) = mpsc::channel();
    manager.set_disconnect_handler(move |peripheral| {
        lost_tx
            .send(peripheral.clone())
            .expect("test receiver should be alive");
    });

    manager
        .disconnect(thermometer().id())
        .expect("disconnect should succeed");

    assert!(lost_rx.recv_timeout(WAIT).is_ok());
    assert!(lost_rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert!(!manager.notifications().contains("battery"));
}

#[test]
fn failed_disconnect_still_ends_idle() {
    let (manager, handle) = connected();
    handle.set_response(FakeOperation::Disconnect, FakeResponse::Fail("timeout".into()));

    let error = manager
        .disconnect(thermometer().id())
        .expect_err("disconnect should report the stack failure");

    assert_matches!(error, BleError::Disconnection { cause: Some(cause), .. } if cause.message() == "timeout");
    assert_eq!(ConnectionState::Idle, manager.state());
}

#[test]
fn reset_forgets_everything_without_touching_the_radio() {
    let (manager, handle) = connected();
    manager
        .notifications()
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");
    let requests_before = handle.requests().len();

    manager.reset();

    assert_eq!(ConnectionState::Idle, manager.state());
    assert_eq!(None, manager.active_peripheral());
    assert!(manager.notifications().keys().is_empty());
    assert_eq!(requests_before, handle.requests().len());
    assert!(handle.is_connected(thermometer().id()));
}

#[test]
fn values_fan_out_to_every_watching_channel() {
    let (manager, handle) = connected();
    let registry = manager.notifications();
    registry
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");
    registry
        .register("everything", [BATTERY_LEVEL_UUID, UART_RX_UUID])
        .expect("register should succeed");
    registry
        .register("uart", [UART_RX_UUID])
        .expect("register should succeed");

    handle.notify(thermometer().id(), battery_level(), &[0x64]);

    for key in ["battery", "everything"] {
        let batch = registry.read(key, 4, WAIT).expect("value should arrive");
        assert_eq!(1, batch.len());
        assert_eq!(&[0x64], batch[0].payload());
        assert_eq!(BATTERY_LEVEL_UUID, batch[0].characteristic());
    }
    assert_matches!(
        registry.read("uart", 1, Duration::from_millis(50)),
        Err(BleError::Timeout { .. })
    );
}

#[test]
fn values_from_another_peripheral_are_ignored() {
    let (manager, handle) = connected();
    let registry = manager.notifications();
    registry
        .register("battery", [BATTERY_LEVEL_UUID])
        .expect("register should succeed");

    handle.notify(speaker().id(), battery_level(), &[0x10]);

    assert_matches!(
        registry.read("battery", 1, Duration::from_millis(100)),
        Err(BleError::Timeout { .. })
    );
}

#[test]
fn read_value_arrives_through_the_registry() {
    let (manager, _handle) = connected();
    let uart_tx = CharacteristicRef::new(UART_SERVICE_UUID, UART_TX_UUID);
    manager
        .notifications()
        .register("echo", [UART_TX_UUID])
        .expect("register should succeed");

    assert!(manager.write_without_response(b"hi", &uart_tx));
    manager.read_value(&uart_tx).expect("read should be issued");

    let batch = manager
        .notifications()
        .read("echo", 1, WAIT)
        .expect("read value should arrive");
    assert_eq!(b"hi", batch[0].payload());
}

#[test]
fn acknowledged_write_reaches_the_radio() {
    let (manager, handle) = connected();
    let uart_tx = CharacteristicRef::new(UART_SERVICE_UUID, UART_TX_UUID);

    manager
        .write_with_response(&[0xDE, 0xAD], &uart_tx)
        .expect("write should be acknowledged");

    assert!(handle.requests().contains(&FakeRequest::Write {
        peripheral: thermometer().id().clone(),
        characteristic: uart_tx,
        data: vec![0xDE, 0xAD],
        kind: WriteKind::WithResponse,
    }));
}

#[test]
fn refused_unacknowledged_write_reports_false() {
    let config = FakeControllerConfig::builder()
        .peripherals(vec![FakePeripheral::new(thermometer())])
        .accept_unacknowledged_writes(false)
        .build();
    let (adapter, _handle) =
        FakeController::start_adapter(config).expect("fake adapter should start");
    let manager = ConnectionManager::new(adapter);
    manager
        .connect(thermometer().id())
        .expect("connect should succeed");

    let uart_tx = CharacteristicRef::new(UART_SERVICE_UUID, UART_TX_UUID);
    assert!(!manager.write_without_response(&[1], &uart_tx));
}
