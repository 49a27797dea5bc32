use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bon::Builder;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::adapter::CentralAdapter;
use super::controller::{CentralController, EventEmitter};
use super::event::CentralEvent;
use super::types::{
    CharProperty, CharacteristicInfo, CharacteristicRef, PeripheralId, PeripheralInfo,
    ScanRequest, ServiceInfo, StackError, WriteKind,
};
use crate::error::{BleError, FixtureError};
use crate::utils::parse_ble_uuid;

pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// How the fake radio answers one category of request.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum FakeResponse {
    /// Report success.
    #[default]
    Succeed,
    /// Report a stack failure with this message.
    Fail(String),
    /// Never answer.
    Ignore,
}

impl FromStr for FakeResponse {
    type Err = FixtureError;

    /// Parses `succeed`, `ignore`, `fail` or `fail:<message>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value {
            "succeed" => Ok(Self::Succeed),
            "ignore" => Ok(Self::Ignore),
            "fail" => Ok(Self::Fail("fake stack failure".to_string())),
            _ => value
                .strip_prefix("fail:")
                .map(|message| Self::Fail(message.to_string()))
                .ok_or_else(|| FixtureError::InvalidResponse {
                    value: value.to_string(),
                }),
        }
    }
}

/// Request categories whose answer can be scripted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FakeOperation {
    Connect,
    Disconnect,
    DiscoverServices,
    DiscoverCharacteristics,
    Configure,
    Read,
    Write,
}

/// A request recorded by the fake controller.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeRequest {
    Connect(PeripheralId),
    CancelConnect(PeripheralId),
    StartScan(ScanRequest),
    StopScan,
    DiscoverServices {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    SetNotify {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        enabled: bool,
    },
    Read {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
    },
    Write {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        kind: WriteKind,
    },
}

/// A fixture peripheral with its GATT table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakePeripheral {
    info: PeripheralInfo,
    services: Vec<ServiceInfo>,
}

impl FakePeripheral {
    /// Creates a fixture peripheral with the default GATT table.
    #[must_use]
    pub fn new(info: PeripheralInfo) -> Self {
        Self {
            info,
            services: default_services(),
        }
    }

    /// Replaces the GATT table.
    #[must_use]
    pub fn with_services(mut self, services: Vec<ServiceInfo>) -> Self {
        self.services = services;
        self
    }

    #[must_use]
    pub fn info(&self) -> &PeripheralInfo {
        &self.info
    }

    #[must_use]
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }
}

/// Parsed fake scan fixture records (`id|local_name|rssi;...`).
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    peripherals: Vec<FakePeripheral>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let peripherals = parse_scan_fixture(value)?;
        Ok(Self { peripherals })
    }
}

/// Parsed fake notification payloads (`uuid=hex,hex;uuid=hex`).
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct NotificationScript {
    payloads: Vec<(Uuid, Vec<u8>)>,
}

impl FromStr for NotificationScript {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Settings for constructing a fake controller.
#[derive(Debug, Builder)]
pub struct FakeControllerConfig {
    #[builder(default)]
    peripherals: Vec<FakePeripheral>,
    /// Payloads emitted, in order, once notifications are enabled on their characteristic.
    #[builder(default)]
    notifications: NotificationScript,
    #[builder(default)]
    responses: HashMap<FakeOperation, FakeResponse>,
    /// Delay applied to every event the fake radio emits.
    #[builder(default)]
    latency: Duration,
    /// Acceptance flag returned for writes without response.
    #[builder(default = true)]
    accept_unacknowledged_writes: bool,
}

struct FakeState {
    peripherals: Vec<FakePeripheral>,
    notifications: Vec<(Uuid, Vec<u8>)>,
    responses: HashMap<FakeOperation, FakeResponse>,
    accept_unacknowledged_writes: bool,
    connected: HashSet<PeripheralId>,
    notifying: HashSet<(PeripheralId, CharacteristicRef)>,
    values: HashMap<(PeripheralId, CharacteristicRef), Vec<u8>>,
    requests: Vec<FakeRequest>,
}

impl FakeState {
    fn response(&self, operation: FakeOperation) -> FakeResponse {
        self.responses.get(&operation).cloned().unwrap_or_default()
    }

    fn peripheral(&self, id: &PeripheralId) -> Option<&FakePeripheral> {
        self.peripherals.iter().find(|candidate| candidate.info.id() == id)
    }
}

struct FakeShared {
    state: Mutex<FakeState>,
    radio: Mutex<std_mpsc::Sender<(Instant, CentralEvent)>>,
    latency: Duration,
}

impl FakeShared {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CentralEvent) {
        let due = Instant::now() + self.latency;
        let sender = self.radio.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send((due, event)).is_err() {
            trace!("fake radio stopped; event discarded");
        }
    }

    fn record(&self, request: FakeRequest) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        trace!(?request, "fake controller request");
        state.requests.push(request);
        state
    }
}

/// Fixture-driven central controller used in tests and non-hardware runs.
///
/// Answers are produced on a dedicated "fake radio" thread, after the
/// configured latency, in request order.
pub struct FakeController {
    shared: Arc<FakeShared>,
}

impl FakeController {
    /// Creates a fake controller that reports through `emitter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fake radio thread cannot be spawned.
    pub fn new(emitter: EventEmitter, config: FakeControllerConfig) -> Result<Self, BleError> {
        let (sender, receiver) = std_mpsc::channel::<(Instant, CentralEvent)>();
        thread::Builder::new()
            .name("fake-radio".to_string())
            .spawn(move || {
                while let Ok((due, event)) = receiver.recv() {
                    let wait = due.saturating_duration_since(Instant::now());
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    emitter.emit(event);
                }
            })
            .map_err(BleError::Runtime)?;

        let FakeControllerConfig {
            peripherals,
            notifications,
            responses,
            latency,
            accept_unacknowledged_writes,
        } = config;
        let state = FakeState {
            peripherals,
            notifications: notifications.into(),
            responses,
            accept_unacknowledged_writes,
            connected: HashSet::new(),
            notifying: HashSet::new(),
            values: HashMap::new(),
            requests: Vec::new(),
        };

        Ok(Self {
            shared: Arc::new(FakeShared {
                state: Mutex::new(state),
                radio: Mutex::new(sender),
                latency,
            }),
        })
    }

    /// Starts an adapter backed by a fake controller and returns a handle to script it.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter or fake radio threads cannot be spawned.
    pub fn start_adapter(
        config: FakeControllerConfig,
    ) -> Result<(CentralAdapter, FakeHandle), BleError> {
        let mut handle = None;
        let adapter = CentralAdapter::start(|emitter| {
            let controller = Self::new(emitter, config)?;
            handle = Some(controller.handle());
            Ok(controller)
        })?;
        let handle = handle.ok_or(BleError::NoAdapters)?;
        Ok((adapter, handle))
    }

    /// Returns a scripting handle sharing this controller's state.
    #[must_use]
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl CentralController for FakeController {
    fn connect(&self, peripheral: &PeripheralId) {
        let mut state = self.shared.record(FakeRequest::Connect(peripheral.clone()));
        let Some(info) = state.peripheral(peripheral).map(|fixture| fixture.info.clone()) else {
            drop(state);
            self.shared.emit(CentralEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                error: Some(StackError::new("unknown peripheral")),
            });
            return;
        };

        let event = match state.response(FakeOperation::Connect) {
            FakeResponse::Succeed => {
                state.connected.insert(peripheral.clone());
                CentralEvent::Connected { peripheral: info }
            }
            FakeResponse::Fail(message) => CentralEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                error: Some(StackError::new(message)),
            },
            FakeResponse::Ignore => return,
        };
        drop(state);
        self.shared.emit(event);
    }

    fn cancel_connect(&self, peripheral: &PeripheralId) {
        let mut state = self
            .shared
            .record(FakeRequest::CancelConnect(peripheral.clone()));
        let error = match state.response(FakeOperation::Disconnect) {
            FakeResponse::Succeed => None,
            FakeResponse::Fail(message) => Some(StackError::new(message)),
            FakeResponse::Ignore => return,
        };
        state.connected.remove(peripheral);
        state.notifying.retain(|(id, _characteristic)| id != peripheral);
        drop(state);
        self.shared.emit(CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error,
        });
    }

    fn start_scan(&self, request: &ScanRequest) {
        let state = self.shared.record(FakeRequest::StartScan(request.clone()));
        let discovered: Vec<PeripheralInfo> = state
            .peripherals
            .iter()
            .filter(|fixture| advertises_any(fixture, request.services()))
            .map(|fixture| fixture.info.clone())
            .collect();
        drop(state);
        for peripheral in discovered {
            self.shared
                .emit(CentralEvent::PeripheralDiscovered { peripheral });
        }
    }

    fn stop_scan(&self) {
        let _state = self.shared.record(FakeRequest::StopScan);
    }

    fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralInfo> {
        let state = self.shared.state();
        identifiers
            .iter()
            .filter_map(|id| state.peripheral(id).map(|fixture| fixture.info.clone()))
            .collect()
    }

    fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralInfo> {
        let state = self.shared.state();
        state
            .peripherals
            .iter()
            .filter(|fixture| state.connected.contains(fixture.info.id()))
            .filter(|fixture| advertises_any(fixture, services))
            .map(|fixture| fixture.info.clone())
            .collect()
    }

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        let state = self.shared.record(FakeRequest::DiscoverServices {
            peripheral: peripheral.clone(),
            services: services.to_vec(),
        });
        let result = match state.response(FakeOperation::DiscoverServices) {
            FakeResponse::Succeed => connected_fixture(&state, peripheral).map(|fixture| {
                fixture
                    .services
                    .iter()
                    .filter(|service| services.is_empty() || services.contains(&service.uuid()))
                    .map(|service| ServiceInfo::new(service.uuid(), service.primary(), Vec::new()))
                    .collect()
            }),
            FakeResponse::Fail(message) => Err(StackError::new(message)),
            FakeResponse::Ignore => return,
        };
        drop(state);
        self.shared.emit(CentralEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            result,
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let state = self.shared.record(FakeRequest::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service,
            characteristics: characteristics.to_vec(),
        });
        let result = match state.response(FakeOperation::DiscoverCharacteristics) {
            FakeResponse::Succeed => {
                connected_fixture(&state, peripheral).and_then(|fixture| {
                    let known = fixture
                        .services
                        .iter()
                        .find(|candidate| candidate.uuid() == service)
                        .ok_or_else(|| StackError::new(format!("unknown service {service}")))?;
                    Ok(known
                        .characteristics()
                        .iter()
                        .filter(|characteristic| {
                            characteristics.is_empty()
                                || characteristics.contains(&characteristic.uuid())
                        })
                        .cloned()
                        .collect::<Vec<_>>())
                })
            }
            FakeResponse::Fail(message) => Err(StackError::new(message)),
            FakeResponse::Ignore => return,
        };
        drop(state);
        self.shared.emit(CentralEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
            result,
        });
    }

    fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) {
        let mut state = self.shared.record(FakeRequest::SetNotify {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            enabled,
        });
        let result = match state.response(FakeOperation::Configure) {
            FakeResponse::Succeed => {
                connected_fixture(&state, peripheral).map(|_fixture| enabled)
            }
            FakeResponse::Fail(message) => Err(StackError::new(message)),
            FakeResponse::Ignore => return,
        };

        let mut scripted = Vec::new();
        if result.is_ok() {
            let key = (peripheral.clone(), *characteristic);
            if enabled {
                state.notifying.insert(key);
                scripted = state
                    .notifications
                    .iter()
                    .filter(|(uuid, _payload)| *uuid == characteristic.characteristic())
                    .map(|(_uuid, payload)| payload.clone())
                    .collect();
            } else {
                state.notifying.remove(&key);
            }
        }
        drop(state);

        self.shared.emit(CentralEvent::NotificationStateUpdated {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            result,
        });
        for payload in scripted {
            self.shared.emit(CentralEvent::ValueUpdated {
                peripheral: peripheral.clone(),
                characteristic: *characteristic,
                result: Ok(payload),
            });
        }
    }

    fn read_value(&self, peripheral: &PeripheralId, characteristic: &CharacteristicRef) {
        let state = self.shared.record(FakeRequest::Read {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
        });
        let result = match state.response(FakeOperation::Read) {
            FakeResponse::Succeed => connected_fixture(&state, peripheral).map(|_fixture| {
                state
                    .values
                    .get(&(peripheral.clone(), *characteristic))
                    .cloned()
                    .unwrap_or_default()
            }),
            FakeResponse::Fail(message) => Err(StackError::new(message)),
            FakeResponse::Ignore => return,
        };
        drop(state);
        self.shared.emit(CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            result,
        });
    }

    fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> bool {
        let mut state = self.shared.record(FakeRequest::Write {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            data: data.to_vec(),
            kind,
        });
        if !state.connected.contains(peripheral) {
            debug!(%peripheral, "fake write rejected; peripheral not connected");
            return false;
        }

        if kind == WriteKind::WithoutResponse {
            if state.accept_unacknowledged_writes {
                state
                    .values
                    .insert((peripheral.clone(), *characteristic), data.to_vec());
            }
            return state.accept_unacknowledged_writes;
        }

        let result = match state.response(FakeOperation::Write) {
            FakeResponse::Succeed => {
                state
                    .values
                    .insert((peripheral.clone(), *characteristic), data.to_vec());
                Ok(())
            }
            FakeResponse::Fail(message) => Err(StackError::new(message)),
            FakeResponse::Ignore => return true,
        };
        drop(state);
        self.shared.emit(CentralEvent::WriteCompleted {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            result,
        });
        true
    }
}

/// Scripting handle for a [`FakeController`].
#[derive(Clone)]
pub struct FakeHandle {
    shared: Arc<FakeShared>,
}

impl std::fmt::Debug for FakeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHandle").finish_non_exhaustive()
    }
}

impl FakeHandle {
    /// Changes how the fake radio answers one request category.
    pub fn set_response(&self, operation: FakeOperation, response: FakeResponse) {
        self.shared.state().responses.insert(operation, response);
    }

    /// Returns every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<FakeRequest> {
        self.shared.state().requests.clone()
    }

    /// Returns whether the fake radio holds a link to `peripheral`.
    #[must_use]
    pub fn is_connected(&self, peripheral: &PeripheralId) -> bool {
        self.shared.state().connected.contains(peripheral)
    }

    /// Emits an arbitrary event through the fake radio.
    pub fn emit(&self, event: CentralEvent) {
        self.shared.emit(event);
    }

    /// Emits a value update as if the peripheral had notified it.
    pub fn notify(&self, peripheral: &PeripheralId, characteristic: CharacteristicRef, payload: &[u8]) {
        let notifying = self
            .shared
            .state()
            .notifying
            .contains(&(peripheral.clone(), characteristic));
        if !notifying {
            warn!(%peripheral, %characteristic, "fake notification on a characteristic that is not armed");
        }
        self.shared.emit(CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic,
            result: Ok(payload.to_vec()),
        });
    }

    /// Drops the link to `peripheral` without a request, as a range loss would.
    pub fn drop_link(&self, peripheral: &PeripheralId) {
        let mut state = self.shared.state();
        state.connected.remove(peripheral);
        state.notifying.retain(|(id, _characteristic)| id != peripheral);
        drop(state);
        self.shared.emit(CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: Some(StackError::new("link lost")),
        });
    }
}

fn connected_fixture<'a>(
    state: &'a FakeState,
    peripheral: &PeripheralId,
) -> Result<&'a FakePeripheral, StackError> {
    if !state.connected.contains(peripheral) {
        return Err(StackError::new("peripheral is not connected"));
    }
    state
        .peripheral(peripheral)
        .ok_or_else(|| StackError::new("unknown peripheral"))
}

fn advertises_any(fixture: &FakePeripheral, services: &[Uuid]) -> bool {
    services.is_empty()
        || fixture
            .services
            .iter()
            .any(|service| services.contains(&service.uuid()))
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FakePeripheral>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FakePeripheral, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields[0].is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = match fields[1] {
        "" | "-" => None,
        name => Some(name.to_string()),
    };
    let rssi = match fields[2] {
        "" | "-" => None,
        value => Some(value.parse::<i16>()?),
    };

    Ok(FakePeripheral::new(PeripheralInfo::new(
        PeripheralId::from(fields[0]),
        local_name,
        rssi,
    )))
}

fn parse_notifications(raw_value: &str) -> Result<Vec<(Uuid, Vec<u8>)>, FixtureError> {
    let mut payloads = Vec::new();
    for group in raw_value.split(';').map(str::trim).filter(|group| !group.is_empty()) {
        let (raw_uuid, raw_payloads) = group
            .split_once('=')
            .ok_or(FixtureError::InvalidRecordFieldCount)?;
        let characteristic = parse_ble_uuid(raw_uuid)?;
        for raw_payload in raw_payloads.split(',') {
            let cleaned: String = raw_payload.chars().filter(|c| !c.is_whitespace()).collect();
            payloads.push((characteristic, hex::decode(cleaned)?));
        }
    }
    Ok(payloads)
}

fn default_services() -> Vec<ServiceInfo> {
    vec![
        ServiceInfo::new(
            BATTERY_SERVICE_UUID,
            true,
            vec![CharacteristicInfo::new(
                BATTERY_SERVICE_UUID,
                BATTERY_LEVEL_UUID,
                vec![CharProperty::Read, CharProperty::Notify],
            )],
        ),
        ServiceInfo::new(
            UART_SERVICE_UUID,
            true,
            vec![
                CharacteristicInfo::new(
                    UART_SERVICE_UUID,
                    UART_TX_UUID,
                    vec![CharProperty::Write, CharProperty::WriteWithoutResponse],
                ),
                CharacteristicInfo::new(
                    UART_SERVICE_UUID,
                    UART_RX_UUID,
                    vec![CharProperty::Notify],
                ),
            ],
        ),
    ]
}
