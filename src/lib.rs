//! Blocking connection and notification management over an event-driven
//! BLE central.
//!
//! [`CentralAdapter`] owns a [`CentralController`] backend and fans its
//! completion events out to listeners on one dispatch thread.
//! [`ConnectionManager`] turns that event stream into blocking calls and
//! routes characteristic values into a [`NotificationRegistry`], whose keyed
//! channels are read with timeouts and can be cancelled from any thread.

mod app;
mod central;
mod cli;
mod error;
mod manager;
mod notification;
mod sync;
mod telemetry;
mod terminal;
mod utils;

pub use app::{run, run_with_clients_and_log_level, run_with_log_level, start_adapter};
pub use central::{
    BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID, BtleplugController, CentralAdapter, CentralController,
    CentralEvent, CentralListener, CharProperty, CharacteristicInfo, CharacteristicRef,
    EventEmitter, FakeController, FakeControllerConfig, FakeHandle, FakeOperation, FakePeripheral,
    FakeRequest, FakeResponse, ListenerId, NotificationScript, PeripheralId, PeripheralInfo,
    ScanFixture, ScanRequest, ServiceInfo, StackError, UART_RX_UUID, UART_SERVICE_UUID,
    UART_TX_UUID, WriteKind,
};
pub use cli::{
    Args, Backend, Command, FakeArgs, ListenArgs, ListenStopReason, ListenSummary, LogLevel,
    OutputFormat, ScanArgs, WriteArgs, WriteReport,
};
pub use error::{BleError, ConnectionFailure, FixtureError};
pub use manager::{ConnectionManager, ConnectionState, OperationKind};
pub use notification::{Notification, NotificationRegistry};
pub use terminal::{SystemTerminalClient, TerminalClient};
pub use utils::parse_ble_uuid;
