//! Central-role controller adapter: the event-driven layer beneath the blocking manager.

mod adapter;
mod btleplug_backend;
mod controller;
mod event;
mod fake_backend;
mod types;

pub use adapter::{CentralAdapter, CentralListener, ListenerId};
pub use btleplug_backend::BtleplugController;
pub use controller::{CentralController, EventEmitter};
pub use event::CentralEvent;
pub use fake_backend::{
    FakeController, FakeControllerConfig, FakeHandle, FakeOperation, FakePeripheral, FakeRequest,
    FakeResponse, NotificationScript, ScanFixture,
};
pub use fake_backend::{
    BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID,
};
pub use types::{
    CharProperty, CharacteristicInfo, CharacteristicRef, PeripheralId, PeripheralInfo,
    ScanRequest, ServiceInfo, StackError, WriteKind,
};
