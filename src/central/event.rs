use uuid::Uuid;

use super::types::{
    CharacteristicInfo, CharacteristicRef, PeripheralId, PeripheralInfo, ServiceInfo, StackError,
};

/// Asynchronous outcome reported by a central controller.
///
/// Every request on [`super::CentralController`] is answered, eventually, by
/// one of these events. Events for the same peripheral arrive in the order the
/// controller emitted them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CentralEvent {
    /// An advertising peripheral was seen while scanning.
    PeripheralDiscovered { peripheral: PeripheralInfo },
    /// A connection attempt completed.
    Connected { peripheral: PeripheralInfo },
    /// A connection attempt failed.
    ConnectFailed {
        peripheral: PeripheralId,
        error: Option<StackError>,
    },
    /// The link to a peripheral is gone, requested or not.
    Disconnected {
        peripheral: PeripheralId,
        error: Option<StackError>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: Result<Vec<ServiceInfo>, StackError>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, StackError>,
    },
    /// Enabling or disabling value-change notifications finished.
    NotificationStateUpdated {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        result: Result<bool, StackError>,
    },
    /// A characteristic value arrived, from a notification or a read.
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        result: Result<Vec<u8>, StackError>,
    },
    /// A write-with-response was acknowledged.
    WriteCompleted {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        result: Result<(), StackError>,
    },
}

impl CentralEvent {
    /// Returns the peripheral this event concerns.
    #[must_use]
    pub fn peripheral(&self) -> &PeripheralId {
        match self {
            Self::PeripheralDiscovered { peripheral } | Self::Connected { peripheral } => {
                peripheral.id()
            }
            Self::ConnectFailed { peripheral, .. }
            | Self::Disconnected { peripheral, .. }
            | Self::ServicesDiscovered { peripheral, .. }
            | Self::CharacteristicsDiscovered { peripheral, .. }
            | Self::NotificationStateUpdated { peripheral, .. }
            | Self::ValueUpdated { peripheral, .. }
            | Self::WriteCompleted { peripheral, .. } => peripheral,
        }
    }

    /// Returns a short label for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeripheralDiscovered { .. } => "peripheral_discovered",
            Self::Connected { .. } => "connected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::Disconnected { .. } => "disconnected",
            Self::ServicesDiscovered { .. } => "services_discovered",
            Self::CharacteristicsDiscovered { .. } => "characteristics_discovered",
            Self::NotificationStateUpdated { .. } => "notification_state_updated",
            Self::ValueUpdated { .. } => "value_updated",
            Self::WriteCompleted { .. } => "write_completed",
        }
    }
}
