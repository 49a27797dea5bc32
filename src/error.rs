use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::central::{CharacteristicRef, PeripheralId, StackError};

/// Why a connection attempt did not reach the connected state.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum ConnectionFailure {
    /// The manager was not idle when `connect` was called.
    #[display("manager is busy ({state})")]
    Busy { state: crate::ConnectionState },
    /// The platform stack reported the connection attempt as failed.
    #[display("the stack refused the connection")]
    Refused,
    /// The peripheral disconnected before the connection completed.
    #[display("the link dropped while connecting")]
    LinkLost,
}

/// Errors returned by the blocking BLE manager and its collaborators.
#[derive(Debug, Error)]
pub enum BleError {
    #[error("connection to `{peripheral}` failed: {reason}")]
    Connection {
        peripheral: PeripheralId,
        reason: ConnectionFailure,
        #[source]
        cause: Option<StackError>,
    },
    #[error("no peripheral is connected")]
    NotConnected,
    #[error("disconnection from `{peripheral}` did not complete cleanly")]
    Disconnection {
        peripheral: PeripheralId,
        #[source]
        cause: Option<StackError>,
    },
    #[error("service discovery failed")]
    ServicesDiscovery {
        #[source]
        cause: StackError,
    },
    #[error("characteristic discovery failed for service {service}")]
    CharacteristicsDiscovery {
        service: Uuid,
        #[source]
        cause: StackError,
    },
    #[error("configuring notifications failed for characteristic {characteristic}")]
    CharacteristicConfiguration {
        characteristic: CharacteristicRef,
        #[source]
        cause: StackError,
    },
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error("no notification arrived within {}", humantime::format_duration(*timeout))]
    Timeout { timeout: Duration },
    #[error("the read ended without data")]
    NoData,
    #[error("no notification channel is registered under `{key}`")]
    UnknownKey { key: String },
    #[error("a notification channel is already registered under `{key}`")]
    DuplicateKey { key: String },
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("BLE backend operation failed")]
    Btleplug(#[from] btleplug::Error),
    #[error("failed to start the BLE runtime")]
    Runtime(#[source] std::io::Error),
}

impl BleError {
    /// Returns whether the caller may retry or reconnect after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Timeout { .. })
    }
}

/// Errors returned when parsing fake controller fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake scan fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain an empty device identifier")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("invalid hexadecimal payload")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("unknown fake response `{value}`; expected `succeed`, `fail` or `ignore`")]
    InvalidResponse { value: String },
    #[error("`{value}` is neither a 16-bit nor a 128-bit UUID")]
    InvalidUuid { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(BleError::NotConnected, true)]
    #[case(BleError::Timeout { timeout: Duration::from_secs(1) }, true)]
    #[case(BleError::NoData, false)]
    #[case(BleError::Stack(StackError::new("gatt 0x0e")), false)]
    #[case(BleError::UnknownKey { key: "battery".to_string() }, false)]
    fn recoverable_errors_are_not_connected_and_timeout(
        #[case] error: BleError,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, error.is_recoverable());
    }

    #[test]
    fn timeout_message_uses_human_readable_duration() {
        let error = BleError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            "no notification arrived within 1s 500ms",
            error.to_string()
        );
    }

    #[test]
    fn stack_error_is_surfaced_verbatim() {
        let error = BleError::from(StackError::new("peripheral rejected write"));
        assert_eq!("peripheral rejected write", error.to_string());
    }
}
