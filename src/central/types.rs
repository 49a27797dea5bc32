use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// Backend-specific peripheral identifier in its display form.
#[derive(
    Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Creates an identifier from its display form.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeripheralId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A peripheral seen by the central, either advertising or already known.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PeripheralInfo {
    id: PeripheralId,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl PeripheralInfo {
    /// Creates a peripheral record.
    #[must_use]
    pub fn new(id: PeripheralId, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id,
            local_name,
            rssi,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// GATT characteristic property.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CharProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

/// Addresses one characteristic inside one service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, derive_more::Display)]
#[display("{service}/{characteristic}")]
pub struct CharacteristicRef {
    service: Uuid,
    characteristic: Uuid,
}

impl CharacteristicRef {
    #[must_use]
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }
}

/// A characteristic discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    service: Uuid,
    uuid: Uuid,
    properties: Vec<CharProperty>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(service: Uuid, uuid: Uuid, properties: Vec<CharProperty>) -> Self {
        Self {
            service,
            uuid,
            properties,
        }
    }

    /// Returns the UUID of the owning service.
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn properties(&self) -> &[CharProperty] {
        &self.properties
    }

    #[must_use]
    pub fn supports(&self, property: CharProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Returns the address of this characteristic.
    #[must_use]
    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service, self.uuid)
    }
}

/// A GATT service with whatever characteristics have been discovered so far.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns whether this service is primary.
    #[must_use]
    pub fn primary(&self) -> bool {
        self.primary
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    pub(crate) fn set_characteristics(&mut self, characteristics: Vec<CharacteristicInfo>) {
        self.characteristics = characteristics;
    }
}

/// Write acknowledgement mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Scan parameters forwarded to the controller.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ScanRequest {
    services: Vec<Uuid>,
    allow_duplicates: bool,
}

impl ScanRequest {
    /// Restricts the scan to peripherals advertising any of `services`.
    #[must_use]
    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.services = services.into_iter().collect();
        self
    }

    /// Reports every advertisement rather than the first per peripheral.
    #[must_use]
    pub fn with_duplicates(mut self, allow_duplicates: bool) -> Self {
        self.allow_duplicates = allow_duplicates;
        self
    }

    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    #[must_use]
    pub fn allow_duplicates(&self) -> bool {
        self.allow_duplicates
    }
}

/// A failure reported by the platform BLE stack, carried verbatim.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{message}")]
pub struct StackError {
    message: String,
}

impl StackError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("write_without_response", CharProperty::WriteWithoutResponse)]
    #[case("notify", CharProperty::Notify)]
    #[case("indicate", CharProperty::Indicate)]
    fn char_property_labels_round_trip_through_strum(
        #[case] label: &str,
        #[case] expected: CharProperty,
    ) {
        assert_eq!(Ok(expected), CharProperty::from_str(label));
        assert_eq!(label, expected.to_string());
    }

    #[test]
    fn characteristic_reference_displays_service_and_characteristic() {
        let service = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
        let characteristic = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);
        let reference = CharacteristicRef::new(service, characteristic);

        assert_eq!(
            "0000180f-0000-1000-8000-00805f9b34fb/00002a19-0000-1000-8000-00805f9b34fb",
            reference.to_string()
        );
    }

    #[test]
    fn supports_checks_property_membership() {
        let info = CharacteristicInfo::new(
            Uuid::nil(),
            Uuid::from_u128(1),
            vec![CharProperty::Read, CharProperty::Notify],
        );
        assert!(info.supports(CharProperty::Notify));
        assert!(!info.supports(CharProperty::Write));
    }
}
