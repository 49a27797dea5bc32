use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// Connection lifecycle of the manager's single active peripheral.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Blocking operation categories, each with its own pending-completion list.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Connect,
    Disconnect,
    DiscoverServices,
    DiscoverCharacteristics,
    ConfigureNotification,
    WriteWithResponse,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn connection_state_defaults_to_idle() {
        assert_eq!(ConnectionState::Idle, ConnectionState::default());
    }

    #[test]
    fn operation_kinds_cover_six_categories() {
        let labels: Vec<String> = OperationKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(
            vec![
                "connect",
                "disconnect",
                "discover_services",
                "discover_characteristics",
                "configure_notification",
                "write_with_response",
            ],
            labels
        );
    }
}
