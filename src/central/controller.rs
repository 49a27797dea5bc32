use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::event::CentralEvent;
use super::types::{CharacteristicRef, PeripheralId, PeripheralInfo, ScanRequest, WriteKind};

/// Platform central-role API consumed by [`super::CentralAdapter`].
///
/// Requests return immediately. Their outcome is reported later as a
/// [`CentralEvent`] through the [`EventEmitter`] the controller was built with.
/// The two `retrieve_*` calls answer from the controller's current knowledge
/// and do not produce events.
pub trait CentralController: Send + Sync {
    /// Starts connecting to a peripheral.
    fn connect(&self, peripheral: &PeripheralId);

    /// Cancels a pending connection or tears down an established one.
    fn cancel_connect(&self, peripheral: &PeripheralId);

    fn start_scan(&self, request: &ScanRequest);

    fn stop_scan(&self);

    /// Returns the known peripherals among `identifiers`.
    fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralInfo>;

    /// Returns connected peripherals exposing any of `services` (all when empty).
    fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralInfo>;

    /// Discovers `services` (all when empty) on a connected peripheral.
    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]);

    /// Discovers `characteristics` (all when empty) of one service.
    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    );

    /// Enables or disables value-change notifications at the radio level.
    fn set_notify(&self, peripheral: &PeripheralId, characteristic: &CharacteristicRef, enabled: bool);

    /// Requests a one-off read; the value arrives as [`CentralEvent::ValueUpdated`].
    fn read_value(&self, peripheral: &PeripheralId, characteristic: &CharacteristicRef);

    /// Queues a write and returns whether the stack accepted it for transmission.
    fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> bool;
}

/// Handle a controller uses to report events to the adapter's dispatch thread.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<CentralEvent>,
}

impl EventEmitter {
    pub(crate) fn new(sender: mpsc::UnboundedSender<CentralEvent>) -> Self {
        Self { sender }
    }

    /// Queues an event for delivery to every registered listener.
    pub fn emit(&self, event: CentralEvent) {
        trace!(event = event.label(), peripheral = %event.peripheral(), "emitting central event");
        if self.sender.send(event).is_err() {
            trace!("central adapter dropped; event discarded");
        }
    }

    /// Returns whether the adapter is still receiving events.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
