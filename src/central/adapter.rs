use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::controller::{CentralController, EventEmitter};
use super::event::CentralEvent;
use super::types::{CharacteristicRef, PeripheralId, PeripheralInfo, ScanRequest, WriteKind};
use crate::error::BleError;

const DISPATCH_THREAD_NAME: &str = "ble-events";

/// Receives every event delivered by a [`CentralAdapter`].
///
/// Called on the adapter's dispatch thread. Implementations must not block on
/// an operation whose completion is itself delivered as an event.
pub trait CentralListener: Send + Sync {
    fn on_event(&self, event: &CentralEvent);
}

impl<F> CentralListener for F
where
    F: Fn(&CentralEvent) + Send + Sync,
{
    fn on_event(&self, event: &CentralEvent) {
        self(event);
    }
}

/// Token returned by [`CentralAdapter::add_listener`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn CentralListener>)>>,
}

impl ListenerSet {
    fn add(&self, listener: Arc<dyn CentralListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(candidate, _listener)| *candidate != id);
        listeners.len() != before
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn dispatch(&self, event: &CentralEvent) {
        // Snapshot so listeners may add or remove listeners while handling.
        let snapshot: Vec<Arc<dyn CentralListener>> = self
            .lock()
            .iter()
            .map(|(_id, listener)| Arc::clone(listener))
            .collect();
        trace!(
            event = event.label(),
            listener_count = snapshot.len(),
            "dispatching central event"
        );
        for listener in snapshot {
            listener.on_event(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Arc<dyn CentralListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct AdapterInner {
    controller: Box<dyn CentralController>,
    listeners: Arc<ListenerSet>,
}

/// Single point of contact with the platform central, with multi-listener fan-out.
///
/// Cloning is cheap; clones share the controller and the listener list.
#[derive(Clone)]
pub struct CentralAdapter {
    inner: Arc<AdapterInner>,
}

impl fmt::Debug for CentralAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralAdapter")
            .field("listener_count", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl CentralAdapter {
    /// Spawns the event dispatch thread and builds the controller that feeds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatch thread cannot be spawned or the
    /// controller cannot be built.
    pub fn start<C, F>(make_controller: F) -> Result<Self, BleError>
    where
        C: CentralController + 'static,
        F: FnOnce(EventEmitter) -> Result<C, BleError>,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CentralEvent>();
        let listeners = Arc::new(ListenerSet::default());

        let dispatch_listeners = Arc::clone(&listeners);
        thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(event) = receiver.blocking_recv() {
                    dispatch_listeners.dispatch(&event);
                }
                debug!("central event stream closed; dispatch thread exiting");
            })
            .map_err(BleError::Runtime)?;

        let controller = make_controller(EventEmitter::new(sender))?;
        Ok(Self {
            inner: Arc::new(AdapterInner {
                controller: Box::new(controller),
                listeners,
            }),
        })
    }

    /// Registers a listener; it receives every event delivered after this call.
    pub fn add_listener(&self, listener: Arc<dyn CentralListener>) -> ListenerId {
        let id = self.inner.listeners.add(listener);
        debug!(?id, "central listener added");
        id
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.inner.listeners.remove(id);
        debug!(?id, removed, "central listener removed");
        removed
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    pub fn connect(&self, peripheral: &PeripheralId) {
        self.inner.controller.connect(peripheral);
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    pub fn cancel_connect(&self, peripheral: &PeripheralId) {
        self.inner.controller.cancel_connect(peripheral);
    }

    #[instrument(skip(self), level = "debug")]
    pub fn start_scan(&self, request: &ScanRequest) {
        self.inner.controller.start_scan(request);
    }

    #[instrument(skip(self), level = "debug")]
    pub fn stop_scan(&self) {
        self.inner.controller.stop_scan();
    }

    #[must_use]
    pub fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralInfo> {
        self.inner.controller.retrieve_peripherals(identifiers)
    }

    #[must_use]
    pub fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralInfo> {
        self.inner.controller.retrieve_connected_peripherals(services)
    }

    #[instrument(skip(self, services), level = "debug", fields(%peripheral, service_count = services.len()))]
    pub fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        self.inner.controller.discover_services(peripheral, services);
    }

    #[instrument(skip(self, characteristics), level = "debug", fields(%peripheral, %service))]
    pub fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        self.inner
            .controller
            .discover_characteristics(peripheral, service, characteristics);
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral, %characteristic))]
    pub fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) {
        self.inner
            .controller
            .set_notify(peripheral, characteristic, enabled);
    }

    #[instrument(skip(self), level = "trace", fields(%peripheral, %characteristic))]
    pub fn read_value(&self, peripheral: &PeripheralId, characteristic: &CharacteristicRef) {
        self.inner.controller.read_value(peripheral, characteristic);
    }

    #[instrument(
        skip(self, data),
        level = "trace",
        fields(%peripheral, %characteristic, %kind, data_len = data.len())
    )]
    pub fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> bool {
        self.inner
            .controller
            .write_value(peripheral, characteristic, data, kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Default)]
    struct SilentController;

    impl CentralController for SilentController {
        fn connect(&self, _peripheral: &PeripheralId) {}
        fn cancel_connect(&self, _peripheral: &PeripheralId) {}
        fn start_scan(&self, _request: &ScanRequest) {}
        fn stop_scan(&self) {}
        fn retrieve_peripherals(&self, _identifiers: &[PeripheralId]) -> Vec<PeripheralInfo> {
            Vec::new()
        }
        fn retrieve_connected_peripherals(&self, _services: &[Uuid]) -> Vec<PeripheralInfo> {
            Vec::new()
        }
        fn discover_services(&self, _peripheral: &PeripheralId, _services: &[Uuid]) {}
        fn discover_characteristics(
            &self,
            _peripheral: &PeripheralId,
            _service: Uuid,
            _characteristics: &[Uuid],
        ) {
        }
        fn set_notify(
            &self,
            _peripheral: &PeripheralId,
            _characteristic: &CharacteristicRef,
            _enabled: bool,
        ) {
        }
        fn read_value(&self, _peripheral: &PeripheralId, _characteristic: &CharacteristicRef) {}
        fn write_value(
            &self,
            _peripheral: &PeripheralId,
            _characteristic: &CharacteristicRef,
            _data: &[u8],
            _kind: WriteKind,
        ) -> bool {
            false
        }
    }

    fn start_with_emitter() -> (CentralAdapter, EventEmitter) {
        let mut captured = None;
        let adapter = CentralAdapter::start(|emitter| {
            captured = Some(emitter);
            Ok(SilentController)
        })
        .expect("adapter should start");
        (adapter, captured.expect("factory should run"))
    }

    fn discovered(id: &str) -> CentralEvent {
        CentralEvent::PeripheralDiscovered {
            peripheral: PeripheralInfo::new(PeripheralId::from(id), None, None),
        }
    }

    #[test]
    fn every_listener_receives_each_event() {
        let (adapter, emitter) = start_with_emitter();
        let (first_tx, first_rx) = std_mpsc::channel();
        let (second_tx, second_rx) = std_mpsc::channel();
        let first_tx = Mutex::new(first_tx);
        let second_tx = Mutex::new(second_tx);
        adapter.add_listener(Arc::new(move |event: &CentralEvent| {
            let _ = first_tx.lock().map(|tx| tx.send(event.clone()));
        }));
        adapter.add_listener(Arc::new(move |event: &CentralEvent| {
            let _ = second_tx.lock().map(|tx| tx.send(event.clone()));
        }));

        emitter.emit(discovered("AA"));

        let timeout = Duration::from_secs(5);
        assert_eq!(discovered("AA"), first_rx.recv_timeout(timeout).expect("first listener"));
        assert_eq!(discovered("AA"), second_rx.recv_timeout(timeout).expect("second listener"));
    }

    #[test]
    fn removed_listener_stops_receiving_events() {
        let (adapter, emitter) = start_with_emitter();
        let (removed_tx, removed_rx) = std_mpsc::channel();
        let (kept_tx, kept_rx) = std_mpsc::channel();
        let removed_tx = Mutex::new(removed_tx);
        let kept_tx = Mutex::new(kept_tx);
        let removed_id = adapter.add_listener(Arc::new(move |event: &CentralEvent| {
            let _ = removed_tx.lock().map(|tx| tx.send(event.clone()));
        }));
        adapter.add_listener(Arc::new(move |event: &CentralEvent| {
            let _ = kept_tx.lock().map(|tx| tx.send(event.clone()));
        }));

        assert!(adapter.remove_listener(removed_id));
        assert!(!adapter.remove_listener(removed_id));
        emitter.emit(discovered("BB"));

        // The kept listener runs after the removed one would have, so once it
        // has the event the removed listener has been skipped.
        kept_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("kept listener should receive the event");
        assert!(removed_rx.try_recv().is_err());
        assert_eq!(1, adapter.listener_count());
    }

    #[test]
    fn events_are_delivered_in_emission_order() {
        let (adapter, emitter) = start_with_emitter();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        adapter.add_listener(Arc::new(move |event: &CentralEvent| {
            let _ = tx.lock().map(|tx| tx.send(event.peripheral().clone()));
        }));

        for id in ["1", "2", "3"] {
            emitter.emit(discovered(id));
        }

        let received: Vec<PeripheralId> = (0..3)
            .map(|_| {
                rx.recv_timeout(Duration::from_secs(5))
                    .expect("event should arrive")
            })
            .collect();
        assert_eq!(
            vec![
                PeripheralId::from("1"),
                PeripheralId::from("2"),
                PeripheralId::from("3")
            ],
            received
        );
    }
}
