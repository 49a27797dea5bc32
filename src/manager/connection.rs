use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::pending::{PendingRequests, Slot, Wake, Waiters};
use super::state::{ConnectionState, OperationKind};
use crate::central::{
    CentralAdapter, CentralEvent, CentralListener, CharacteristicInfo, CharacteristicRef,
    ListenerId, PeripheralId, PeripheralInfo, ServiceInfo, StackError, WriteKind,
};
use crate::error::{BleError, ConnectionFailure};
use crate::notification::NotificationRegistry;

type DisconnectHandler = Arc<dyn Fn(&PeripheralId) + Send + Sync>;

#[derive(Debug, Default)]
struct LinkState {
    state: ConnectionState,
    active: Option<PeripheralInfo>,
    /// Peripheral of the connect attempt in flight.
    target: Option<PeripheralId>,
    services: Vec<ServiceInfo>,
}

impl LinkState {
    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
    }

    fn is_active(&self, peripheral: &PeripheralId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.id() == peripheral)
    }

    fn clear_active(&mut self) -> Option<PeripheralInfo> {
        self.transition(ConnectionState::Idle);
        self.target = None;
        self.services.clear();
        self.active.take()
    }

    fn merge_services(&mut self, discovered: &[ServiceInfo]) {
        for service in discovered {
            match self
                .services
                .iter_mut()
                .find(|known| known.uuid() == service.uuid())
            {
                Some(known) if service.characteristics().is_empty() => {
                    trace!(service = %known.uuid(), "service rediscovered; keeping characteristics");
                }
                Some(known) => *known = service.clone(),
                None => self.services.push(service.clone()),
            }
        }
    }

    fn merge_characteristics(&mut self, service: Uuid, discovered: &[CharacteristicInfo]) {
        let Some(known) = self
            .services
            .iter_mut()
            .find(|known| known.uuid() == service)
        else {
            trace!(%service, "characteristics for an undiscovered service");
            return;
        };
        let mut characteristics = known.characteristics().to_vec();
        for characteristic in discovered {
            match characteristics
                .iter_mut()
                .find(|existing| existing.uuid() == characteristic.uuid())
            {
                Some(existing) => *existing = characteristic.clone(),
                None => characteristics.push(characteristic.clone()),
            }
        }
        known.set_characteristics(characteristics);
    }
}

struct Shared {
    link: Mutex<LinkState>,
    pending: Mutex<PendingRequests>,
    registry: Arc<NotificationRegistry>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, event: &CentralEvent) {
        match event {
            CentralEvent::PeripheralDiscovered { .. } => {}
            CentralEvent::Connected { peripheral } => self.on_connected(peripheral),
            CentralEvent::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(peripheral, error.as_ref());
            }
            CentralEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(peripheral, error.as_ref());
            }
            CentralEvent::ServicesDiscovered { peripheral, result } => {
                let mut link = self.link();
                if !link.is_active(peripheral) {
                    return unrelated(event);
                }
                if let Ok(services) = result {
                    link.merge_services(services);
                }
                complete(event, &mut self.pending().services, result.clone());
            }
            CentralEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                let mut link = self.link();
                if !link.is_active(peripheral) {
                    return unrelated(event);
                }
                if let Ok(characteristics) = result {
                    link.merge_characteristics(*service, characteristics);
                }
                complete(event, &mut self.pending().characteristics, result.clone());
            }
            CentralEvent::NotificationStateUpdated {
                peripheral, result, ..
            } => {
                let link = self.link();
                if !link.is_active(peripheral) {
                    return unrelated(event);
                }
                complete(event, &mut self.pending().configure, result.clone());
            }
            CentralEvent::WriteCompleted {
                peripheral, result, ..
            } => {
                let link = self.link();
                if !link.is_active(peripheral) {
                    return unrelated(event);
                }
                complete(event, &mut self.pending().write, result.clone());
            }
            CentralEvent::ValueUpdated {
                peripheral,
                characteristic,
                result,
            } => {
                if !self.link().is_active(peripheral) {
                    return unrelated(event);
                }
                match result {
                    Ok(payload) => {
                        self.registry
                            .dispatch(characteristic.characteristic(), payload);
                    }
                    Err(error) => {
                        warn!(%peripheral, %characteristic, %error, "characteristic value update failed");
                    }
                }
            }
        }
    }

    fn on_connected(&self, peripheral: &PeripheralInfo) {
        let mut link = self.link();
        if link.state != ConnectionState::Connecting || link.target.as_ref() != Some(peripheral.id())
        {
            warn!(peripheral = %peripheral.id(), state = %link.state, "unsolicited connection event");
            return;
        }
        link.target = None;
        link.services.clear();
        link.active = Some(peripheral.clone());
        link.transition(ConnectionState::Connected);
        info!(peripheral = %peripheral.id(), "peripheral connected");
        self.pending().connect.complete(Ok(peripheral.clone()));
    }

    fn on_connect_failed(&self, peripheral: &PeripheralId, error: Option<&StackError>) {
        let mut link = self.link();
        if link.state != ConnectionState::Connecting || link.target.as_ref() != Some(peripheral) {
            warn!(%peripheral, state = %link.state, "unsolicited connection failure");
            return;
        }
        link.target = None;
        link.transition(ConnectionState::Idle);
        warn!(%peripheral, error = ?error, "connection attempt failed");
        self.pending().connect.complete(Err(error.cloned()));
    }

    fn on_disconnected(&self, peripheral: &PeripheralId, error: Option<&StackError>) {
        let mut link = self.link();
        if link.state == ConnectionState::Connecting && link.target.as_ref() == Some(peripheral) {
            link.target = None;
            link.transition(ConnectionState::Idle);
            drop(link);
            warn!(%peripheral, "link dropped while connecting");
            self.pending().link_lost(error);
            return;
        }
        if !link.is_active(peripheral) {
            trace!(%peripheral, "disconnection of an inactive peripheral ignored");
            return;
        }

        let requested = link.state == ConnectionState::Disconnecting;
        link.clear_active();
        let mut pending = self.pending();
        let interrupted = pending.link_lost(error);
        pending.disconnect.wake_all(|| Wake::Completed(error.cloned()));
        drop(pending);
        drop(link);

        if requested {
            info!(%peripheral, interrupted, "peripheral disconnected");
        } else {
            warn!(%peripheral, interrupted, error = ?error, "peripheral link lost");
        }
        self.notify_disconnect(peripheral);
    }

    fn notify_disconnect(&self, peripheral: &PeripheralId) {
        let handler = self
            .disconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(peripheral);
        }
    }
}

fn complete<T>(event: &CentralEvent, waiters: &mut Waiters<T>, value: T) {
    if !waiters.complete(value) {
        warn!(event = event.label(), "completion arrived with no pending caller");
    }
}

fn unrelated(event: &CentralEvent) {
    trace!(
        event = event.label(),
        peripheral = %event.peripheral(),
        "event for a peripheral other than the active one ignored"
    );
}

struct ManagerListener {
    shared: Weak<Shared>,
}

impl CentralListener for ManagerListener {
    fn on_event(&self, event: &CentralEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_event(event);
        }
    }
}

/// Blocking connection manager for a single active peripheral.
///
/// Every blocking call registers its own completion slot and waits for the
/// matching [`CentralEvent`]. Callers must serialise calls of the same
/// [`OperationKind`]: the platform does not tag completions with the request
/// that caused them, so the oldest waiter of a category takes the next
/// completion of that category.
pub struct ConnectionManager {
    adapter: CentralAdapter,
    shared: Arc<Shared>,
    listener: ListenerId,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager and subscribes it to `adapter`'s events.
    #[must_use]
    pub fn new(adapter: CentralAdapter) -> Self {
        let shared = Arc::new(Shared {
            link: Mutex::new(LinkState::default()),
            pending: Mutex::new(PendingRequests::default()),
            registry: Arc::new(NotificationRegistry::new()),
            disconnect_handler: Mutex::new(None),
        });
        let listener = adapter.add_listener(Arc::new(ManagerListener {
            shared: Arc::downgrade(&shared),
        }));
        Self {
            adapter,
            shared,
            listener,
        }
    }

    /// Returns the adapter this manager issues requests through.
    #[must_use]
    pub fn adapter(&self) -> &CentralAdapter {
        &self.adapter
    }

    /// Returns the registry receiving this manager's characteristic values.
    ///
    /// Clone the handle to reach the registry from a disconnect handler.
    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationRegistry> {
        &self.shared.registry
    }

    /// Installs the callback run once each time the active peripheral is lost.
    ///
    /// It runs on the adapter's event thread after the state is back to idle,
    /// or on the caller's thread when `disconnect` had to force the teardown.
    pub fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(&PeripheralId) + Send + Sync + 'static,
    {
        *self
            .shared
            .disconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.link().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        let link = self.shared.link();
        link.state == ConnectionState::Connected && link.active.is_some()
    }

    #[must_use]
    pub fn active_peripheral(&self) -> Option<PeripheralInfo> {
        self.shared.link().active.clone()
    }

    /// Returns the services and characteristics discovered on the active peripheral.
    #[must_use]
    pub fn services(&self) -> Vec<ServiceInfo> {
        let link = self.shared.link();
        if link.state == ConnectionState::Connected {
            link.services.clone()
        } else {
            Vec::new()
        }
    }

    /// Number of callers currently blocked in `kind`.
    #[must_use]
    pub fn pending(&self, kind: OperationKind) -> usize {
        self.shared.pending().len(kind)
    }

    /// Connects to `peripheral` and blocks until the attempt resolves.
    ///
    /// # Errors
    ///
    /// - [`BleError::Connection`] if the manager is busy, the stack refuses the
    ///   connection, or the link drops before it completes.
    /// - [`BleError::NotConnected`] if woken by [`Self::unlock`] or [`Self::reset`].
    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    pub fn connect(&self, peripheral: &PeripheralId) -> Result<PeripheralInfo, BleError> {
        let slot = {
            let mut link = self.shared.link();
            if link.state != ConnectionState::Idle {
                return Err(BleError::Connection {
                    peripheral: peripheral.clone(),
                    reason: ConnectionFailure::Busy { state: link.state },
                    cause: None,
                });
            }
            link.target = Some(peripheral.clone());
            link.transition(ConnectionState::Connecting);
            self.shared.pending().connect.register()
        };

        self.adapter.connect(peripheral);
        match slot.wait() {
            Wake::Completed(Ok(info)) => Ok(info),
            Wake::Completed(Err(cause)) => Err(BleError::Connection {
                peripheral: peripheral.clone(),
                reason: ConnectionFailure::Refused,
                cause,
            }),
            Wake::LinkLost(cause) => Err(BleError::Connection {
                peripheral: peripheral.clone(),
                reason: ConnectionFailure::LinkLost,
                cause,
            }),
            Wake::Unlocked => self.abandon_connect(peripheral),
        }
    }

    fn abandon_connect(&self, peripheral: &PeripheralId) -> Result<PeripheralInfo, BleError> {
        let mut link = self.shared.link();
        if link.state == ConnectionState::Connected && link.is_active(peripheral) {
            // The connection won the race against the unlock.
            return link.active.clone().ok_or(BleError::NotConnected);
        }
        let attempt_pending = link.state == ConnectionState::Connecting
            && link.target.as_ref() == Some(peripheral);
        if attempt_pending {
            link.target = None;
            link.transition(ConnectionState::Idle);
        }
        drop(link);

        if attempt_pending {
            debug!(%peripheral, "cancelling abandoned connection attempt");
            self.adapter.cancel_connect(peripheral);
        }
        Err(BleError::NotConnected)
    }

    /// Disconnects the active peripheral and discards every notification channel.
    ///
    /// The manager is idle when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`BleError::NotConnected`] if `peripheral` is not the active peripheral.
    /// - [`BleError::Disconnection`] if the stack reported a failure or the
    ///   call was woken before the link went down.
    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    pub fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), BleError> {
        let slot = {
            let mut link = self.shared.link();
            if link.state != ConnectionState::Connected || !link.is_active(peripheral) {
                return Err(BleError::NotConnected);
            }
            link.transition(ConnectionState::Disconnecting);
            self.shared.pending().disconnect.register()
        };

        self.adapter.cancel_connect(peripheral);
        let outcome = slot.wait();

        let forced = {
            let mut link = self.shared.link();
            link.is_active(peripheral) && link.clear_active().is_some()
        };
        if forced {
            debug!("disconnect woken before the link went down; forcing idle");
            self.shared.pending().link_lost(None);
            self.shared.notify_disconnect(peripheral);
        }
        self.shared.registry.reset_all();

        match outcome {
            Wake::Completed(None) => Ok(()),
            Wake::Completed(Some(cause)) => Err(BleError::Disconnection {
                peripheral: peripheral.clone(),
                cause: Some(cause),
            }),
            Wake::LinkLost(cause) => Err(BleError::Disconnection {
                peripheral: peripheral.clone(),
                cause,
            }),
            Wake::Unlocked => Err(BleError::Disconnection {
                peripheral: peripheral.clone(),
                cause: None,
            }),
        }
    }

    /// Discovers `services` (all when empty) on the active peripheral.
    ///
    /// # Errors
    ///
    /// [`BleError::ServicesDiscovery`] on a stack failure, [`BleError::NotConnected`]
    /// when not connected or interrupted.
    #[instrument(skip(self, services), level = "debug", fields(service_count = services.len()))]
    pub fn discover_services(&self, services: &[Uuid]) -> Result<Vec<ServiceInfo>, BleError> {
        let (peripheral, slot) = self.begin(|pending| &mut pending.services)?;
        self.adapter.discover_services(&peripheral, services);
        match slot.wait() {
            Wake::Completed(Ok(discovered)) => Ok(discovered),
            Wake::Completed(Err(cause)) => Err(BleError::ServicesDiscovery { cause }),
            Wake::LinkLost(_) | Wake::Unlocked => Err(BleError::NotConnected),
        }
    }

    /// Discovers `characteristics` (all when empty) of `service`.
    ///
    /// # Errors
    ///
    /// [`BleError::CharacteristicsDiscovery`] on a stack failure,
    /// [`BleError::NotConnected`] when not connected or interrupted.
    #[instrument(skip(self, characteristics), level = "debug", fields(%service))]
    pub fn discover_characteristics(
        &self,
        characteristics: &[Uuid],
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, BleError> {
        let (peripheral, slot) = self.begin(|pending| &mut pending.characteristics)?;
        self.adapter
            .discover_characteristics(&peripheral, service, characteristics);
        match slot.wait() {
            Wake::Completed(Ok(discovered)) => Ok(discovered),
            Wake::Completed(Err(cause)) => {
                Err(BleError::CharacteristicsDiscovery { service, cause })
            }
            Wake::LinkLost(_) | Wake::Unlocked => Err(BleError::NotConnected),
        }
    }

    /// Enables value-change notifications for `characteristic` at the radio level.
    ///
    /// # Errors
    ///
    /// [`BleError::CharacteristicConfiguration`] on a stack failure,
    /// [`BleError::NotConnected`] when not connected or interrupted.
    #[instrument(skip(self), level = "debug", fields(%characteristic))]
    pub fn configure_notification(&self, characteristic: &CharacteristicRef) -> Result<(), BleError> {
        self.set_notify(characteristic, true)
    }

    /// Disables value-change notifications for `characteristic`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::configure_notification`].
    #[instrument(skip(self), level = "debug", fields(%characteristic))]
    pub fn disable_notification(&self, characteristic: &CharacteristicRef) -> Result<(), BleError> {
        self.set_notify(characteristic, false)
    }

    fn set_notify(&self, characteristic: &CharacteristicRef, enabled: bool) -> Result<(), BleError> {
        let (peripheral, slot) = self.begin(|pending| &mut pending.configure)?;
        self.adapter.set_notify(&peripheral, characteristic, enabled);
        match slot.wait() {
            Wake::Completed(Ok(_)) => Ok(()),
            Wake::Completed(Err(cause)) => Err(BleError::CharacteristicConfiguration {
                characteristic: *characteristic,
                cause,
            }),
            Wake::LinkLost(_) | Wake::Unlocked => Err(BleError::NotConnected),
        }
    }

    /// Writes `data` and blocks until the peripheral acknowledges it.
    ///
    /// # Errors
    ///
    /// [`BleError::Stack`] when the write is rejected, [`BleError::NotConnected`]
    /// when not connected or interrupted.
    #[instrument(skip(self, data), level = "debug", fields(%characteristic, payload_len = data.len()))]
    pub fn write_with_response(
        &self,
        data: &[u8],
        characteristic: &CharacteristicRef,
    ) -> Result<(), BleError> {
        let (peripheral, slot) = self.begin(|pending| &mut pending.write)?;
        if !self
            .adapter
            .write_value(&peripheral, characteristic, data, WriteKind::WithResponse)
        {
            drop(slot);
            self.shared.pending().write.prune();
            return Err(BleError::Stack(StackError::new(
                "the stack did not accept the write",
            )));
        }
        match slot.wait() {
            Wake::Completed(result) => result.map_err(BleError::from),
            Wake::LinkLost(_) | Wake::Unlocked => Err(BleError::NotConnected),
        }
    }

    /// Queues `data` for transmission without acknowledgement.
    ///
    /// Returns whether the stack accepted the write; `false` when not connected.
    #[instrument(skip(self, data), level = "debug", fields(%characteristic, payload_len = data.len()))]
    pub fn write_without_response(&self, data: &[u8], characteristic: &CharacteristicRef) -> bool {
        let Some(peripheral) = self.connected_peripheral() else {
            return false;
        };
        self.adapter
            .write_value(&peripheral, characteristic, data, WriteKind::WithoutResponse)
    }

    /// Requests a one-off read of `characteristic`.
    ///
    /// The value is delivered through the notification registry like any
    /// notification, so a channel must watch `characteristic` to receive it.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotConnected`] when not connected.
    #[instrument(skip(self), level = "debug", fields(%characteristic))]
    pub fn read_value(&self, characteristic: &CharacteristicRef) -> Result<(), BleError> {
        let peripheral = self.connected_peripheral().ok_or(BleError::NotConnected)?;
        self.adapter.read_value(&peripheral, characteristic);
        Ok(())
    }

    /// Wakes every blocked call of every category. Returns how many were woken.
    ///
    /// Woken calls report [`BleError::NotConnected`] ([`BleError::Disconnection`]
    /// for `disconnect`).
    #[instrument(skip(self), level = "debug")]
    pub fn unlock(&self) -> usize {
        let woken = self.shared.pending().unlock();
        debug!(woken, "pending operations unlocked");
        woken
    }

    /// Returns to idle, forgets the active peripheral, discards every
    /// notification channel and every pending completion.
    ///
    /// No request reaches the radio; an established link stays up until the
    /// peripheral or the platform drops it.
    #[instrument(skip(self), level = "debug")]
    pub fn reset(&self) {
        let discarded = {
            let mut link = self.shared.link();
            if let Some(active) = link.clear_active() {
                debug!(peripheral = %active.id(), "active peripheral forgotten");
            }
            self.shared.pending().clear()
        };
        let channels = self.shared.registry.reset_all();
        info!(discarded, channels, "connection manager reset");
    }

    fn connected_peripheral(&self) -> Option<PeripheralId> {
        let link = self.shared.link();
        if link.state != ConnectionState::Connected {
            return None;
        }
        link.active.as_ref().map(|active| active.id().clone())
    }

    fn begin<T>(
        &self,
        select: impl FnOnce(&mut PendingRequests) -> &mut Waiters<T>,
    ) -> Result<(PeripheralId, Slot<T>), BleError> {
        let link = self.shared.link();
        if link.state != ConnectionState::Connected {
            return Err(BleError::NotConnected);
        }
        let peripheral = link
            .active
            .as_ref()
            .map(|active| active.id().clone())
            .ok_or(BleError::NotConnected)?;
        let slot = select(&mut self.shared.pending()).register();
        Ok((peripheral, slot))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.adapter.remove_listener(self.listener);
    }
}
