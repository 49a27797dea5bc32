use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btleplug::api::{
    Central, CentralEvent as AdapterEvent, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::runtime::Runtime;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::controller::{CentralController, EventEmitter};
use super::event::CentralEvent;
use super::types::{
    CharProperty, CharacteristicInfo, CharacteristicRef, PeripheralId, PeripheralInfo,
    ScanRequest, ServiceInfo, StackError, WriteKind,
};
use crate::error::BleError;

const PROPERTY_FLAGS: [(CharPropFlags, CharProperty); 8] = [
    (CharPropFlags::BROADCAST, CharProperty::Broadcast),
    (CharPropFlags::READ, CharProperty::Read),
    (
        CharPropFlags::WRITE_WITHOUT_RESPONSE,
        CharProperty::WriteWithoutResponse,
    ),
    (CharPropFlags::WRITE, CharProperty::Write),
    (CharPropFlags::NOTIFY, CharProperty::Notify),
    (CharPropFlags::INDICATE, CharProperty::Indicate),
    (
        CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
        CharProperty::AuthenticatedSignedWrites,
    ),
    (
        CharPropFlags::EXTENDED_PROPERTIES,
        CharProperty::ExtendedProperties,
    ),
];

/// Central controller backed by `btleplug` and a private tokio runtime.
///
/// Every request is spawned onto the runtime; its result is emitted as the
/// matching [`CentralEvent`].
pub struct BtleplugController {
    runtime: Runtime,
    shared: Arc<BackendShared>,
    shutdown: CancellationToken,
    _manager: Manager,
}

struct BackendShared {
    adapter: Adapter,
    emitter: EventEmitter,
    peripherals: Mutex<HashMap<PeripheralId, Peripheral>>,
    /// Connected peripherals and the token stopping their notification pump.
    links: Mutex<HashMap<PeripheralId, CancellationToken>>,
    allow_duplicates: AtomicBool,
}

impl BackendShared {
    fn peripherals(&self) -> MutexGuard<'_, HashMap<PeripheralId, Peripheral>> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn links(&self) -> MutexGuard<'_, HashMap<PeripheralId, CancellationToken>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, StackError> {
        self.peripherals()
            .get(id)
            .cloned()
            .ok_or_else(|| StackError::new(format!("unknown peripheral `{id}`; scan first")))
    }

    /// Forgets a link and stops its notification pump. Returns whether the link existed.
    fn close_link(&self, id: &PeripheralId) -> bool {
        let Some(token) = self.links().remove(id) else {
            return false;
        };
        token.cancel();
        true
    }
}

impl BtleplugController {
    /// Opens the adapter at `adapter_index` and starts pumping its events.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot start, no adapter exists at
    /// `adapter_index`, or the adapter event stream cannot be opened.
    pub fn new(emitter: EventEmitter, adapter_index: usize) -> Result<Self, BleError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ble-runtime")
            .build()
            .map_err(BleError::Runtime)?;

        let (manager, adapter, events) = runtime.block_on(async {
            let manager = Manager::new().await?;
            let adapter = manager
                .adapters()
                .await?
                .into_iter()
                .nth(adapter_index)
                .ok_or(BleError::NoAdapters)?;
            let events = adapter.events().await?;
            Ok::<_, BleError>((manager, adapter, events))
        })?;
        info!(adapter_index, "opened BLE adapter");

        let shared = Arc::new(BackendShared {
            adapter,
            emitter,
            peripherals: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            allow_duplicates: AtomicBool::new(false),
        });
        let shutdown = CancellationToken::new();

        let pump_shared = Arc::clone(&shared);
        let pump_shutdown = shutdown.child_token();
        runtime.spawn(async move {
            let mut events = events;
            loop {
                tokio::select! {
                    () = pump_shutdown.cancelled() => break,
                    next = events.next() => match next {
                        Some(event) => handle_adapter_event(&pump_shared, event).await,
                        None => break,
                    },
                }
            }
            debug!("adapter event pump stopped");
        });

        Ok(Self {
            runtime,
            shared,
            shutdown,
            _manager: manager,
        })
    }

    fn spawn_request<F>(&self, request: impl FnOnce(Arc<BackendShared>) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(request(Arc::clone(&self.shared)));
    }
}

impl Drop for BtleplugController {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for token in self.shared.links().values() {
            token.cancel();
        }
    }
}

impl CentralController for BtleplugController {
    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    fn connect(&self, peripheral: &PeripheralId) {
        let id = peripheral.clone();
        self.spawn_request(|shared| async move {
            let result = async {
                let target = shared.peripheral(&id)?;
                target.connect().await.map_err(stack_error)?;
                Ok::<_, StackError>(target)
            }
            .await;

            match result {
                Ok(target) => {
                    let token = CancellationToken::new();
                    shared.links().insert(id.clone(), token.clone());
                    tokio::spawn(pump_notifications(
                        Arc::clone(&shared),
                        id.clone(),
                        target.clone(),
                        token,
                    ));
                    let info = peripheral_info(&id, &target).await;
                    shared
                        .emitter
                        .emit(CentralEvent::Connected { peripheral: info });
                }
                Err(error) => shared.emitter.emit(CentralEvent::ConnectFailed {
                    peripheral: id,
                    error: Some(error),
                }),
            }
        });
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral))]
    fn cancel_connect(&self, peripheral: &PeripheralId) {
        let id = peripheral.clone();
        self.spawn_request(|shared| async move {
            let was_linked = shared.links().contains_key(&id);
            let error = match shared.peripheral(&id) {
                Ok(target) => target.disconnect().await.err().map(stack_error),
                Err(error) => Some(error),
            };
            // The adapter may already have reported the loss of an established link.
            if shared.close_link(&id) || !was_linked {
                shared.emitter.emit(CentralEvent::Disconnected {
                    peripheral: id,
                    error,
                });
            }
        });
    }

    #[instrument(skip(self), level = "debug")]
    fn start_scan(&self, request: &ScanRequest) {
        self.shared
            .allow_duplicates
            .store(request.allow_duplicates(), Ordering::Relaxed);
        let filter = ScanFilter {
            services: request.services().to_vec(),
        };
        self.spawn_request(|shared| async move {
            if let Err(error) = shared.adapter.start_scan(filter).await {
                warn!(?error, "failed to start BLE scan");
            }
        });
    }

    #[instrument(skip(self), level = "debug")]
    fn stop_scan(&self) {
        self.spawn_request(|shared| async move {
            if let Err(error) = shared.adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        });
    }

    fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralInfo> {
        let known: Vec<(PeripheralId, Peripheral)> = {
            let peripherals = self.shared.peripherals();
            identifiers
                .iter()
                .filter_map(|id| peripherals.get(id).map(|found| (id.clone(), found.clone())))
                .collect()
        };
        self.runtime.block_on(async {
            let mut infos = Vec::with_capacity(known.len());
            for (id, found) in &known {
                infos.push(peripheral_info(id, found).await);
            }
            infos
        })
    }

    fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralInfo> {
        let linked: Vec<(PeripheralId, Peripheral)> = {
            let links = self.shared.links();
            self.shared
                .peripherals()
                .iter()
                .filter(|(id, _found)| links.contains_key(*id))
                .map(|(id, found)| (id.clone(), found.clone()))
                .collect()
        };
        self.runtime.block_on(async {
            let mut infos = Vec::new();
            for (id, found) in &linked {
                let exposes = services.is_empty()
                    || found
                        .services()
                        .iter()
                        .any(|service| services.contains(&service.uuid));
                if exposes {
                    infos.push(peripheral_info(id, found).await);
                }
            }
            infos
        })
    }

    #[instrument(skip(self, services), level = "debug", fields(%peripheral))]
    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        let id = peripheral.clone();
        let wanted = services.to_vec();
        self.spawn_request(|shared| async move {
            let result = async {
                let target = shared.peripheral(&id)?;
                target.discover_services().await.map_err(stack_error)?;
                let mut discovered: Vec<ServiceInfo> = target
                    .services()
                    .into_iter()
                    .filter(|service| wanted.is_empty() || wanted.contains(&service.uuid))
                    .map(|service| ServiceInfo::new(service.uuid, service.primary, Vec::new()))
                    .collect();
                discovered.sort_by_key(ServiceInfo::uuid);
                Ok::<_, StackError>(discovered)
            }
            .await;
            shared.emitter.emit(CentralEvent::ServicesDiscovered {
                peripheral: id,
                result,
            });
        });
    }

    #[instrument(skip(self, characteristics), level = "debug", fields(%peripheral, %service))]
    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let id = peripheral.clone();
        let wanted = characteristics.to_vec();
        self.spawn_request(|shared| async move {
            let result = shared.peripheral(&id).and_then(|target| {
                let found = target
                    .services()
                    .into_iter()
                    .find(|candidate| candidate.uuid == service)
                    .ok_or_else(|| StackError::new(format!("service {service} not discovered")))?;
                let mut infos: Vec<CharacteristicInfo> = found
                    .characteristics
                    .iter()
                    .filter(|characteristic| {
                        wanted.is_empty() || wanted.contains(&characteristic.uuid)
                    })
                    .map(characteristic_info)
                    .collect();
                infos.sort_by_key(CharacteristicInfo::uuid);
                Ok(infos)
            });
            shared.emitter.emit(CentralEvent::CharacteristicsDiscovered {
                peripheral: id,
                service,
                result,
            });
        });
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral, %characteristic))]
    fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) {
        let id = peripheral.clone();
        let reference = *characteristic;
        self.spawn_request(|shared| async move {
            let result = async {
                let target = shared.peripheral(&id)?;
                let found = find_characteristic(&target, &reference)?;
                if enabled {
                    target.subscribe(&found).await.map_err(stack_error)?;
                } else {
                    target.unsubscribe(&found).await.map_err(stack_error)?;
                }
                Ok::<_, StackError>(enabled)
            }
            .await;
            shared.emitter.emit(CentralEvent::NotificationStateUpdated {
                peripheral: id,
                characteristic: reference,
                result,
            });
        });
    }

    #[instrument(skip(self), level = "debug", fields(%peripheral, %characteristic))]
    fn read_value(&self, peripheral: &PeripheralId, characteristic: &CharacteristicRef) {
        let id = peripheral.clone();
        let reference = *characteristic;
        self.spawn_request(|shared| async move {
            let result = async {
                let target = shared.peripheral(&id)?;
                let found = find_characteristic(&target, &reference)?;
                target.read(&found).await.map_err(stack_error)
            }
            .await;
            shared.emitter.emit(CentralEvent::ValueUpdated {
                peripheral: id,
                characteristic: reference,
                result,
            });
        });
    }

    #[instrument(
        skip(self, data),
        level = "debug",
        fields(%peripheral, %characteristic, %kind, payload_len = data.len())
    )]
    fn write_value(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> bool {
        if !self.shared.links().contains_key(peripheral) {
            debug!("write rejected; peripheral is not connected");
            return false;
        }

        let id = peripheral.clone();
        let reference = *characteristic;
        let payload = data.to_vec();
        self.spawn_request(|shared| async move {
            let result = async {
                let target = shared.peripheral(&id)?;
                let found = find_characteristic(&target, &reference)?;
                target
                    .write(&found, &payload, write_type(kind))
                    .await
                    .map_err(stack_error)
            }
            .await;
            match kind {
                WriteKind::WithResponse => {
                    shared.emitter.emit(CentralEvent::WriteCompleted {
                        peripheral: id,
                        characteristic: reference,
                        result,
                    });
                }
                WriteKind::WithoutResponse => {
                    if let Err(error) = result {
                        warn!(%error, peripheral = %id, "write without response failed");
                    }
                }
            }
        });
        true
    }
}

async fn handle_adapter_event(shared: &Arc<BackendShared>, event: AdapterEvent) {
    match event {
        AdapterEvent::DeviceDiscovered(platform_id) => {
            report_discovery(shared, &platform_id).await;
        }
        AdapterEvent::DeviceUpdated(platform_id)
            if shared.allow_duplicates.load(Ordering::Relaxed) =>
        {
            report_discovery(shared, &platform_id).await;
        }
        AdapterEvent::DeviceDisconnected(platform_id) => {
            let id = PeripheralId::new(platform_id.to_string());
            if shared.close_link(&id) {
                debug!(peripheral = %id, "adapter reported disconnection");
                shared.emitter.emit(CentralEvent::Disconnected {
                    peripheral: id,
                    error: None,
                });
            }
        }
        other => trace!(event = ?other, "adapter event ignored"),
    }
}

async fn report_discovery(shared: &Arc<BackendShared>, platform_id: &btleplug::platform::PeripheralId) {
    let found = match shared.adapter.peripheral(platform_id).await {
        Ok(found) => found,
        Err(error) => {
            debug!(?error, "discovered peripheral vanished before lookup");
            return;
        }
    };
    let id = PeripheralId::new(platform_id.to_string());
    shared.peripherals().insert(id.clone(), found.clone());
    let info = peripheral_info(&id, &found).await;
    shared
        .emitter
        .emit(CentralEvent::PeripheralDiscovered { peripheral: info });
}

#[instrument(skip(shared, target, token), level = "debug", fields(%id))]
async fn pump_notifications(
    shared: Arc<BackendShared>,
    id: PeripheralId,
    target: Peripheral,
    token: CancellationToken,
) {
    let mut notifications = match target.notifications().await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(?error, "could not open notification stream");
            return;
        }
    };

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            next = notifications.next() => match next {
                Some(notification) => {
                    shared.emitter.emit(CentralEvent::ValueUpdated {
                        peripheral: id.clone(),
                        characteristic: CharacteristicRef::new(
                            notification.service_uuid,
                            notification.uuid,
                        ),
                        result: Ok(notification.value),
                    });
                }
                None => break,
            },
        }
    }
    debug!("notification stream closed");
}

async fn peripheral_info(id: &PeripheralId, found: &Peripheral) -> PeripheralInfo {
    match found.properties().await {
        Ok(Some(properties)) => PeripheralInfo::new(id.clone(), properties.local_name, properties.rssi),
        Ok(None) => PeripheralInfo::new(id.clone(), None, None),
        Err(error) => {
            debug!(?error, peripheral = %id, "failed to read peripheral properties");
            PeripheralInfo::new(id.clone(), None, None)
        }
    }
}

fn find_characteristic(
    target: &Peripheral,
    reference: &CharacteristicRef,
) -> Result<Characteristic, StackError> {
    target
        .characteristics()
        .into_iter()
        .find(|candidate| {
            candidate.service_uuid == reference.service()
                && candidate.uuid == reference.characteristic()
        })
        .ok_or_else(|| StackError::new(format!("characteristic {reference} not discovered")))
}

fn characteristic_info(characteristic: &Characteristic) -> CharacteristicInfo {
    CharacteristicInfo::new(
        characteristic.service_uuid,
        characteristic.uuid,
        char_properties(characteristic.properties),
    )
}

fn char_properties(flags: CharPropFlags) -> Vec<CharProperty> {
    PROPERTY_FLAGS
        .iter()
        .filter(|(flag, _property)| flags.contains(*flag))
        .map(|(_flag, property)| *property)
        .collect()
}

fn write_type(kind: WriteKind) -> WriteType {
    match kind {
        WriteKind::WithResponse => WriteType::WithResponse,
        WriteKind::WithoutResponse => WriteType::WithoutResponse,
    }
}

fn stack_error(error: btleplug::Error) -> StackError {
    StackError::new(error.to_string())
}
