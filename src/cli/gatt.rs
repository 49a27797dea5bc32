use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::central::{
    CentralAdapter, CentralEvent, CharacteristicInfo, PeripheralId, PeripheralInfo, ScanRequest,
};
use crate::manager::ConnectionManager;
use crate::utils::parse_ble_uuid;

/// Returns `peripheral` from the adapter's known set, scanning for it when needed.
#[instrument(skip(adapter), level = "debug", fields(%peripheral))]
pub(crate) fn locate_peripheral(
    adapter: &CentralAdapter,
    peripheral: &PeripheralId,
    timeout: Duration,
) -> Result<PeripheralInfo> {
    if let Some(known) = adapter
        .retrieve_peripherals(std::slice::from_ref(peripheral))
        .into_iter()
        .next()
    {
        debug!("peripheral already known");
        return Ok(known);
    }

    let (sender, receiver) = std_mpsc::channel::<PeripheralInfo>();
    let wanted = peripheral.clone();
    let listener = adapter.add_listener(Arc::new(move |event: &CentralEvent| {
        if let CentralEvent::PeripheralDiscovered { peripheral } = event
            && peripheral.id() == &wanted
            && sender.send(peripheral.clone()).is_err()
        {
            trace!("locate receiver closed");
        }
    }));

    adapter.start_scan(&ScanRequest::default());
    let found = receiver.recv_timeout(timeout);
    adapter.stop_scan();
    adapter.remove_listener(listener);

    found.map_err(|_error| {
        anyhow!(
            "peripheral `{peripheral}` was not seen within {}",
            humantime::format_duration(timeout)
        )
    })
}

/// Discovers `service` and `characteristic` on the connected peripheral.
pub(crate) fn resolve_characteristic(
    manager: &ConnectionManager,
    service: Uuid,
    characteristic: Uuid,
) -> Result<CharacteristicInfo> {
    let services = manager.discover_services(&[service])?;
    if !services.iter().any(|found| found.uuid() == service) {
        bail!("service {service} is not offered by the peripheral");
    }

    manager
        .discover_characteristics(&[characteristic], service)?
        .into_iter()
        .find(|found| found.uuid() == characteristic)
        .ok_or_else(|| anyhow!("characteristic {characteristic} is not part of service {service}"))
}

pub(crate) fn parse_uuid_arg(value: &str) -> Result<Uuid, String> {
    parse_ble_uuid(value).map_err(|error| error.to_string())
}

pub(crate) fn parse_hex_arg(value: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = value
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|character| !character.is_whitespace() && *character != ':')
        .collect();
    hex::decode(cleaned).map_err(|error| error.to_string())
}
