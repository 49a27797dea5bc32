use std::io;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::central::{CharProperty, CharacteristicRef, PeripheralId, PeripheralInfo, WriteKind};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::cli::gatt::{locate_peripheral, parse_hex_arg, parse_uuid_arg, resolve_characteristic};
use crate::manager::ConnectionManager;

use super::ui::{Painter, WriteReportView};

/// Arguments for the `write` command.
#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Identifier of the peripheral, as printed by `scan`.
    #[arg(long)]
    device: String,
    /// Service owning the characteristic (16-bit or 128-bit UUID).
    #[arg(long, value_parser = parse_uuid_arg)]
    service: Uuid,
    /// Characteristic to write.
    #[arg(long, value_parser = parse_uuid_arg)]
    characteristic: Uuid,
    /// Payload as hex, e.g. `0102ff` or `de:ad:be:ef`.
    #[arg(long, value_parser = parse_hex_arg)]
    data: Vec<u8>,
    /// Queue the write without waiting for an acknowledgement.
    #[arg(long)]
    without_response: bool,
    /// How long to scan for the peripheral when it is not already known.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    scan_timeout: Duration,
}

impl WriteArgs {
    /// Creates an acknowledged write of `data`.
    #[must_use]
    pub fn new(
        device: impl Into<String>,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> Self {
        Self {
            device: device.into(),
            service,
            characteristic,
            data,
            without_response: false,
            scan_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn without_response(mut self) -> Self {
        self.without_response = true;
        self
    }

    fn kind(&self) -> WriteKind {
        if self.without_response {
            WriteKind::WithoutResponse
        } else {
            WriteKind::WithResponse
        }
    }
}

/// What the `write` command delivered.
#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    peripheral: PeripheralInfo,
    characteristic: CharacteristicRef,
    #[serde(serialize_with = "serialize_kind")]
    kind: WriteKind,
    #[serde(serialize_with = "hex::serde::serialize_upper")]
    payload: Vec<u8>,
}

impl WriteReport {
    #[must_use]
    pub fn peripheral(&self) -> &PeripheralInfo {
        &self.peripheral
    }

    #[must_use]
    pub fn characteristic(&self) -> CharacteristicRef {
        self.characteristic
    }

    #[must_use]
    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

fn serialize_kind<S>(kind: &WriteKind, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(kind)
}

/// Executes the `write` command.
#[instrument(skip_all, fields(device = %args.device, payload_len = args.data.len()))]
pub(crate) fn run<W>(
    manager: &ConnectionManager,
    args: &WriteArgs,
    out: &mut W,
    output: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let target = PeripheralId::new(args.device.as_str());
    let peripheral = locate_peripheral(manager.adapter(), &target, args.scan_timeout)?;
    let peripheral = manager.connect(peripheral.id())?;

    let written = write_connected(manager, args);
    if manager.is_connected() {
        manager.disconnect(peripheral.id())?;
    } else {
        manager.reset();
    }
    let characteristic = written?;
    info!(%characteristic, "write delivered");

    let report = WriteReport {
        peripheral,
        characteristic,
        kind: args.kind(),
        payload: args.data.clone(),
    };
    match output {
        OutputFormat::Pretty => writeln!(out, "{}", WriteReportView::new(&report, painter))?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&report)?)?,
    }
    Ok(())
}

fn write_connected(manager: &ConnectionManager, args: &WriteArgs) -> Result<CharacteristicRef> {
    let characteristic = resolve_characteristic(manager, args.service, args.characteristic)?;
    let required = match args.kind() {
        WriteKind::WithResponse => CharProperty::Write,
        WriteKind::WithoutResponse => CharProperty::WriteWithoutResponse,
    };
    if !characteristic.supports(required) {
        warn!(characteristic = %characteristic.uuid(), %required, "characteristic does not advertise this write mode");
    }

    let reference = characteristic.reference();
    match args.kind() {
        WriteKind::WithResponse => manager.write_with_response(&args.data, &reference)?,
        WriteKind::WithoutResponse => {
            if !manager.write_without_response(&args.data, &reference) {
                bail!("the stack did not accept the write");
            }
        }
    }
    Ok(reference)
}
