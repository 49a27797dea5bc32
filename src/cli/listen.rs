use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::central::{CharProperty, CharacteristicRef, PeripheralId, PeripheralInfo};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::cli::gatt::{locate_peripheral, parse_uuid_arg, resolve_characteristic};
use crate::error::BleError;
use crate::manager::ConnectionManager;
use crate::notification::Notification;

use super::ui::{ListenNotificationView, ListenReadyView, ListenSummaryView, Painter};

const LISTEN_KEY: &str = "listen";

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Identifier of the peripheral, as printed by `scan`.
    #[arg(long)]
    device: String,
    /// Service owning the characteristic (16-bit or 128-bit UUID).
    #[arg(long, value_parser = parse_uuid_arg)]
    service: Uuid,
    /// Characteristic to enable notifications on.
    #[arg(long, value_parser = parse_uuid_arg)]
    characteristic: Uuid,
    /// Stop after this many notifications.
    #[arg(long)]
    max_notifications: Option<usize>,
    /// Stop when nothing arrives for this long.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    idle_timeout: Duration,
    /// Upper bound on notifications taken per blocking read.
    #[arg(long, default_value = "16")]
    batch: NonZeroUsize,
    /// How long to scan for the peripheral when it is not already known.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    scan_timeout: Duration,
}

impl ListenArgs {
    /// Creates listen arguments with default timeouts and no notification limit.
    #[must_use]
    pub fn new(device: impl Into<String>, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            device: device.into(),
            service,
            characteristic,
            max_notifications: None,
            idle_timeout: Duration::from_secs(5),
            batch: NonZeroUsize::MIN.saturating_add(15),
            scan_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_max_notifications(mut self, max_notifications: usize) -> Self {
        self.max_notifications = Some(max_notifications);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Why a listen session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum ListenStopReason {
    #[display("reached limit of {_0} notification(s)")]
    ReachedLimit(usize),
    #[display("idle for {}", humantime::format_duration(*_0))]
    IdleTimeout(Duration),
    #[display("link lost")]
    LinkLost,
}

impl Serialize for ListenStopReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Outcome of a listen session.
#[derive(Debug, Clone, Serialize)]
pub struct ListenSummary {
    peripheral: PeripheralInfo,
    characteristic: CharacteristicRef,
    received: usize,
    stop_reason: ListenStopReason,
}

impl ListenSummary {
    pub(crate) fn new(
        peripheral: PeripheralInfo,
        characteristic: CharacteristicRef,
        received: usize,
        stop_reason: ListenStopReason,
    ) -> Self {
        Self {
            peripheral,
            characteristic,
            received,
            stop_reason,
        }
    }

    #[must_use]
    pub fn peripheral(&self) -> &PeripheralInfo {
        &self.peripheral
    }

    #[must_use]
    pub fn characteristic(&self) -> CharacteristicRef {
        self.characteristic
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    #[must_use]
    pub fn stop_reason(&self) -> ListenStopReason {
        self.stop_reason
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ListenRecord<'a> {
    Notification {
        index: usize,
        #[serde(flatten)]
        notification: &'a Notification,
    },
    Summary(&'a ListenSummary),
}

/// Executes the `listen` command.
#[instrument(skip_all, fields(device = %args.device))]
pub(crate) fn run<W>(
    manager: &ConnectionManager,
    args: &ListenArgs,
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
    info!(peripheral = %peripheral.id(), "connected");

    let session = listen_connected(manager, &peripheral, args, out, output, painter);
    let closed = close_session(manager, peripheral.id(), args);
    let summary = session?;
    closed?;

    match output {
        OutputFormat::Pretty => writeln!(out, "{}", ListenSummaryView::new(&summary, painter))?,
        OutputFormat::Json => writeln!(
            out,
            "{}",
            serde_json::to_string(&ListenRecord::Summary(&summary))?
        )?,
    }
    Ok(())
}

fn listen_connected<W>(
    manager: &ConnectionManager,
    peripheral: &PeripheralInfo,
    args: &ListenArgs,
    out: &mut W,
    output: OutputFormat,
    painter: &Painter,
) -> Result<ListenSummary>
where
    W: io::Write,
{
    let characteristic = resolve_characteristic(manager, args.service, args.characteristic)?;
    if !characteristic.supports(CharProperty::Notify)
        && !characteristic.supports(CharProperty::Indicate)
    {
        warn!(characteristic = %characteristic.uuid(), "characteristic does not advertise notify or indicate");
    }
    let reference = characteristic.reference();

    let registry = manager.notifications();
    registry.register(LISTEN_KEY, [args.characteristic])?;
    let on_lost = Arc::clone(registry);
    manager.set_disconnect_handler(move |peripheral| {
        debug!(%peripheral, "link lost; cancelling listen read");
        if let Err(error) = on_lost.cancel_read(LISTEN_KEY) {
            debug!(%error, "listen channel already gone");
        }
    });

    manager.configure_notification(&reference)?;
    if output == OutputFormat::Pretty {
        writeln!(out, "{}", ListenReadyView::new(peripheral, &characteristic, painter))?;
    }

    let mut received = 0;
    let stop_reason = loop {
        let wanted = match args.max_notifications {
            Some(limit) if received >= limit => break ListenStopReason::ReachedLimit(limit),
            Some(limit) => (limit - received).min(args.batch.get()),
            None => args.batch.get(),
        };

        match registry.read(LISTEN_KEY, wanted, args.idle_timeout) {
            Ok(batch) => {
                for notification in &batch {
                    received += 1;
                    write_notification(out, output, painter, received, notification)?;
                }
            }
            Err(BleError::Timeout { .. }) => break ListenStopReason::IdleTimeout(args.idle_timeout),
            Err(BleError::NoData) => break ListenStopReason::LinkLost,
            Err(error) => return Err(error.into()),
        }
    };
    info!(received, %stop_reason, "listen finished");

    Ok(ListenSummary::new(
        peripheral.clone(),
        reference,
        received,
        stop_reason,
    ))
}

fn write_notification<W>(
    out: &mut W,
    output: OutputFormat,
    painter: &Painter,
    index: usize,
    notification: &Notification,
) -> Result<()>
where
    W: io::Write,
{
    match output {
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            ListenNotificationView::new(index, notification, painter)
        )?,
        OutputFormat::Json => writeln!(
            out,
            "{}",
            serde_json::to_string(&ListenRecord::Notification {
                index,
                notification,
            })?
        )?,
    }
    Ok(())
}

/// Disables notifications and drops the link, whatever state the session ended in.
fn close_session(manager: &ConnectionManager, peripheral: &PeripheralId, args: &ListenArgs) -> Result<()> {
    let registry = manager.notifications();
    if registry.contains(LISTEN_KEY)
        && let Err(error) = registry.unregister(LISTEN_KEY)
    {
        debug!(%error, "listen channel already gone");
    }

    if !manager.is_connected() {
        debug!("link already down; resetting manager");
        manager.reset();
        return Ok(());
    }

    let reference = CharacteristicRef::new(args.service, args.characteristic);
    if let Err(error) = manager.disable_notification(&reference) {
        debug!(%error, "could not disable notifications before disconnecting");
    }
    manager.disconnect(peripheral)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ListenStopReason::ReachedLimit(3), "reached limit of 3 notification(s)")]
    #[case(ListenStopReason::IdleTimeout(Duration::from_millis(1500)), "idle for 1s 500ms")]
    #[case(ListenStopReason::LinkLost, "link lost")]
    fn stop_reason_display(#[case] reason: ListenStopReason, #[case] expected: &str) {
        assert_eq!(expected, reason.to_string());
    }

    #[test]
    fn new_args_use_default_batch_and_timeouts() {
        let args = ListenArgs::new("AA:BB", Uuid::nil(), Uuid::nil());

        assert_eq!(16, args.batch.get());
        assert_eq!(Duration::from_secs(5), args.idle_timeout);
        assert_eq!(None, args.max_notifications);
    }
}
