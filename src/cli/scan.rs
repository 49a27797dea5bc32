use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Args;
use tracing::{info, trace};
use uuid::Uuid;

use crate::central::{CentralAdapter, CentralEvent, PeripheralInfo, ScanRequest};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::cli::gatt::parse_uuid_arg;

use super::ui::{Painter, ScanResultView};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to scan (e.g. `5s`, `500ms`).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    duration: Duration,
    /// Only report peripherals advertising this service; repeatable.
    #[arg(long = "service", value_parser = parse_uuid_arg)]
    services: Vec<Uuid>,
    /// Report every advertisement instead of the first per peripheral.
    #[arg(long)]
    allow_duplicates: bool,
}

impl ScanArgs {
    /// Creates scan arguments for `duration` with no service filter.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            services: Vec::new(),
            allow_duplicates: false,
        }
    }

    /// Restricts the scan to peripherals advertising any of `services`.
    #[must_use]
    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.services = services.into_iter().collect();
        self
    }
}

/// Executes the `scan` command.
pub(crate) fn run<W>(
    adapter: &CentralAdapter,
    args: &ScanArgs,
    out: &mut W,
    output: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let found = collect_peripherals(adapter, args);
    info!(count = found.len(), "scan finished");

    match output {
        OutputFormat::Pretty => writeln!(out, "{}", ScanResultView::new(&found, painter))?,
        OutputFormat::Json => {
            for peripheral in &found {
                writeln!(out, "{}", serde_json::to_string(peripheral)?)?;
            }
        }
    }
    Ok(())
}

fn collect_peripherals(adapter: &CentralAdapter, args: &ScanArgs) -> Vec<PeripheralInfo> {
    let (sender, receiver) = std_mpsc::channel::<PeripheralInfo>();
    let listener = adapter.add_listener(Arc::new(move |event: &CentralEvent| {
        if let CentralEvent::PeripheralDiscovered { peripheral } = event
            && sender.send(peripheral.clone()).is_err()
        {
            trace!("scan receiver closed");
        }
    }));

    adapter.start_scan(
        &ScanRequest::default()
            .with_services(args.services.iter().copied())
            .with_duplicates(args.allow_duplicates),
    );

    let deadline = Instant::now() + args.duration;
    let mut found: Vec<PeripheralInfo> = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(peripheral) => upsert(&mut found, peripheral),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
        }
    }

    adapter.stop_scan();
    adapter.remove_listener(listener);
    found
}

/// Keeps one entry per peripheral, refreshed with the latest advertisement.
fn upsert(found: &mut Vec<PeripheralInfo>, peripheral: PeripheralInfo) {
    match found
        .iter_mut()
        .find(|existing| existing.id() == peripheral.id())
    {
        Some(existing) => *existing = peripheral,
        None => found.push(peripheral),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::central::PeripheralId;

    #[test]
    fn upsert_refreshes_repeated_advertisements() {
        let mut found = Vec::new();
        upsert(
            &mut found,
            PeripheralInfo::new(PeripheralId::from("AA"), Some("Sensor".into()), Some(-70)),
        );
        upsert(
            &mut found,
            PeripheralInfo::new(PeripheralId::from("BB"), None, None),
        );
        upsert(
            &mut found,
            PeripheralInfo::new(PeripheralId::from("AA"), Some("Sensor".into()), Some(-40)),
        );

        assert_eq!(2, found.len());
        assert_eq!(Some(-40), found[0].rssi());
    }
}
