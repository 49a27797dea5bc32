use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::central::{FakeControllerConfig, FakeOperation, FakeResponse, NotificationScript, ScanFixture};
use crate::cli::listen::ListenArgs;
use crate::cli::scan::ScanArgs;
use crate::cli::write::WriteArgs;
use crate::error::{CliConfigError, FixtureError};

/// Command-line options for the blocking BLE central tool.
#[derive(Debug, Parser)]
#[command(name = "blesync", about = "Scan, listen to and write BLE peripherals with blocking calls.")]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Index of the BLE adapter to use.
    #[arg(long, global = true, default_value_t = 0)]
    adapter: usize,
    /// Uses the fake BLE controller with fixture-driven peripherals.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake peripherals in the form `device_id|local_name|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake notification script in the form `uuid=hex,hex;uuid=hex`.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationScript>,
    /// Fake connection outcome: `succeed`, `ignore`, `fail` or `fail:<message>`.
    #[arg(long, global = true, requires = "fake")]
    fake_connect: Option<FakeResponse>,
    /// Artificial delay before each fake event (e.g. `20ms`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_latency: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            adapter: 0,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_connect: None,
            fake_latency: None,
            command,
        }
    }

    /// Enables fake controller mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            connect,
            latency,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_connect = connect;
        self.fake_latency = Some(latency);
        self
    }

    /// Forces an output format instead of probing the terminal.
    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed arguments into the command and the controller backend to start.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend configuration is invalid.
    pub fn into_command_and_backend(self) -> anyhow::Result<(Command, Backend)> {
        let Args {
            adapter,
            fake,
            fake_scan,
            fake_notifications,
            fake_connect,
            fake_latency,
            command,
            ..
        } = self;

        let backend = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Backend::Fake(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                connect: fake_connect,
                latency: fake_latency.unwrap_or(Duration::ZERO),
            })
        } else {
            Backend::Btleplug {
                adapter_index: adapter,
            }
        };

        Ok((command, backend))
    }
}

/// Central controller a run talks to.
#[derive(Debug)]
pub enum Backend {
    /// The platform radio through `btleplug`.
    Btleplug { adapter_index: usize },
    /// Fixture-driven fake controller.
    Fake(FakeArgs),
}

/// Fake controller arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationScript>,
    connect: Option<FakeResponse>,
    #[builder(default)]
    latency: Duration,
}

impl FakeArgs {
    pub(crate) fn into_controller_config(self) -> FakeControllerConfig {
        let Self {
            scan_fixture,
            notifications,
            connect,
            latency,
        } = self;

        let mut responses = std::collections::HashMap::new();
        if let Some(connect) = connect {
            responses.insert(FakeOperation::Connect, connect);
        }

        FakeControllerConfig::builder()
            .peripherals(scan_fixture.into())
            .notifications(notifications.unwrap_or_default())
            .responses(responses)
            .latency(latency)
            .build()
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Output rendering accepted by `--output`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for advertising peripherals and print them.
    Scan(ScanArgs),
    /// Connect, enable notifications on one characteristic and print what arrives.
    Listen(ListenArgs),
    /// Connect and write one payload to a characteristic.
    Write(WriteArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Listen(_args) => "listen",
            Self::Write(_args) => "write",
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blesync", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_scan_requires_fake_mode() {
        let result = Args::try_parse_from(["blesync", "--fake-scan", "AA:BB|Sensor|-43", "scan"]);

        let error = result.expect_err("--fake-scan should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_connect_rejects_unknown_response() {
        let result = Args::try_parse_from([
            "blesync",
            "--fake",
            "--fake-scan",
            "AA:BB|Sensor|-43",
            "--fake-connect",
            "perhaps",
            "scan",
        ]);

        let error = result.expect_err("unknown fake response should fail parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_backend() {
        let cli = Args::try_parse_from([
            "blesync",
            "--fake",
            "--fake-scan",
            "AA:BB|Sensor|-43",
            "--fake-latency",
            "15ms",
            "scan",
        ])
        .expect("valid fake arguments should parse");

        let (command, backend) = cli
            .into_command_and_backend()
            .expect("valid fake arguments should resolve a backend");
        assert_matches!(command, Command::Scan(_));
        assert_matches!(backend, Backend::Fake(args) if args.latency == Duration::from_millis(15));
    }

    #[test]
    fn adapter_index_selects_btleplug_backend() {
        let cli = Args::try_parse_from(["blesync", "--adapter", "2", "scan"])
            .expect("adapter index should parse");

        let (_command, backend) = cli
            .into_command_and_backend()
            .expect("real backend should resolve");
        assert_matches!(backend, Backend::Btleplug { adapter_index: 2 });
    }
}
