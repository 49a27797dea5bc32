use std::io;

use anyhow::Result;
use tracing::{info, instrument};

use crate::central::{BtleplugController, CentralAdapter, FakeController};
use crate::cli::ui::Painter;
use crate::cli::{Backend, Command, LogLevel, OutputFormat};
use crate::error::BleError;
use crate::manager::ConnectionManager;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Starts a central adapter on the selected backend.
///
/// ```
/// # fn demo() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blesync::Args::try_parse_from([
///     "blesync",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Thermo|-43",
///     "scan",
/// ])?;
/// let (_command, backend) = args.into_command_and_backend()?;
/// let adapter = blesync::start_adapter(backend)?;
/// assert_eq!(0, adapter.listener_count());
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
///
/// # Errors
///
/// Returns an error if the platform has no usable adapter or the backend
/// could not start.
pub fn start_adapter(backend: Backend) -> Result<CentralAdapter, BleError> {
    match backend {
        Backend::Btleplug { adapter_index } => CentralAdapter::start(|emitter| {
            BtleplugController::new(emitter, adapter_index)
        }),
        Backend::Fake(fake) => {
            FakeController::start_adapter(fake.into_controller_config()).map(|(adapter, _handle)| adapter)
        }
    }
}

/// Runs a CLI command against the given backend, probing the real terminal.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a BLE operation fails,
/// or output writing fails.
pub fn run<W>(command: Command, out: &mut W, backend: Backend) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None)
}

/// Runs a CLI command with an explicit log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a BLE operation fails,
/// or output writing fails.
pub fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: Backend,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, &SystemTerminalClient, backend, log_level, None)
}

/// Runs a CLI command with injected terminal probing and explicit output settings.
///
/// `output` falls back to pretty output on a terminal and JSON lines otherwise.
///
/// ```
/// # fn demo() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl blesync::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = blesync::Args::try_parse_from([
///     "blesync",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Thermo|-43",
///     "scan",
///     "--duration",
///     "20ms",
/// ])?;
/// let log_level = args.log_level();
/// let (command, backend) = args.into_command_and_backend()?;
/// let mut out = Vec::new();
/// blesync::run_with_clients_and_log_level(command, &mut out, &FakeTerminal, backend, log_level, None)?;
/// assert!(String::from_utf8(out)?.contains("\"AA:BB\""));
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a BLE operation fails,
/// or output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = %command.name(), ?log_level)
)]
pub fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    log_level: Option<LogLevel>,
    output: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blesync",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let interactive = terminal_client.stdout_is_terminal();
    let output = output.unwrap_or(if interactive {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let painter = Painter::new(interactive && output == OutputFormat::Pretty);

    let manager = ConnectionManager::new(start_adapter(backend)?);
    info!(?output, "adapter started");

    match command {
        Command::Scan(args) => crate::cli::scan::run(manager.adapter(), &args, out, output, &painter),
        Command::Listen(args) => crate::cli::listen::run(&manager, &args, out, output, &painter),
        Command::Write(args) => crate::cli::write::run(&manager, &args, out, output, &painter),
    }
}
