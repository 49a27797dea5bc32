use std::process::ExitCode;

use clap::Parser;

use blesync::{Args, SystemTerminalClient, run_with_clients_and_log_level};

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let log_level = args.log_level();
    let output = args.output_format();
    let (command, backend) = args.into_command_and_backend()?;
    run_with_clients_and_log_level(
        command,
        &mut std::io::stdout(),
        &SystemTerminalClient,
        backend,
        log_level,
        output,
    )
}
