//! DataBay CLI
//!
//! Command-line client for DataBay dataset version control.

use clap::Parser;
use databay_cli::{execute, interrupt, sync_config, Cli, CliResult, Context, ReqwestTransport};
use databay_sync_engine::{CancellationToken, DatasetClient};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let transport = ReqwestTransport::new(&cli.url)?;
    let client = DatasetClient::new(transport, sync_config(cli));
    let cancel = CancellationToken::new();
    interrupt::cancel_on_interrupt(vec![cancel.clone(), client.cancellation().clone()]);

    let ctx = Context {
        client: &client,
        cancel,
        format: cli.format,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&cli.command, &ctx, &mut out)?;
    out.flush()?;
    Ok(())
}
