//! CLI command implementations.

pub mod branch;
pub mod commit;
pub mod dataset;
pub mod draft;
pub mod log;
pub mod read;
pub mod upload;

use crate::cli::{Commands, OutputFormat};
use crate::error::{CliError, CliResult};
use databay_core::DraftNumber;
use databay_sync_engine::{CancellationToken, DatasetClient, Transport};
use serde::Serialize;
use std::io::Write;

/// What every command runs with.
pub struct Context<'a, T: Transport> {
    /// Client for the configured server.
    pub client: &'a DatasetClient<T>,
    /// Cancels transfers on interrupt.
    pub cancel: CancellationToken,
    /// Listing format.
    pub format: OutputFormat,
}

/// Runs one command, writing results to `out`.
pub fn execute<T: Transport>(
    command: &Commands,
    ctx: &Context<'_, T>,
    out: &mut dyn Write,
) -> CliResult<()> {
    match command {
        Commands::Dataset(cmd) => dataset::run(ctx, cmd, out),
        Commands::Upload(args) => upload::run(ctx, args, out),
        Commands::Read(args) => read::run(ctx, args, out),
        Commands::Branch(cmd) => branch::run(ctx, cmd, out),
        Commands::Draft(cmd) => draft::run(ctx, cmd, out),
        Commands::Commit {
            dataset,
            draft,
            message,
        } => commit::run(ctx, dataset, draft_number(*draft)?, message, out),
        Commands::Log {
            dataset,
            revision,
            limit,
        } => log::run(ctx, dataset, revision, *limit, out),
    }
}

/// Validates a draft number from the command line.
pub(crate) fn draft_number(number: u64) -> CliResult<DraftNumber> {
    Ok(DraftNumber::new(number)?)
}

/// Prints a listing as JSON or one line per entry.
pub(crate) fn print_list<S: Serialize>(
    format: OutputFormat,
    out: &mut dyn Write,
    items: &[S],
    line: impl Fn(&S) -> String,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, items)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for item in items {
                writeln!(out, "{}", line(item))?;
            }
        }
    }
    Ok(())
}

/// Prints a single record.
pub(crate) fn print_one<S: Serialize>(
    format: OutputFormat,
    out: &mut dyn Write,
    item: &S,
    line: impl Fn(&S) -> String,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, item)?;
            writeln!(out)?;
        }
        OutputFormat::Text => writeln!(out, "{}", line(item))?,
    }
    Ok(())
}

pub(crate) fn usage(message: impl Into<String>) -> CliError {
    CliError::Usage(message.into())
}
