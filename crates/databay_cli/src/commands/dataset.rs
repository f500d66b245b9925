//! Dataset commands.

use super::{print_list, print_one, Context};
use crate::cli::DatasetCommand;
use crate::error::CliResult;
use databay_sync_engine::Transport;
use std::io::Write;

/// Runs a `dataset` subcommand.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    command: &DatasetCommand,
    out: &mut dyn Write,
) -> CliResult<()> {
    match command {
        DatasetCommand::Create { name } => {
            let info = ctx.client.create_dataset(name)?;
            print_one(ctx.format, out, &info, |d| {
                format!("created dataset {} (default branch {})", d.name, d.default_branch)
            })
        }
        DatasetCommand::List => {
            let datasets = ctx.client.list_datasets()?;
            print_list(ctx.format, out, &datasets, |d| d.name.clone())
        }
        DatasetCommand::Delete { name } => {
            ctx.client.delete_dataset(name)?;
            writeln!(out, "deleted dataset {name}")?;
            Ok(())
        }
    }
}
