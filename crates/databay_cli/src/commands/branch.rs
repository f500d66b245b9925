//! Branch commands.

use super::{print_list, print_one, Context};
use crate::cli::BranchCommand;
use crate::error::CliResult;
use databay_core::{Branch, CommitId};
use databay_sync_engine::Transport;
use std::io::Write;

fn describe(branch: &Branch) -> String {
    match &branch.head {
        Some(head) => format!("{}\t{}", branch.name, head.short()),
        None => format!("{}\t-", branch.name),
    }
}

/// Runs a `branch` subcommand.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    command: &BranchCommand,
    out: &mut dyn Write,
) -> CliResult<()> {
    match command {
        BranchCommand::List { dataset } => {
            let branches = ctx.client.dataset(dataset)?.list_branches()?;
            print_list(ctx.format, out, &branches, describe)
        }
        BranchCommand::Create {
            dataset,
            name,
            from,
        } => {
            let from = from.as_deref().map(CommitId::parse).transpose()?;
            let branch = ctx
                .client
                .dataset(dataset)?
                .create_branch(name, from.as_ref())?;
            print_one(ctx.format, out, &branch, |b| {
                format!("created branch {}", describe(b))
            })
        }
        BranchCommand::Delete { dataset, name } => {
            ctx.client.dataset(dataset)?.delete_branch(name)?;
            writeln!(out, "deleted branch {name}")?;
            Ok(())
        }
    }
}
