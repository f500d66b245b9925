//! Log command.

use super::{print_list, Context};
use crate::error::CliResult;
use databay_core::Revision;
use databay_sync_engine::Transport;
use std::io::Write;

/// Prints the commits reachable from a revision, newest first.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    dataset: &str,
    revision: &str,
    limit: usize,
    out: &mut dyn Write,
) -> CliResult<()> {
    let revision = Revision::parse(revision)?;
    let commits = ctx.client.dataset(dataset)?.log(&revision, limit)?;
    print_list(ctx.format, out, &commits, |c| {
        format!("{}  {} ({})", c.id.short(), c.message, c.committer)
    })
}
