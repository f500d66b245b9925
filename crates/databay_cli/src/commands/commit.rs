//! Commit command.
//!
//! There is no local catalog to compare with, so the server's draft is
//! committed as it stands. The draft must be open and based on the branch
//! head, and items that failed in an earlier sync through the same client
//! still block the commit. `upload --message` commits with the full check
//! against the uploaded catalog.

use super::{print_one, Context};
use crate::error::CliResult;
use databay_core::DraftNumber;
use databay_sync_engine::Transport;
use std::io::Write;

/// Commits a draft as it stands on the server.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    dataset: &str,
    draft: DraftNumber,
    message: &str,
    out: &mut dyn Write,
) -> CliResult<()> {
    let commit = ctx.client.dataset(dataset)?.commit_remote_draft(draft, message)?;
    print_one(ctx.format, out, &commit, |c| {
        format!("committed draft #{draft} as {}", c.id)
    })
}
