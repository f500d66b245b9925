//! Draft commands.

use super::{draft_number, print_list, print_one, Context};
use crate::cli::DraftCommand;
use crate::error::CliResult;
use databay_core::Draft;
use databay_sync_engine::Transport;
use std::io::Write;

fn describe(draft: &Draft) -> String {
    format!(
        "#{}\t{}\t{}\t{}",
        draft.number, draft.branch, draft.status, draft.title
    )
}

/// Runs a `draft` subcommand.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    command: &DraftCommand,
    out: &mut dyn Write,
) -> CliResult<()> {
    match command {
        DraftCommand::Create {
            dataset,
            title,
            branch,
        } => {
            let draft = ctx.client.dataset(dataset)?.create_draft(branch, title)?;
            print_one(ctx.format, out, &draft, |d| {
                format!("opened draft #{} on {}", d.number, d.branch)
            })
        }
        DraftCommand::List {
            dataset,
            branch,
            status,
        } => {
            let drafts = ctx
                .client
                .dataset(dataset)?
                .list_drafts(branch.as_ref(), status.map(Into::into))?;
            print_list(ctx.format, out, &drafts, describe)
        }
        DraftCommand::Close { dataset, draft } => {
            let closed = ctx
                .client
                .dataset(dataset)?
                .close_draft(draft_number(*draft)?)?;
            print_one(ctx.format, out, &closed, |d| format!("closed draft #{}", d.number))
        }
    }
}
