//! Upload command.
//!
//! Every file under the source becomes a single-item frame appended to the
//! target segment, in path order. Remote paths are relative to the source and
//! always use `/`.

use super::{draft_number, print_one, usage, Context};
use crate::cli::UploadArgs;
use crate::error::{CliError, CliResult};
use databay_core::{DataItem, Frame, Revision};
use databay_sync_engine::{ItemOutcome, Transport};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// What an upload did.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    /// Draft the files went into.
    pub draft: u64,
    /// Target segment.
    pub segment: String,
    /// Files found under the source.
    pub files: usize,
    /// Items that reached the server.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items stopped by cancellation.
    pub cancelled: usize,
    /// Commit created, if requested and reached.
    pub commit: Option<String>,
}

/// Uploads a file or directory tree into a draft.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    args: &UploadArgs,
    out: &mut dyn Write,
) -> CliResult<()> {
    let files = collect_files(&args.source)?;
    if files.is_empty() {
        return Err(usage(format!("{} contains no files", args.source.display())));
    }
    let segment = match &args.segment {
        Some(segment) => segment.clone(),
        None => default_segment(&args.source)?,
    };

    let vc = ctx.client.dataset(&args.dataset)?;
    let draft = match args.draft {
        Some(number) => draft_number(number)?,
        None => {
            let title = args
                .title
                .clone()
                .unwrap_or_else(|| format!("upload {segment}"));
            let draft = vc.create_draft(&args.branch, &title)?;
            info!(draft = %draft.number, branch = %draft.branch, "opened draft");
            draft.number
        }
    };

    let mut catalog = vc.checkout(&Revision::Draft(draft))?;
    if catalog.segment(&segment).is_none() {
        catalog.add_segment(segment.as_str())?;
    }
    for (remote_path, path) in &files {
        let data = fs::read(path)?;
        debug!(%remote_path, size = data.len(), "adding file");
        let frame = Frame::single(DataItem::new(args.sensor.as_str(), remote_path.as_str(), data))?;
        catalog.add_frame(&segment, frame)?;
    }

    let report = vc.sync(&mut catalog, &ctx.cancel)?;
    for outcome in report.failures() {
        if let ItemOutcome::Failed { op, error } = outcome {
            writeln!(out, "failed {}: {error}", op.key)?;
        }
    }

    let mut summary = UploadSummary {
        draft: draft.into(),
        segment,
        files: files.len(),
        succeeded: report.succeeded(),
        failed: report.failed(),
        cancelled: report.cancelled(),
        commit: None,
    };
    if !report.is_complete() {
        print_one(ctx.format, out, &summary, describe)?;
        return Err(CliError::Incomplete {
            draft,
            pending: summary.failed + summary.cancelled,
        });
    }

    if let Some(message) = &args.message {
        let commit = vc.commit_draft(draft, &catalog, message)?;
        summary.commit = Some(commit.id.to_string());
    }
    print_one(ctx.format, out, &summary, describe)
}

fn describe(summary: &UploadSummary) -> String {
    let mut line = format!(
        "draft #{}: {} file(s) into {}, {} item(s) synced",
        summary.draft, summary.files, summary.segment, summary.succeeded
    );
    if summary.failed + summary.cancelled > 0 {
        line.push_str(&format!(
            ", {} failed, {} cancelled",
            summary.failed, summary.cancelled
        ));
    }
    if let Some(commit) = &summary.commit {
        line.push_str(&format!(", committed as {commit}"));
    }
    line
}

/// Lists the files under `source` with their remote paths, sorted.
pub fn collect_files(source: &Path) -> CliResult<Vec<(String, PathBuf)>> {
    let metadata = fs::metadata(source)?;
    if metadata.is_file() {
        let name = source
            .file_name()
            .map(Path::new)
            .ok_or_else(|| usage(format!("{} has no file name", source.display())))?;
        return Ok(vec![(remote_path(name)?, source.to_path_buf())]);
    }

    let mut files = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path
                    .strip_prefix(source)
                    .map_err(|_| usage(format!("{} escapes the source", path.display())))?;
                files.push((remote_path(relative)?, path));
            }
        }
    }
    files.sort();
    Ok(files)
}

fn remote_path(relative: &Path) -> CliResult<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| usage(format!("{} is not valid UTF-8", relative.display())))?,
            ),
            _ => return Err(usage(format!("unexpected path {}", relative.display()))),
        }
    }
    Ok(parts.join("/"))
}

fn default_segment(source: &Path) -> CliResult<String> {
    let source = fs::canonicalize(source)?;
    let dir = if source.is_dir() {
        Some(source.as_path())
    } else {
        source.parent()
    };
    dir.and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| usage("cannot derive a segment name, pass --segment"))
}
