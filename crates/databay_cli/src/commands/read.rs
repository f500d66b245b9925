//! Read command.

use super::{print_list, usage, Context};
use crate::cli::ReadArgs;
use crate::error::CliResult;
use databay_core::{CoreError, Revision, Segment};
use databay_sync_engine::Transport;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// One data item of a listed frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListing {
    /// Segment name.
    pub segment: String,
    /// Frame index.
    pub index: u64,
    /// Sensor that produced the item.
    pub sensor: String,
    /// Path of the item within the dataset.
    pub remote_path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Lists the items of a revision and optionally downloads them.
pub fn run<T: Transport>(
    ctx: &Context<'_, T>,
    args: &ReadArgs,
    out: &mut dyn Write,
) -> CliResult<()> {
    let revision = Revision::parse(&args.revision)?;
    let vc = ctx.client.dataset(&args.dataset)?;
    let catalog = vc.checkout(&revision)?;

    let segments: Vec<&Segment> = match &args.segment {
        Some(name) => vec![catalog
            .segment(name)
            .ok_or_else(|| CoreError::SegmentNotFound { name: name.clone() })?],
        None => catalog.segments().collect(),
    };

    let mut listing = Vec::new();
    for segment in &segments {
        for (index, frame) in segment.frames() {
            for item in frame.items() {
                listing.push(ItemListing {
                    segment: segment.name().to_string(),
                    index,
                    sensor: item.sensor().to_string(),
                    remote_path: item.remote_path().to_string(),
                    size: item.size(),
                });
            }
        }
    }
    print_list(ctx.format, out, &listing, |item| {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            item.segment, item.index, item.sensor, item.remote_path, item.size
        )
    })?;

    let Some(output) = &args.output else {
        return Ok(());
    };
    for segment in &segments {
        for (_, frame) in segment.frames() {
            let full = vc.download(frame, &ctx.cancel)?;
            for item in full.items() {
                let target = target_path(output, segment.name(), item.remote_path())?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let data = item.data().map(|b| &b[..]).unwrap_or_default();
                fs::write(&target, data)?;
                debug!(path = %target.display(), "wrote item");
            }
        }
    }
    Ok(())
}

/// Places an item under `output/segment/remote_path`, refusing paths that
/// would land outside `output`.
pub fn target_path(output: &Path, segment: &str, remote_path: &str) -> CliResult<PathBuf> {
    let mut target = output.to_path_buf();
    for part in [segment, remote_path] {
        let relative = Path::new(part);
        if part.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(usage(format!("refusing to write outside the output: {part}")));
        }
        target.push(relative);
    }
    Ok(target)
}
