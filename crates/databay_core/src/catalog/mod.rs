//! The in-memory working set of segments and frames for one revision.
//!
//! A catalog checked out for a draft is writable. A catalog checked out for a
//! commit is a read-only view and rejects every mutation with
//! [`CoreError::ImmutableSnapshot`].

mod diff;
mod frame;
mod segment;

pub use diff::{ItemKey, OpKind, PlanOp, RemoteSnapshot};
pub use frame::{Checksum, DataItem, Frame, ItemSpan};
pub use segment::{Segment, Sensor};

use crate::error::{CoreError, CoreResult};
use crate::revision::{CommitId, DraftNumber, Revision};
use std::collections::BTreeMap;

/// Which revision a catalog was checked out for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogMode {
    /// A writable draft.
    Draft(DraftNumber),
    /// A read-only commit, `None` for the empty root.
    Snapshot(Option<CommitId>),
}

/// Segments and frames of one revision, keyed by segment name.
#[derive(Debug, Clone)]
pub struct Catalog {
    mode: CatalogMode,
    segments: BTreeMap<String, Segment>,
}

impl Catalog {
    /// Creates an empty writable catalog for a draft.
    pub fn for_draft(draft: DraftNumber) -> Self {
        Self {
            mode: CatalogMode::Draft(draft),
            segments: BTreeMap::new(),
        }
    }

    /// Creates an empty read-only catalog for a commit.
    pub fn for_commit(commit: Option<CommitId>) -> Self {
        Self {
            mode: CatalogMode::Snapshot(commit),
            segments: BTreeMap::new(),
        }
    }

    /// Returns the mode.
    pub fn mode(&self) -> &CatalogMode {
        &self.mode
    }

    /// Returns the revision this catalog was checked out for, `None` for the
    /// empty root.
    pub fn revision(&self) -> Option<Revision> {
        match &self.mode {
            CatalogMode::Draft(number) => Some(Revision::Draft(*number)),
            CatalogMode::Snapshot(commit) => commit.clone().map(Revision::Commit),
        }
    }

    /// Returns the draft number for writable catalogs.
    pub fn draft(&self) -> Option<DraftNumber> {
        match self.mode {
            CatalogMode::Draft(number) => Some(number),
            CatalogMode::Snapshot(_) => None,
        }
    }

    /// Returns true for commit views.
    pub fn is_read_only(&self) -> bool {
        matches!(self.mode, CatalogMode::Snapshot(_))
    }

    /// Adds an empty segment.
    pub fn add_segment(&mut self, name: impl Into<String>) -> CoreResult<&mut Segment> {
        self.check_writable()?;
        self.insert_segment(name.into(), false)
    }

    /// Adds an empty fusion segment. Its frames may only use registered
    /// sensors.
    pub fn add_fusion_segment(&mut self, name: impl Into<String>) -> CoreResult<&mut Segment> {
        self.check_writable()?;
        self.insert_segment(name.into(), true)
    }

    /// Registers a sensor with a segment, replacing one of the same name.
    pub fn add_sensor(&mut self, segment: &str, sensor: Sensor) -> CoreResult<()> {
        self.check_writable()?;
        self.segment_mut(segment)?.put_sensor(sensor)
    }

    /// Unregisters a sensor. A fusion segment refuses while frames use it.
    pub fn remove_sensor(&mut self, segment: &str, name: &str) -> CoreResult<Sensor> {
        self.check_writable()?;
        self.segment_mut(segment)?.remove_sensor(name)
    }

    /// Appends a frame to a segment and returns its index.
    pub fn add_frame(&mut self, segment: &str, frame: Frame) -> CoreResult<u64> {
        self.check_writable()?;
        let segment = self.segment_mut(segment)?;
        segment.check_sensors(&frame)?;
        Ok(segment.push(frame))
    }

    /// Replaces the frame at `index` and returns the previous one.
    pub fn replace_frame(&mut self, segment: &str, index: u64, frame: Frame) -> CoreResult<Frame> {
        self.check_writable()?;
        let segment = self.segment_mut(segment)?;
        segment.check_sensors(&frame)?;
        segment.replace(index, frame)
    }

    /// Sets the annotation of a frame, keeping its items.
    pub fn set_label(
        &mut self,
        segment: &str,
        index: u64,
        label: serde_json::Value,
    ) -> CoreResult<()> {
        self.check_writable()?;
        self.segment_mut(segment)?.frame_mut(index)?.set_label(label);
        Ok(())
    }

    /// Removes a segment with all its frames.
    pub fn remove_segment(&mut self, name: &str) -> CoreResult<Segment> {
        self.check_writable()?;
        self.segments
            .remove(name)
            .ok_or_else(|| CoreError::SegmentNotFound {
                name: name.to_string(),
            })
    }

    /// Removes a frame. The indices of the remaining frames do not change.
    pub fn remove_frame(&mut self, segment: &str, index: u64) -> CoreResult<Frame> {
        self.check_writable()?;
        self.segment_mut(segment)?.remove(index)
    }

    /// Sets or clears a segment description.
    pub fn set_segment_description(
        &mut self,
        segment: &str,
        description: Option<String>,
    ) -> CoreResult<()> {
        self.check_writable()?;
        self.segment_mut(segment)?.set_description(description);
        Ok(())
    }

    /// Records the remote object key of an uploaded frame.
    pub fn mark_uploaded(
        &mut self,
        segment: &str,
        index: u64,
        object_key: impl Into<String>,
    ) -> CoreResult<()> {
        self.check_writable()?;
        self.segment_mut(segment)?
            .frame_mut(index)?
            .set_object_key(object_key.into());
        Ok(())
    }

    /// Returns a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    /// Iterates over segments in name order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Returns a frame.
    pub fn frame(&self, segment: &str, index: u64) -> CoreResult<&Frame> {
        self.segment(segment)
            .ok_or_else(|| CoreError::SegmentNotFound {
                name: segment.to_string(),
            })?
            .frame(index)
            .ok_or_else(|| CoreError::FrameNotFound {
                segment: segment.to_string(),
                index,
            })
    }

    /// Returns the total number of frames.
    pub fn frame_count(&self) -> usize {
        self.segments.values().map(Segment::len).sum()
    }

    /// Renders the catalog as a remote snapshot.
    pub fn snapshot(&self) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::new();
        for segment in self.segments.values() {
            snapshot.insert_segment(segment.name());
            for sensor in segment.sensors() {
                snapshot.insert_sensor(segment.name(), sensor.clone());
            }
            for (index, frame) in segment.frames() {
                snapshot.insert_frame(segment.name(), index, frame.checksum());
            }
        }
        snapshot
    }

    /// Computes the operations that bring `remote` in line with this catalog.
    pub fn diff_against(&self, remote: &RemoteSnapshot) -> Vec<PlanOp> {
        diff::diff(
            self.segments.values().map(|segment| {
                (
                    segment.name(),
                    segment.sensors(),
                    segment.frames().map(|(index, frame)| (index, frame.checksum())),
                )
            }),
            remote,
        )
    }

    /// Inserts a segment while loading remote state, regardless of mode.
    pub fn load_segment(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
        fusion: bool,
    ) -> CoreResult<()> {
        let segment = self.insert_segment(name.into(), fusion)?;
        segment.set_description(description);
        Ok(())
    }

    /// Registers a sensor while loading remote state, regardless of mode.
    pub fn load_sensor(&mut self, segment: &str, sensor: Sensor) -> CoreResult<()> {
        self.segment_mut(segment)?.put_sensor(sensor)
    }

    /// Places a frame at a known index while loading remote state, regardless
    /// of mode.
    pub fn load_frame(&mut self, segment: &str, index: u64, frame: Frame) -> CoreResult<()> {
        self.segment_mut(segment)?.place(index, frame);
        Ok(())
    }

    fn insert_segment(&mut self, name: String, fusion: bool) -> CoreResult<&mut Segment> {
        if self.segments.contains_key(&name) {
            return Err(CoreError::DuplicateSegment { name });
        }
        let segment = Segment::new(name.clone(), fusion)?;
        Ok(self.segments.entry(name).or_insert(segment))
    }

    fn segment_mut(&mut self, name: &str) -> CoreResult<&mut Segment> {
        self.segments
            .get_mut(name)
            .ok_or_else(|| CoreError::SegmentNotFound {
                name: name.to_string(),
            })
    }

    fn check_writable(&self) -> CoreResult<()> {
        match &self.mode {
            CatalogMode::Draft(_) => Ok(()),
            CatalogMode::Snapshot(commit) => Err(CoreError::ImmutableSnapshot {
                revision: commit
                    .as_ref()
                    .map_or_else(|| "root".to_string(), ToString::to_string),
            }),
        }
    }
}
