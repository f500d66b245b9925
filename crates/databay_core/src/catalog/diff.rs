//! Key-wise diff between a catalog and a remote snapshot.

use crate::catalog::frame::Checksum;
use crate::catalog::segment::Sensor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The shape of a remote revision: segment names and, per segment, the
/// registered sensors and the checksum of every frame index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    segments: BTreeMap<String, SegmentShape>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SegmentShape {
    sensors: BTreeMap<String, Sensor>,
    frames: BTreeMap<u64, Checksum>,
}

impl RemoteSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a segment.
    pub fn insert_segment(&mut self, name: impl Into<String>) {
        self.segments.entry(name.into()).or_default();
    }

    /// Records a frame, creating its segment if needed.
    pub fn insert_frame(&mut self, segment: impl Into<String>, index: u64, checksum: Checksum) {
        self.segments
            .entry(segment.into())
            .or_default()
            .frames
            .insert(index, checksum);
    }

    /// Records a sensor, creating its segment if needed.
    pub fn insert_sensor(&mut self, segment: impl Into<String>, sensor: Sensor) {
        self.segments
            .entry(segment.into())
            .or_default()
            .sensors
            .insert(sensor.name.clone(), sensor);
    }

    /// Iterates over the sensors of a segment in name order.
    pub fn sensors(&self, segment: &str) -> impl Iterator<Item = &Sensor> {
        self.segments
            .get(segment)
            .into_iter()
            .flat_map(|shape| shape.sensors.values())
    }

    /// Returns true if the segment is present.
    pub fn has_segment(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    /// Returns the checksum of a frame.
    pub fn frame_checksum(&self, segment: &str, index: u64) -> Option<Checksum> {
        self.segments.get(segment)?.frames.get(&index).copied()
    }

    /// Iterates over segment names in order.
    pub fn segment_names(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    /// Iterates over `(index, checksum)` of a segment in index order.
    pub fn frames(&self, segment: &str) -> impl Iterator<Item = (u64, Checksum)> + '_ {
        self.segments
            .get(segment)
            .into_iter()
            .flat_map(|shape| shape.frames.iter().map(|(i, c)| (*i, *c)))
    }

    /// Returns the total number of frames.
    pub fn frame_count(&self) -> usize {
        self.segments.values().map(|shape| shape.frames.len()).sum()
    }
}

/// What a plan operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// The item exists locally only.
    Create,
    /// The item exists on both sides with different content.
    Update,
    /// The item exists remotely only.
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Create => write!(f, "CREATE"),
            OpKind::Update => write!(f, "UPDATE"),
            OpKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Identifies a segment or a frame within a revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKey {
    /// A whole segment.
    Segment {
        /// Segment name.
        segment: String,
    },
    /// One frame.
    Frame {
        /// Segment name.
        segment: String,
        /// Frame index.
        index: u64,
    },
    /// One registered sensor.
    Sensor {
        /// Segment name.
        segment: String,
        /// Sensor name.
        sensor: String,
    },
}

impl ItemKey {
    /// Creates a segment key.
    pub fn segment(segment: impl Into<String>) -> Self {
        ItemKey::Segment {
            segment: segment.into(),
        }
    }

    /// Creates a frame key.
    pub fn frame(segment: impl Into<String>, index: u64) -> Self {
        ItemKey::Frame {
            segment: segment.into(),
            index,
        }
    }

    /// Creates a sensor key.
    pub fn sensor(segment: impl Into<String>, sensor: impl Into<String>) -> Self {
        ItemKey::Sensor {
            segment: segment.into(),
            sensor: sensor.into(),
        }
    }

    /// Returns the segment this key belongs to.
    pub fn segment_name(&self) -> &str {
        match self {
            ItemKey::Segment { segment }
            | ItemKey::Frame { segment, .. }
            | ItemKey::Sensor { segment, .. } => segment,
        }
    }

    /// Returns the frame index for frame keys.
    pub fn frame_index(&self) -> Option<u64> {
        match self {
            ItemKey::Frame { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Returns the sensor name for sensor keys.
    pub fn sensor_name(&self) -> Option<&str> {
        match self {
            ItemKey::Sensor { sensor, .. } => Some(sensor),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Segment { segment } => write!(f, "{segment}"),
            ItemKey::Frame { segment, index } => write!(f, "{segment}[{index}]"),
            ItemKey::Sensor { segment, sensor } => write!(f, "{segment}/{sensor}"),
        }
    }
}

/// One step of a transfer plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOp {
    /// What to do.
    pub kind: OpKind,
    /// What to do it to.
    pub key: ItemKey,
}

impl PlanOp {
    /// Creates a plan operation.
    pub fn new(kind: OpKind, key: ItemKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for PlanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Computes the plan turning `remote` into `local`.
///
/// `local` must yield segments in name order, sensors in name order and
/// frames in index order. Segments come out in name order; within a
/// segment, the segment operation comes first, then sensor operations in
/// name order, then frame operations in index order. A remote-only segment
/// yields a single segment `Delete`.
pub(crate) fn diff<'a, L, S, F>(local: L, remote: &RemoteSnapshot) -> Vec<PlanOp>
where
    L: IntoIterator<Item = (&'a str, S, F)>,
    S: IntoIterator<Item = &'a Sensor>,
    F: IntoIterator<Item = (u64, Checksum)>,
{
    let mut ops = Vec::new();
    let mut remote_segments = remote.segments.iter().peekable();

    for (name, sensors, frames) in local {
        while let Some((remote_name, _)) = remote_segments.next_if(|(r, _)| r.as_str() < name) {
            ops.push(PlanOp::new(OpKind::Delete, ItemKey::segment(remote_name.as_str())));
        }

        let shape = match remote_segments.next_if(|(r, _)| r.as_str() == name) {
            Some((_, shape)) => Some(shape),
            None => {
                ops.push(PlanOp::new(OpKind::Create, ItemKey::segment(name)));
                None
            }
        };

        let mut sensor_ops: BTreeMap<&str, OpKind> = BTreeMap::new();
        let mut local_sensors = BTreeSet::new();
        for sensor in sensors {
            local_sensors.insert(sensor.name.as_str());
            match shape.and_then(|s| s.sensors.get(&sensor.name)) {
                None => {
                    sensor_ops.insert(&sensor.name, OpKind::Create);
                }
                Some(remote_sensor) if remote_sensor != sensor => {
                    sensor_ops.insert(&sensor.name, OpKind::Update);
                }
                Some(_) => {}
            }
        }
        for remote_name in shape.into_iter().flat_map(|s| s.sensors.keys()) {
            if !local_sensors.contains(remote_name.as_str()) {
                sensor_ops.insert(remote_name, OpKind::Delete);
            }
        }
        ops.extend(
            sensor_ops
                .into_iter()
                .map(|(sensor, kind)| PlanOp::new(kind, ItemKey::sensor(name, sensor))),
        );

        let mut frame_ops: Vec<(u64, OpKind)> = Vec::new();
        let mut local_indices = Vec::new();
        for (index, checksum) in frames {
            local_indices.push(index);
            match shape.and_then(|s| s.frames.get(&index)) {
                None => frame_ops.push((index, OpKind::Create)),
                Some(remote_checksum) if *remote_checksum != checksum => {
                    frame_ops.push((index, OpKind::Update))
                }
                Some(_) => {}
            }
        }
        for index in shape.into_iter().flat_map(|s| s.frames.keys()) {
            if local_indices.binary_search(index).is_err() {
                frame_ops.push((*index, OpKind::Delete));
            }
        }
        frame_ops.sort_by_key(|(index, _)| *index);

        ops.extend(
            frame_ops
                .into_iter()
                .map(|(index, kind)| PlanOp::new(kind, ItemKey::frame(name, index))),
        );
    }

    for (remote_name, _) in remote_segments {
        ops.push(PlanOp::new(OpKind::Delete, ItemKey::segment(remote_name.as_str())));
    }

    ops
}
