//! Error types for DataBay core.

use crate::revision::RevisionKind;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the revision model and the catalog.
///
/// None of these are retryable: they describe malformed input or an
/// operation that is invalid for the current state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The reference string does not name any revision kind.
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference {
        /// The input as given by the user.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The reference string matches more than one revision kind.
    #[error("ambiguous reference {reference:?}: could be {}", join_kinds(.candidates))]
    AmbiguousReference {
        /// The input as given by the user.
        reference: String,
        /// All kinds the input matched.
        candidates: Vec<RevisionKind>,
    },

    /// A segment with this name already exists.
    #[error("segment already exists: {name}")]
    DuplicateSegment {
        /// Segment name.
        name: String,
    },

    /// The segment does not exist in this catalog.
    #[error("segment not found: {name}")]
    SegmentNotFound {
        /// Segment name.
        name: String,
    },

    /// The frame does not exist in the segment.
    #[error("frame not found: {segment}[{index}]")]
    FrameNotFound {
        /// Segment name.
        segment: String,
        /// Frame index.
        index: u64,
    },

    /// Segment names must be non-empty and free of separators.
    #[error("invalid segment name {name:?}: {reason}")]
    InvalidSegmentName {
        /// Segment name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The frame or one of its data items is malformed.
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Description of the problem.
        message: String,
    },

    /// Sensor names must be non-empty.
    #[error("invalid sensor {name:?}: {reason}")]
    InvalidSensor {
        /// Sensor name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The sensor is not registered in the segment.
    #[error("sensor {sensor} is not registered in segment {segment}")]
    UnknownSensor {
        /// Segment name.
        segment: String,
        /// Sensor name.
        sensor: String,
    },

    /// Frames of the fusion segment still reference the sensor.
    #[error("sensor {sensor} is used by frames of segment {segment}")]
    SensorInUse {
        /// Segment name.
        segment: String,
        /// Sensor name.
        sensor: String,
    },

    /// Mutation attempted on a read-only snapshot.
    #[error("snapshot of {revision} is read-only")]
    ImmutableSnapshot {
        /// The revision the snapshot belongs to.
        revision: String,
    },

    /// A commit was not known to the commit source.
    #[error("commit not found: {id}")]
    CommitNotFound {
        /// Commit ID.
        id: String,
    },
}

impl CoreError {
    /// Creates an invalid reference error.
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }
}

fn join_kinds(kinds: &[RevisionKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}
