//! # DataBay Core
//!
//! Revision model, commit graph and segment/frame catalog for DataBay.
//!
//! This crate provides:
//! - `Revision` and its identifiers (`CommitId`, `BranchName`, `DraftNumber`)
//! - Commit, branch and draft records with lazy ancestry checks
//! - The in-memory `Catalog` of segments, sensors and frames for a draft or
//!   commit
//! - Key-wise diffing of a catalog against a remote snapshot
//!
//! This is a pure data crate with no I/O operations. The commit graph is
//! never owned locally: ancestry is answered by walking parent links through
//! a [`CommitSource`], which in production is the remote server.
//!
//! ## Key Invariants
//!
//! - A `CommitId` is never writable; only a draft's catalog accepts mutations
//! - Segment names are unique within a catalog
//! - Frame indices are assigned on append and never reused within a segment
//! - Diffing a catalog against its own snapshot yields no operations

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
mod error;
mod history;
mod revision;

pub use catalog::{
    Catalog, CatalogMode, Checksum, DataItem, Frame, ItemKey, ItemSpan, OpKind, PlanOp,
    RemoteSnapshot, Segment, Sensor,
};
pub use error::{CoreError, CoreResult};
pub use history::{
    history, is_ancestor, lineage, Branch, Commit, CommitSource, Draft, DraftStatus, Lineage,
    MemoryCommits,
};
pub use revision::{BranchName, CommitId, DraftNumber, Revision, RevisionKind, DEFAULT_BRANCH};
