//! # DataBay Sync Engine
//!
//! Transfer engine and version-control client for DataBay.
//!
//! This crate provides:
//! - Chunked, resumable frame uploads over a pluggable `Transport`
//! - Retry with exponential backoff and jitter, split by control and data plane
//! - Per-draft and per-frame mutual exclusion
//! - Per-item sync reports and a commit readiness ledger
//! - The draft workflow (`VersionControl`) and dataset management (`DatasetClient`)
//!
//! ## Architecture
//!
//! A sync computes a key-wise diff between a local catalog and the remote
//! draft and executes it as independent items:
//! 1. Check that the draft's branch has not moved
//! 2. Create new segments
//! 3. Upload, replace or delete frames in parallel
//! 4. Delete removed segments
//!
//! ## Key Invariants
//!
//! - The server is the source of truth; no state survives a restart
//! - At most one upload per frame and one sync or commit per draft is in flight
//! - A draft commits only when nothing is pending or failed
//! - Structural errors are never retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod controller;
mod engine;
mod error;
mod http;
mod lock;
mod pool;
mod remote;
mod retry;
mod transport;

pub use cancel::CancellationToken;
pub use config::{RetryConfig, SyncConfig, DEFAULT_PART_SIZE};
pub use controller::{DatasetClient, VersionControl};
pub use engine::{
    FrameKey, ItemOutcome, Ledger, SegmentSummary, SyncEngine, SyncReport, SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use http::LoopbackTransport;
pub use lock::{KeyGuard, KeyedLocks};
pub use remote::{ApiClient, RemoteClient};
pub use retry::{classify, Disposition, Plane, RetryState};
pub use transport::{MockTransport, Transport, TransportError};
