//! # DataBay Server
//!
//! In-memory reference server for DataBay.
//!
//! This crate provides:
//! - Every endpoint of the `/v1/datasets` API
//! - Commits, branches and drafts with atomic draft commits
//! - Chunked upload sessions with checksum verification on finalize
//! - A [`LoopbackServer`](databay_protocol::LoopbackServer) implementation
//!   for in-process clients
//!
//! # Consistency
//!
//! Each dataset is guarded by one mutex, so a draft commit and the branch
//! head it advances change together. A commit is accepted only while the
//! branch head is still the draft's parent; otherwise the request fails with
//! `STALE_DRAFT`. Several drafts may be open on one branch at a time.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::{DataServer, ServerStats};
pub use store::DatasetStore;
