//! # DataBay Testkit
//!
//! Test utilities for DataBay.
//!
//! This crate provides:
//! - An in-process reference server with ready-made clients and datasets
//! - Catalog and frame builders
//! - Fault-injecting and gated transports
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use databay_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_server() {
//!     let server = TestServer::new();
//!     let vc = server.dataset("cars");
//!     let draft = vc.create_draft(&main_branch(), "import").unwrap();
//!     // ... build a catalog and sync it
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
