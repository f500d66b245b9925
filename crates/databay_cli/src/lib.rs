//! # DataBay CLI
//!
//! Command-line client for a DataBay server.
//!
//! This crate provides:
//! - The `databay` command definitions ([`cli`])
//! - One module per command ([`commands`])
//! - A blocking HTTP [`Transport`](databay_sync_engine::Transport) built on reqwest
//!
//! ## Commands
//!
//! - `dataset create|list|delete`
//! - `upload` - push a directory of files into a draft, optionally committing it
//! - `read` - list and download the contents of a revision
//! - `branch list|create|delete`
//! - `draft create|list|close`
//! - `commit`, `log`
//!
//! The client keeps no local state between invocations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod interrupt;
pub mod transport;

pub use cli::{Cli, Commands, OutputFormat};
pub use commands::{execute, Context};
pub use error::{CliError, CliResult};
pub use transport::ReqwestTransport;

use databay_sync_engine::SyncConfig;

/// Builds the client configuration from global flags and upload overrides.
pub fn sync_config(cli: &Cli) -> SyncConfig {
    let mut config = SyncConfig::new();
    if let Some(key) = &cli.access_key {
        config = config.with_access_key(key.clone());
    }
    if let Commands::Upload(args) = &cli.command {
        if let Some(size) = args.part_size {
            config = config.with_part_size(size);
        }
        if let Some(jobs) = args.jobs {
            config = config.with_parallelism(jobs);
        }
    }
    config
}
