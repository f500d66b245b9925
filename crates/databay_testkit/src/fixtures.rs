//! Test fixtures: an in-process server and catalog builders.

use bytes::Bytes;
use databay_core::{BranchName, Catalog, DataItem, DraftNumber, Frame};
use databay_server::{DataServer, ServerConfig, ServerStats};
use databay_sync_engine::{
    DatasetClient, LoopbackTransport, RetryConfig, SyncConfig, Transport, VersionControl,
};
use std::sync::Arc;
use std::time::Duration;

/// Transport talking to a [`TestServer`].
pub type ServerTransport = LoopbackTransport<Arc<DataServer>>;

/// A reference server living in the test process.
#[derive(Clone)]
pub struct TestServer {
    server: Arc<DataServer>,
}

impl TestServer {
    /// Creates a server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a server with a custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: Arc::new(DataServer::new(config)),
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &Arc<DataServer> {
        &self.server
    }

    /// Returns the server counters.
    pub fn stats(&self) -> ServerStats {
        self.server.stats()
    }

    /// Returns a transport into this server.
    pub fn transport(&self) -> ServerTransport {
        LoopbackTransport::new(self.server.clone())
    }

    /// Returns a client with [`test_config`].
    pub fn client(&self) -> DatasetClient<ServerTransport> {
        self.client_with(test_config())
    }

    /// Returns a client with a custom configuration.
    pub fn client_with(&self, config: SyncConfig) -> DatasetClient<ServerTransport> {
        DatasetClient::new(self.transport(), config)
    }

    /// Creates a dataset and returns a controller for it, through a fresh
    /// client.
    pub fn dataset(&self, name: &str) -> Arc<VersionControl<ServerTransport>> {
        open_dataset(&self.client(), name)
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Small parts, a few workers and millisecond backoff.
pub fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_part_size(8)
        .with_parallelism(4)
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(4)),
        )
}

/// Creates a dataset through `client` and opens it.
pub fn open_dataset<T: Transport>(
    client: &DatasetClient<T>,
    name: &str,
) -> Arc<VersionControl<T>> {
    client
        .create_dataset(name)
        .expect("Failed to create dataset");
    client.dataset(name).expect("Failed to open dataset")
}

/// Returns the default branch name.
pub fn main_branch() -> BranchName {
    BranchName::default_branch()
}

/// Builds a one-item frame.
pub fn frame(sensor: &str, path: &str, bytes: &[u8]) -> Frame {
    Frame::single(DataItem::new(sensor, path, Bytes::copy_from_slice(bytes)))
        .expect("Failed to build frame")
}

/// Builds a one-item frame of `len` bytes derived from `seed`.
pub fn sized_frame(seed: u8, len: usize) -> Frame {
    let bytes: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();
    frame("cam", &format!("frames/{seed}.bin"), &bytes)
}

/// Builds a draft catalog with `frames` frames of `len` bytes in each of
/// `segments`.
pub fn populated_catalog(draft: DraftNumber, segments: &[&str], frames: usize, len: usize) -> Catalog {
    let mut catalog = Catalog::for_draft(draft);
    for (s, name) in segments.iter().enumerate() {
        catalog
            .add_segment(*name)
            .expect("Failed to add segment");
        for f in 0..frames {
            let seed = (s * frames + f) as u8;
            catalog
                .add_frame(name, sized_frame(seed, len))
                .expect("Failed to add frame");
        }
    }
    catalog
}
