//! Server configuration.

use databay_core::BranchName;
use databay_protocol::DEFAULT_PAGE_LIMIT;

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Branch created with every dataset.
    pub default_branch: BranchName,
    /// Access key every request must carry, if set.
    pub access_key: Option<String>,
    /// Largest page a listing returns, whatever the client asks for.
    pub max_page_size: u64,
    /// Largest accepted part body.
    pub max_part_size: u64,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            default_branch: BranchName::default_branch(),
            access_key: None,
            max_page_size: DEFAULT_PAGE_LIMIT,
            max_part_size: 64 * 1024 * 1024,
        }
    }

    /// Sets the default branch.
    pub fn with_default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    /// Requires every request to carry this access key.
    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    /// Sets the largest page size.
    pub fn with_max_page_size(mut self, size: u64) -> Self {
        self.max_page_size = size;
        self
    }

    /// Sets the largest part size.
    pub fn with_max_part_size(mut self, size: u64) -> Self {
        self.max_part_size = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
