//! Error types for the reference server.

use databay_core::{BranchName, CommitId, CoreError, DraftNumber};
use databay_protocol::{ErrorCode, HttpResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by the reference server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong access key.
    #[error("not authorized")]
    Unauthorized,

    /// The addressed resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Dataset name taken.
    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    /// Branch name taken.
    #[error("branch already exists: {0}")]
    BranchExists(BranchName),

    /// Segment name taken in the draft.
    #[error("segment already exists: {0}")]
    DuplicateSegment(String),

    /// The branch head moved since the draft was created.
    #[error("draft #{draft} is stale: based on {}, branch head is {}", show(.base), show(.head))]
    StaleDraft {
        /// Draft number.
        draft: DraftNumber,
        /// The draft's parent.
        base: Option<CommitId>,
        /// The branch head now.
        head: Option<CommitId>,
    },

    /// The draft is closed or committed.
    #[error("draft #{0} is not open")]
    DraftNotOpen(DraftNumber),

    /// The default branch cannot be deleted.
    #[error("branch {0} is protected")]
    ProtectedBranch(BranchName),

    /// Open drafts target the branch.
    #[error("branch {branch} has {count} open draft(s)")]
    BranchHasOpenDraft {
        /// Branch name.
        branch: BranchName,
        /// Number of open drafts.
        count: usize,
    },

    /// Uploaded bytes do not match the declared checksum.
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// Malformed route or body.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed domain value.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns the wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) | ServerError::Core(_) => {
                ErrorCode::InvalidArgument
            }
            ServerError::Unauthorized => ErrorCode::Unauthorized,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::DatasetExists(_) => ErrorCode::DatasetExists,
            ServerError::BranchExists(_) => ErrorCode::BranchExists,
            ServerError::DuplicateSegment(_) => ErrorCode::DuplicateSegment,
            ServerError::StaleDraft { .. } => ErrorCode::StaleDraft,
            ServerError::DraftNotOpen(_) => ErrorCode::DraftNotOpen,
            ServerError::ProtectedBranch(_) => ErrorCode::ProtectedBranch,
            ServerError::BranchHasOpenDraft { .. } => ErrorCode::BranchHasOpenDraft,
            ServerError::ChecksumMismatch(_) => ErrorCode::ChecksumMismatch,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code().status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.code().status() >= 500
    }

    /// Renders the error as a response.
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::error(self.code(), self.to_string())
    }
}

fn show(commit: &Option<CommitId>) -> String {
    commit
        .as_ref()
        .map_or_else(|| "root".to_string(), |c| c.short().to_string())
}
