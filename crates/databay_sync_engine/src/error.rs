//! Error types for the sync engine.

use databay_core::{BranchName, CoreError, DraftNumber, ItemKey};
use databay_protocol::{ErrorCode, HttpResponse, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync and version-control operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed reference, catalog misuse or invalid frame.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed route or body.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The branch head is not the draft's parent any more.
    #[error("draft #{draft} is stale: {detail}")]
    StaleDraft {
        /// Draft number.
        draft: DraftNumber,
        /// Where the draft and its branch stand.
        detail: String,
    },

    /// This client already holds an open draft on the branch.
    #[error("draft #{draft} is already open on branch {branch}")]
    DraftAlreadyOpen {
        /// Branch name.
        branch: BranchName,
        /// The open draft.
        draft: DraftNumber,
    },

    /// Open drafts still target the branch.
    #[error("branch {branch} has open drafts")]
    BranchHasOpenDraft {
        /// Branch name.
        branch: BranchName,
    },

    /// The default branch cannot be deleted.
    #[error("branch {branch} is protected")]
    ProtectedBranch {
        /// Branch name.
        branch: BranchName,
    },

    /// Another sync already holds the draft or frame.
    #[error("another sync is in progress on {target}")]
    ConcurrentSync {
        /// The contended draft or frame.
        target: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// One planned item failed for good.
    #[error("{key} failed: {source}")]
    TerminalItem {
        /// The failed item.
        key: ItemKey,
        /// The last error seen for it.
        #[source]
        source: Box<SyncError>,
    },

    /// Items still need a successful sync before the draft can be committed.
    #[error("draft is not ready: {} item(s) pending or failed", .items.len())]
    DraftNotReady {
        /// Pending and failed items.
        items: Vec<ItemKey>,
    },

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The server rejected the request.
    #[error("server returned {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Error code from the response body, if any.
        code: Option<ErrorCode>,
        /// Error message.
        message: String,
    },

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-success response to an error without call-site context.
    pub fn from_response(response: &HttpResponse) -> Self {
        let Some(body) = response.error_body() else {
            return Self::Server {
                status: response.status,
                code: None,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            };
        };
        match body.code {
            ErrorCode::NotFound => Self::NotFound(body.message),
            ErrorCode::DatasetExists | ErrorCode::BranchExists => Self::AlreadyExists(body.message),
            ErrorCode::DraftNotOpen => Self::InvalidState(body.message),
            code => Self::Server {
                status: response.status,
                code: Some(code),
                message: body.message,
            },
        }
    }

    /// Replaces a server rejection with a structural error when `refine`
    /// recognizes its code.
    pub fn refine(self, refine: impl FnOnce(ErrorCode, &str) -> Option<SyncError>) -> Self {
        if let Self::Server {
            code: Some(code),
            message,
            ..
        } = &self
        {
            if let Some(refined) = refine(*code, message) {
                return refined;
            }
        }
        self
    }

    /// Returns the error code of a server rejection.
    pub fn server_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns a stable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Core(err) => match err {
                CoreError::InvalidReference { .. } => "InvalidReference",
                CoreError::AmbiguousReference { .. } => "AmbiguousReference",
                CoreError::DuplicateSegment { .. } => "DuplicateSegment",
                CoreError::SegmentNotFound { .. } => "SegmentNotFound",
                CoreError::FrameNotFound { .. } => "FrameNotFound",
                CoreError::InvalidSegmentName { .. } => "InvalidSegmentName",
                CoreError::InvalidFrame { .. } => "InvalidFrame",
                CoreError::InvalidSensor { .. } => "InvalidSensor",
                CoreError::UnknownSensor { .. } => "UnknownSensor",
                CoreError::SensorInUse { .. } => "SensorInUse",
                CoreError::ImmutableSnapshot { .. } => "ImmutableSnapshot",
                CoreError::CommitNotFound { .. } => "NotFound",
            },
            SyncError::Protocol(_) => "Protocol",
            SyncError::StaleDraft { .. } => "StaleDraft",
            SyncError::DraftAlreadyOpen { .. } => "DraftAlreadyOpen",
            SyncError::BranchHasOpenDraft { .. } => "BranchHasOpenDraft",
            SyncError::ProtectedBranch { .. } => "ProtectedBranch",
            SyncError::ConcurrentSync { .. } => "ConcurrentSync",
            SyncError::Transport { .. } => "Transport",
            SyncError::TerminalItem { .. } => "TerminalItem",
            SyncError::DraftNotReady { .. } => "DraftNotReady",
            SyncError::NotFound(_) => "NotFound",
            SyncError::AlreadyExists(_) => "AlreadyExists",
            SyncError::Server { .. } => "Server",
            SyncError::Cancelled => "Cancelled",
            SyncError::InvalidState(_) => "InvalidState",
        }
    }
}
