//! Protocol errors and the JSON error body.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or routing messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A body could not be encoded or decoded as JSON.
    #[error("json error: {0}")]
    Json(String),

    /// The request path does not match any route.
    #[error("unknown route: {path}")]
    UnknownRoute {
        /// Request path.
        path: String,
    },

    /// A path or query parameter is malformed.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Machine-readable error code carried in every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request.
    InvalidArgument,
    /// Missing or wrong access key.
    Unauthorized,
    /// The addressed resource does not exist.
    NotFound,
    /// A dataset with this name exists.
    DatasetExists,
    /// A branch with this name exists.
    BranchExists,
    /// A segment with this name exists in the draft.
    DuplicateSegment,
    /// The draft's branch head moved since the draft was created.
    StaleDraft,
    /// The draft is closed or committed.
    DraftNotOpen,
    /// The default branch cannot be deleted.
    ProtectedBranch,
    /// An open draft targets the branch.
    BranchHasOpenDraft,
    /// Uploaded bytes do not match the declared checksum.
    ChecksumMismatch,
    /// Too many requests.
    RateLimited,
    /// The service is temporarily unavailable.
    Unavailable,
    /// Unexpected server failure.
    Internal,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidArgument => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::DatasetExists
            | ErrorCode::BranchExists
            | ErrorCode::DuplicateSegment
            | ErrorCode::StaleDraft
            | ErrorCode::DraftNotOpen
            | ErrorCode::ProtectedBranch
            | ErrorCode::BranchHasOpenDraft => 409,
            ErrorCode::ChecksumMismatch => 422,
            ErrorCode::RateLimited => 429,
            ErrorCode::Internal => 500,
            ErrorCode::Unavailable => 503,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The wire form doubles as the display form.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
