//! CLI error type.

use databay_core::{CoreError, DraftNumber};
use databay_sync_engine::SyncError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// A client operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Local file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The command line does not make sense.
    #[error("{0}")]
    Usage(String),

    /// Some items of a sync did not reach the server.
    #[error("draft #{draft}: {pending} item(s) did not reach the server")]
    Incomplete {
        /// Draft number.
        draft: DraftNumber,
        /// Failed and cancelled items.
        pending: usize,
    },
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        CliError::Sync(SyncError::Core(err))
    }
}

impl CliError {
    /// Returns a stable name for the error, printed on stderr.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Sync(err) => err.kind(),
            CliError::Io(_) => "Io",
            CliError::Json(_) => "Json",
            CliError::Usage(_) => "Usage",
            CliError::Incomplete { .. } => "TerminalItem",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_pass_through() {
        let err = CliError::from(CoreError::invalid_frame("bad"));
        assert_eq!(err.kind(), "InvalidFrame");
        assert_eq!(CliError::Usage("x".into()).kind(), "Usage");

        let err = CliError::Incomplete {
            draft: DraftNumber::new(3).unwrap(),
            pending: 2,
        };
        assert_eq!(err.kind(), "TerminalItem");
        assert_eq!(err.to_string(), "draft #3: 2 item(s) did not reach the server");
    }
}
