use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// Malformed request, rejected before the guardian is consulted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Blacklist or folder policy, rejected before the guardian is consulted.
    #[error("Blocked by policy: {0}")]
    PolicyBlock(String),

    #[error("Blocked by safety guardian: {0}")]
    SafetyBlock(String),

    #[error(
        "File operation '{action}' failed ({} -> {}): {cause}",
        .source_path.display(),
        .destination.display()
    )]
    FileOperation {
        action: String,
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("Timed out after {waited:?} waiting for lock on {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Audit write failed after the filesystem mutation already completed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn file_operation(
        action: impl Into<String>,
        source_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        cause: std::io::Error,
    ) -> Self {
        Error::FileOperation {
            action: action.into(),
            source_path: source_path.into(),
            destination: destination.into(),
            cause,
        }
    }

    /// File operation failures and lock timeouts may be re-queued by the caller.
    /// Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::FileOperation { .. } | Error::LockTimeout { .. })
    }
}
