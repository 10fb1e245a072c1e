//! Transfer error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::content::ContentError;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while moving a blob from the network into the store.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection, TLS or body read failure.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// Non-2xx response.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The transport's own connect/read timeout expired.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The compressed stream could not be decoded.
    #[error("failed to decompress {hash}: {reason}")]
    Decompress { hash: String, reason: String },

    /// The written file does not hash to its content address.
    #[error("integrity check failed for {expected}: got {actual}")]
    Integrity { expected: String, actual: String },

    /// A batch response ended before every file in the range was read.
    #[error("batch response for {url} ended early: expected {expected} bytes, got {actual}")]
    ShortBody {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Local write failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Content(#[from] ContentError),

    /// All attempts failed.
    #[error("{target} failed after {attempts} attempts: {last}")]
    Exhausted {
        target: String,
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    /// A worker task panicked or was aborted.
    #[error("transfer task failed: {0}")]
    Task(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http { .. }
                | Self::Status { .. }
                | Self::Timeout { .. }
                | Self::Decompress { .. }
                | Self::Integrity { .. }
                | Self::ShortBody { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The error that ended the final attempt.
    pub fn root(&self) -> &TransferError {
        match self {
            Self::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Whether the final cause was a hash mismatch.
    pub fn is_integrity(&self) -> bool {
        matches!(self.root(), Self::Integrity { .. })
    }
}
