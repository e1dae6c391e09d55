//! Transfer Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;
use std::time::Duration;

/// A transfer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Remote file or directory does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Could not reach or keep talking to the remote host
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Remote host refused our identity, or we refused theirs
    #[display("authentication failed: {_0}")]
    Authentication(#[error(not(source))] String),
    /// Path contains invalid characters or escapes the remote root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// No pooled connection became available before the wait timeout elapsed
    #[display("no pooled connection available within {}ms", _0.as_millis())]
    PoolExhausted(#[error(not(source))] Duration),
    /// The pool has been closed for shutdown
    #[display("connection pool is closed")]
    PoolClosed,
    /// Pool options rejected at construction
    #[display("invalid pool options: {_0}")]
    InvalidOptions(#[error(not(source))] String),
    /// Connector-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Network(_) | Self::BackendError(_) | Self::PoolExhausted(_)
        )
    }

    pub(crate) fn from_io(err: IoError, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhausted_display() {
        let kind = ErrorKind::PoolExhausted(Duration::from_millis(250));
        assert_eq!(kind.to_string(), "no pooled connection available within 250ms");
        assert!(kind.is_retryable());
    }

    #[test]
    fn io_mapping() {
        let err = IoError::new(std::io::ErrorKind::NotFound, "gone");
        let kind = ErrorKind::from_io(err, std::path::Path::new("upload/a.txt"));
        assert!(matches!(kind, ErrorKind::NotFound(ref p) if p == std::path::Path::new("upload/a.txt")));
        assert!(!kind.is_retryable());
    }
}
