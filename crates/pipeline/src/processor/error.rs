//! Processor Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A processing error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for processors.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A line could not be interpreted by the processor.
    #[display("`{_0}` is not a valid number")]
    Malformed(#[error(not(source))] String),
    /// A line of the file failed; carries the failure's own message.
    #[display("line {number}: {reason}")]
    InvalidLine {
        #[error(not(source))]
        number: usize,
        #[error(not(source))]
        reason: String,
    },
    /// The file could not be read (including invalid UTF-8).
    #[display("cannot read {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}
