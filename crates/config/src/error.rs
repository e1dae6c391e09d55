//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A source could not be read or did not match the expected shape.
    #[display("cannot load configuration")]
    Load,
    /// A required setting is absent.
    #[display("missing required setting `{_0}`")]
    Missing(#[error(not(source))] &'static str),
    /// A setting is present but unusable.
    #[display("invalid setting `{_0}`: {_1}")]
    Invalid(#[error(not(source))] &'static str, #[error(not(source))] String),
    /// No home directory to derive default paths from.
    #[display("cannot determine a data directory for this user")]
    NoDataDirectory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
