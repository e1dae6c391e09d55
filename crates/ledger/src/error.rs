//! Ledger Error Types

use derive_more::{Display, Error};

/// A ledger error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A value could not be converted to or from its stored representation.
    #[display("invalid ledger data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY and friends surface as a plain database error.
        matches!(self, Self::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_database_errors_are_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
        assert!(!ErrorKind::InvalidData("state").is_retryable());
    }

    #[test]
    fn test_display_names_the_invalid_field() {
        assert_eq!(ErrorKind::InvalidData("marked_at").to_string(), "invalid ledger data: marked_at");
    }
}
