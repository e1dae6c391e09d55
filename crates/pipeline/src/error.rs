//! Pipeline Error Types
//!
//! Structured errors using `exn` for automatic location tracking. Failures
//! from the transfer and ledger crates are raised into one of these kinds so
//! that the poll loop can decide, per kind, whether a cycle is merely
//! aborted, whether health is affected, and whether the loop must stop.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Cycle-aborting
/// - [`ErrorKind::PoolExhausted`] (logged only)
/// - [`ErrorKind::Connection`]
/// - [`ErrorKind::Listing`]
/// - [`ErrorKind::Ledger`]
/// - [`ErrorKind::LocalStorage`]
///
/// ### Per-file
/// - [`ErrorKind::Transfer`]
/// - [`ErrorKind::Processing`]
///
/// ### Fatal
/// - [`ErrorKind::DedupConflict`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No pooled connection became available in time.
    #[display("no remote session available")]
    PoolExhausted,
    /// Opening or probing a remote connection failed.
    #[display("remote connection failed")]
    Connection,
    /// The remote directory could not be listed.
    #[display("cannot list remote directory {}", _0.display())]
    Listing(#[error(not(source))] PathBuf),
    /// Copying one remote file to local storage failed.
    #[display("transfer of {_0} failed")]
    Transfer(#[error(not(source))] String),
    /// The processor rejected a file; the message is the processor's own.
    #[display("Got processing error: {_0}")]
    Processing(#[error(not(source))] String),
    /// Reading or writing the dedup ledger failed.
    #[display("dedup ledger unavailable")]
    Ledger,
    /// A local storage operation failed.
    #[display("local storage error at {}", _0.display())]
    LocalStorage(#[error(not(source))] PathBuf),
    /// A file was dispatched while a unit for the same path was in flight.
    #[display("{} dispatched while already in flight", _0.display())]
    DedupConflict(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying (in a later cycle) might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::DedupConflict(_) | Self::Processing(_))
    }

    /// Returns `true` if the poll loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DedupConflict(_))
    }

    /// Returns `true` if the error should be logged without touching health.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoolExhausted)
    }
}

/// Raise a transfer-crate error into the pipeline kind describing what was
/// being attempted, keeping pool exhaustion distinguishable.
pub(crate) fn from_transfer(
    err: ferry_transfer::error::Error,
    otherwise: impl FnOnce() -> ErrorKind,
) -> Error {
    let kind = match &*err {
        ferry_transfer::error::ErrorKind::PoolExhausted(_) => ErrorKind::PoolExhausted,
        _ => otherwise(),
    };
    err.raise(kind)
}
