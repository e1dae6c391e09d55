//! Outcome of each dispatched file, by name.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// How the last unit of work for a file was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    RolledBack,
}
impl Outcome {
    /// `true` for [`Committed`](Self::Committed).
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Committed)
    }
}
impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// Last-write-wins map of file name to [`Outcome`].
#[derive(Debug, Default)]
pub struct StatusTracker {
    outcomes: RwLock<HashMap<String, Outcome>>,
}
impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: impl Into<String>, outcome: Outcome) {
        let name = name.into();
        tracing::debug!(name, %outcome, "Recorded outcome");
        self.outcomes.write().unwrap_or_else(PoisonError::into_inner).insert(name, outcome);
    }

    /// `None` when the file was never resolved.
    pub fn inspect(&self, name: &str) -> Option<Outcome> {
        self.outcomes.read().unwrap_or_else(PoisonError::into_inner).get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let status = StatusTracker::new();
        assert_eq!(status.inspect("numbers1.txt"), None);
        status.record("numbers1.txt", Outcome::RolledBack);
        status.record("numbers1.txt", Outcome::Committed);
        assert_eq!(status.inspect("numbers1.txt"), Some(Outcome::Committed));
    }
}
