//! Identity of a file on the remote side, as returned by a listing.

use std::fmt;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// A file discovered in a remote directory listing.
///
/// Two references describe the *same file* when their [`key`](Self::key)s
/// match, and the *same content* when their [`fingerprint`](Self::fingerprint)s
/// also match. Dedup records are keyed on the former and compared on the
/// latter, so a file that is rewritten in place is picked up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    /// Directory the file was listed in, as configured (not normalized).
    pub directory: PathBuf,
    /// Bare file name; never contains a path separator.
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp reported by the remote
    pub modified: UtcDateTime,
}
impl RemoteFileRef {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>, size: u64, modified: UtcDateTime) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            size,
            modified,
        }
    }

    /// Full remote path (directory joined with name).
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    /// Dedup key: the remote path as a string.
    pub fn key(&self) -> String {
        self.path().to_string_lossy().into_owned()
    }

    /// Content signature used to decide whether a known file has changed.
    ///
    /// Remote transfer protocols only guarantee whole-second modification
    /// times, so sub-second precision is deliberately dropped.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.size, self.modified.unix_timestamp())
    }

    /// Whether this reference lives directly inside `directory`.
    pub fn is_in(&self, directory: &Path) -> bool {
        self.directory == directory
    }
}
impl fmt::Display for RemoteFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}
