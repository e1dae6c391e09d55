use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use ferry_transfer::RemoteFileRef;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use time::UtcDateTime;

/// Where a remote file is in its journey through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerState {
    /// Selected by a listing; not yet committed.
    InFlight,
    /// Processed and committed. Kept as a tombstone until the remote file is
    /// no longer listed.
    Consumed,
}
impl MarkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Consumed => "consumed",
        }
    }
}
impl fmt::Display for MarkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for MarkerState {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_flight" => Ok(Self::InFlight),
            "consumed" => Ok(Self::Consumed),
            _ => exn::bail!(ErrorKind::InvalidData("marker state")),
        }
    }
}

/// A dedup record for one remote file identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// `directory/name` of the remote file.
    pub key: String,
    /// Remote directory the file was listed in.
    pub directory: String,
    /// `size:mtime` signature at the time the marker was written.
    pub fingerprint: String,
    pub state: MarkerState,
    pub marked_at: UtcDateTime,
}
impl Marker {
    pub(crate) fn new(file: &RemoteFileRef, state: MarkerState) -> Self {
        Self {
            key: file.key(),
            directory: file.directory.to_string_lossy().into_owned(),
            fingerprint: file.fingerprint(),
            state,
            marked_at: UtcDateTime::now(),
        }
    }

    /// Whether this marker still describes the listed file's content.
    pub fn matches(&self, file: &RemoteFileRef) -> bool {
        self.fingerprint == file.fingerprint()
    }
}

/// Durable record of which remote files have already been selected.
///
/// All operations are keyed on [`RemoteFileRef::key`] and compare on
/// [`RemoteFileRef::fingerprint`]. Implementations must make [`mark`] atomic:
/// two concurrent callers marking the same unmarked file must see exactly one
/// `true`.
///
/// [`mark`]: MarkerStore::mark
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Name of the ledger, for logging.
    fn name(&self) -> &str;

    /// Record `file` as in flight.
    ///
    /// Returns `true` when the file was newly selected: no marker existed for
    /// its key, or the existing marker carried a different fingerprint (the
    /// remote file changed). Returns `false`, without writing, when a marker
    /// with the same fingerprint already exists in any state.
    async fn mark(&self, file: &RemoteFileRef) -> Result<bool>;

    /// Whether a marker with the same key and fingerprint exists.
    async fn is_marked(&self, file: &RemoteFileRef) -> Result<bool>;

    /// Remove the marker for `key`, so that the next listing selects the file
    /// again. Returns `true` when a marker was removed.
    async fn clear(&self, key: &str) -> Result<bool>;

    /// Replace whatever marker exists for `file` with a consumed tombstone.
    async fn settle(&self, file: &RemoteFileRef) -> Result<()>;

    /// Drop consumed tombstones in `directory` whose file is not in `listing`.
    ///
    /// Only call this with a complete, successful listing of `directory`. In
    /// flight markers are never pruned. Returns the number of markers removed.
    async fn prune(&self, directory: &Path, listing: &[RemoteFileRef]) -> Result<u64>;

    /// Every marker, ordered by key.
    async fn markers(&self) -> Result<Vec<Marker>>;
}
