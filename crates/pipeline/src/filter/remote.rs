use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_ledger::{Marker, MarkerState, MarkerStoreHandle};
use ferry_transfer::RemoteFileRef;
use std::path::Path;

/// Selects remote files that have not been selected before.
///
/// Selection and marking are one atomic step per entry, so an entry returned
/// by [`filter`](Self::filter) is already recorded as in flight.
#[derive(Clone)]
pub struct RemoteFilter {
    store: MarkerStoreHandle,
}
impl RemoteFilter {
    pub fn new(store: MarkerStoreHandle) -> Self {
        Self { store }
    }

    /// Return, in listing order, at most `limit` entries not already marked
    /// with the same fingerprint, marking each one as it is selected.
    ///
    /// Selection is all or nothing: if a mark fails, the entries already
    /// marked by this call are cleared again before the error is returned.
    pub async fn filter(&self, listing: &[RemoteFileRef], limit: usize) -> Result<Vec<RemoteFileRef>> {
        let mut selected = Vec::new();
        for file in listing {
            if selected.len() >= limit {
                break;
            }
            match self.store.mark(file).await {
                Ok(true) => selected.push(file.clone()),
                Ok(false) => {},
                Err(err) => {
                    for file in &selected {
                        if let Err(err) = self.clear(file).await {
                            tracing::error!(file = %file, error = ?err, "Cannot clear marker of abandoned selection");
                        }
                    }
                    return Err(err).or_raise(|| ErrorKind::Ledger);
                },
            }
        }
        if !selected.is_empty() {
            tracing::debug!(ledger = self.store.name(), selected = selected.len(), "Selected new remote files");
        }
        Ok(selected)
    }

    /// Forget `file`, so the next listing selects it again.
    pub async fn clear(&self, file: &RemoteFileRef) -> Result<()> {
        self.store.clear(&file.key()).await.or_raise(|| ErrorKind::Ledger)?;
        Ok(())
    }

    /// Forget the marker stored under `key`.
    pub async fn forget(&self, key: &str) -> Result<bool> {
        self.store.clear(key).await.or_raise(|| ErrorKind::Ledger)
    }

    /// Markers of `directory` still waiting for a commit or rollback.
    pub async fn in_flight(&self, directory: &Path) -> Result<Vec<Marker>> {
        let markers = self.store.markers().await.or_raise(|| ErrorKind::Ledger)?;
        Ok(markers
            .into_iter()
            .filter(|marker| marker.state == MarkerState::InFlight && Path::new(&marker.directory) == directory)
            .collect())
    }

    /// Record `file` as consumed.
    pub async fn settle(&self, file: &RemoteFileRef) -> Result<()> {
        self.store.settle(file).await.or_raise(|| ErrorKind::Ledger)
    }

    /// Drop tombstones of consumed files that `listing` no longer contains.
    pub async fn prune(&self, directory: &Path, listing: &[RemoteFileRef]) -> Result<u64> {
        self.store.prune(directory, listing).await.or_raise(|| ErrorKind::Ledger)
    }

    /// Whether `file` is currently marked with its present fingerprint.
    pub async fn is_marked(&self, file: &RemoteFileRef) -> Result<bool> {
        self.store.is_marked(file).await.or_raise(|| ErrorKind::Ledger)
    }
}
