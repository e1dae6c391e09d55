use crate::error::Result;
use crate::store::{Marker, MarkerState, MarkerStore};
use async_trait::async_trait;
use ferry_transfer::RemoteFileRef;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;

/// Marker store that lives only as long as the process.
///
/// Behaves exactly like [`SqliteMarkerStore`](crate::SqliteMarkerStore)
/// without the durability.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: Mutex<BTreeMap<String, Marker>>,
}
impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn mark(&self, file: &RemoteFileRef) -> Result<bool> {
        let mut markers = self.markers.lock().await;
        if markers.get(&file.key()).is_some_and(|marker| marker.matches(file)) {
            return Ok(false);
        }
        markers.insert(file.key(), Marker::new(file, MarkerState::InFlight));
        Ok(true)
    }

    async fn is_marked(&self, file: &RemoteFileRef) -> Result<bool> {
        let markers = self.markers.lock().await;
        Ok(markers.get(&file.key()).is_some_and(|marker| marker.matches(file)))
    }

    async fn clear(&self, key: &str) -> Result<bool> {
        Ok(self.markers.lock().await.remove(key).is_some())
    }

    async fn settle(&self, file: &RemoteFileRef) -> Result<()> {
        self.markers.lock().await.insert(file.key(), Marker::new(file, MarkerState::Consumed));
        Ok(())
    }

    async fn prune(&self, directory: &Path, listing: &[RemoteFileRef]) -> Result<u64> {
        let listed: HashSet<String> =
            listing.iter().filter(|file| file.is_in(directory)).map(RemoteFileRef::key).collect();
        let directory = directory.to_string_lossy();
        let mut markers = self.markers.lock().await;
        let before = markers.len();
        markers.retain(|key, marker| {
            marker.state != MarkerState::Consumed || marker.directory != directory || listed.contains(key)
        });
        Ok((before - markers.len()) as u64)
    }

    async fn markers(&self) -> Result<Vec<Marker>> {
        Ok(self.markers.lock().await.values().cloned().collect())
    }
}
