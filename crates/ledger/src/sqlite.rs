//! Durable marker store backed by the ledger database.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::MarkerRow;
use crate::store::{Marker, MarkerStore};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use ferry_transfer::RemoteFileRef;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use time::UtcDateTime;
use tracing::instrument;

/// Marker store that survives restarts.
///
/// Several stores can share one database file; each keeps its markers under
/// its own namespace (usually the name of the remote source).
#[derive(Debug, Clone)]
pub struct SqliteMarkerStore {
    pool: SqlitePool,
    namespace: String,
}
impl SqliteMarkerStore {
    pub fn new(db: &Database, namespace: impl Into<String>) -> Self {
        Self {
            pool: db.pool().clone(),
            namespace: namespace.into(),
        }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<&str> {
        path.to_str().ok_or_raise(|| ErrorKind::InvalidData("directory"))
    }
}

#[async_trait]
impl MarkerStore for SqliteMarkerStore {
    fn name(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self, file), fields(namespace = %self.namespace, key = %file))]
    async fn mark(&self, file: &RemoteFileRef) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/mark.sql"))
            .bind(&self.namespace)
            .bind(file.key())
            .bind(Self::sqlx_hates_paths(&file.directory)?)
            .bind(file.fingerprint())
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        // The conditional upsert touches no row when the fingerprint matches.
        Ok(result.rows_affected() == 1)
    }

    async fn is_marked(&self, file: &RemoteFileRef) -> Result<bool> {
        let fingerprint: Option<String> = sqlx::query_scalar(include_str!("../queries/get_fingerprint.sql"))
            .bind(&self.namespace)
            .bind(file.key())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(fingerprint.is_some_and(|fingerprint| fingerprint == file.fingerprint()))
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn clear(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/clear.sql"))
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, file), fields(namespace = %self.namespace, key = %file))]
    async fn settle(&self, file: &RemoteFileRef) -> Result<()> {
        sqlx::query(include_str!("../queries/settle.sql"))
            .bind(&self.namespace)
            .bind(file.key())
            .bind(Self::sqlx_hates_paths(&file.directory)?)
            .bind(file.fingerprint())
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %self.namespace, directory = %directory.display()))]
    async fn prune(&self, directory: &Path, listing: &[RemoteFileRef]) -> Result<u64> {
        let listed: HashSet<String> =
            listing.iter().filter(|file| file.is_in(directory)).map(RemoteFileRef::key).collect();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let consumed: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_consumed_keys_in_directory.sql"))
            .bind(&self.namespace)
            .bind(Self::sqlx_hates_paths(directory)?)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut pruned = 0;
        for key in consumed.iter().filter(|key| !listed.contains(*key)) {
            pruned += sqlx::query(include_str!("../queries/clear.sql"))
                .bind(&self.namespace)
                .bind(key)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned consumed markers for files no longer listed");
        }
        Ok(pruned)
    }

    async fn markers(&self) -> Result<Vec<Marker>> {
        let rows: Vec<MarkerRow> = sqlx::query_as(include_str!("../queries/list_markers.sql"))
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Marker::try_from).collect()
    }
}
