//! The SQLite file behind the ledger.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// The poller, plus one `ferry ledger` command running beside it.
const MAX_CONNECTIONS: u32 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Connection pool over the ledger file, migrated on open.
///
/// Marker stores borrow the pool from here; see
/// [`SqliteMarkerStore`](crate::SqliteMarkerStore).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the ledger at `path`. The parent directory
    /// must already exist.
    ///
    /// A marker write is acknowledged only once it is on disk, so a marker
    /// reported as written survives a crash or power cut.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT)
            // Pruned tombstones hand their pages back on close.
            .auto_vacuum(SqliteAutoVacuum::Incremental)
            .pragma("wal_autocheckpoint", "400");
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// A throwaway ledger for tests in this and other crates.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection to ":memory:" is its own database.
        Self::open(SqliteConnectOptions::new().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reclaim free pages and close every connection.
    pub async fn close(&self) {
        if let Err(err) = sqlx::query("PRAGMA incremental_vacuum").execute(&self.pool).await {
            tracing::debug!(error = %err, "Skipping ledger vacuum");
        }
        self.pool.close().await;
    }
}
