//! Durable dedup ledger for remote files.
//!
//! The ledger remembers which remote file identities (`directory/name`) have
//! already been selected for transfer, and with which fingerprint. It is the
//! backing store of the poller's remote listing filter: a file is selected
//! again only after its marker is cleared (rollback, failed transfer) or when
//! the remote file changes.
//!
//! # Marker lifecycle
//! - **InFlight**: written atomically when a listing entry is selected.
//! - **Consumed**: written on commit. The tombstone keeps the file from being
//!   selected again, including after a restart, and is pruned once the remote
//!   file disappears from the listing.
//!
//! Two implementations share the [`MarkerStore`] capability: the SQLite
//! store used in production and an in-memory store for tests.

mod db;
pub mod error;
mod memory;
mod models;
mod sqlite;
mod store;

pub use crate::db::Database;
pub use crate::memory::MemoryMarkerStore;
pub use crate::sqlite::SqliteMarkerStore;
pub use crate::store::{Marker, MarkerState, MarkerStore};
use std::sync::Arc;

pub type MarkerStoreHandle = Arc<dyn MarkerStore>;
