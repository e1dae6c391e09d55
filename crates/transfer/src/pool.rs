//! Bounded session pool.
//!
//! Opening a remote session is expensive (TCP, key exchange, authentication),
//! so connections are kept between polls and handed out again. The pool
//! enforces three rules:
//!
//! - never more than `size` live connections,
//! - an idle connection is pinged before reuse and replaced (once) if dead,
//! - a caller waits at most `wait_timeout` for a slot, then gets
//!   [`PoolExhausted`](ErrorKind::PoolExhausted).
//!
//! Slots are [`tokio::sync::Semaphore`] permits, so waiters are served in
//! FIFO order.

use crate::ConnectorHandle;
use crate::error::{ErrorKind, Result};
use crate::remote::Connection;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;

/// Sizing and back-pressure policy for a [`SessionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of live connections; at least one.
    pub size: usize,
    /// How long [`SessionPool::acquire`] waits for a free slot.
    pub wait_timeout: Duration,
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    /// Connections parked and ready for reuse.
    pub idle: usize,
    /// Slots currently borrowed.
    pub in_use: usize,
}

struct PoolInner {
    connector: ConnectorHandle,
    options: PoolOptions,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
}
impl PoolInner {
    fn take_idle(&self) -> Option<Box<dyn Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn give_back(&self, connection: Box<dyn Connection>) {
        if self.slots.is_closed() {
            return;
        }
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(connection);
    }
}

/// Fixed-size pool of remote connections.
///
/// Cheap to clone; clones share the same slots and idle connections.
///
/// # Examples
///
/// ```
/// use ferry_transfer::remote::MockRemote;
/// use ferry_transfer::{PoolOptions, SessionPool};
/// use std::path::Path;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::with_files([("upload/a.txt", "1")]);
/// let options = PoolOptions { size: 2, wait_timeout: Duration::from_secs(1) };
/// let pool = SessionPool::new(Arc::new(remote), options)?;
///
/// let mut connection = pool.acquire().await?;
/// let files = connection.list(Path::new("upload")).await?;
/// assert_eq!(files.len(), 1);
/// connection.release(); // or just drop it
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(connector: ConnectorHandle, options: PoolOptions) -> Result<Self> {
        if options.size == 0 {
            exn::bail!(ErrorKind::InvalidOptions("pool size must be at least one".to_string()));
        }
        let inner = PoolInner {
            connector,
            options,
            slots: Arc::new(Semaphore::new(options.size)),
            idle: Mutex::new(Vec::with_capacity(options.size)),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Name of the underlying connector.
    pub fn name(&self) -> &str {
        self.inner.connector.name()
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }

    /// Borrow a connection, waiting up to the configured timeout for a slot.
    ///
    /// An idle connection is pinged first; if the ping fails it is dropped
    /// and a single fresh connection is opened in its place. A failure to
    /// connect gives the slot back and is returned to the caller.
    #[instrument(level = "debug", skip(self), fields(pool = %self.name()))]
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let wait = self.inner.options.wait_timeout;
        let permit = match tokio::time::timeout(wait, Arc::clone(&self.inner.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => exn::bail!(ErrorKind::PoolClosed),
            Err(_elapsed) => {
                tracing::warn!(pool = %self.name(), wait = ?wait, "Connection pool exhausted");
                exn::bail!(ErrorKind::PoolExhausted(wait))
            },
        };

        let connection = match self.inner.take_idle() {
            Some(mut idle) => match idle.ping().await {
                Ok(()) => idle,
                Err(err) => {
                    tracing::info!(pool = %self.name(), error = %err, "Discarding stale pooled connection");
                    drop(idle);
                    self.inner.connector.connect().await?
                },
            },
            None => self.inner.connector.connect().await?,
        };

        Ok(PooledConnection {
            connection: Some(connection),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Return a borrowed connection to the pool. Equivalent to dropping it.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    pub fn status(&self) -> PoolStatus {
        let size = self.inner.options.size;
        let in_use = if self.inner.slots.is_closed() {
            0
        } else {
            size.saturating_sub(self.inner.slots.available_permits())
        };
        let idle = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner).len();
        PoolStatus { size, idle, in_use }
    }

    /// Wait for every borrowed connection to come back, then drop all idle
    /// connections and refuse further acquires with
    /// [`PoolClosed`](ErrorKind::PoolClosed).
    pub async fn close(&self) {
        let size = u32::try_from(self.inner.options.size).unwrap_or(u32::MAX);
        let Ok(all) = self.inner.slots.acquire_many(size).await else {
            // Already closed.
            return;
        };
        self.inner.slots.close();
        let drained: Vec<_> = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        tracing::debug!(pool = %self.name(), connections = drained.len(), "Closed connection pool");
        drop(drained);
        drop(all);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }
}

/// A connection borrowed from a [`SessionPool`].
///
/// Dereferences to [`Connection`]. Dropping it parks the connection as idle
/// and frees the slot; call [`discard`](Self::discard) instead when the
/// connection is known to be broken.
pub struct PooledConnection {
    // Only `None` while being dropped or discarded.
    connection: Option<Box<dyn Connection>>,
    pool: Arc<PoolInner>,
    // Declared last: the slot is freed after the connection is parked.
    _permit: OwnedSemaphorePermit,
}
impl PooledConnection {
    /// Give the connection back to the pool for reuse.
    pub fn release(self) {
        drop(self);
    }

    /// Destroy the connection instead of returning it; the slot is freed and
    /// the next acquire opens a fresh connection.
    pub fn discard(mut self) {
        self.connection.take();
    }
}
impl Deref for PooledConnection {
    type Target = dyn Connection;
    fn deref(&self) -> &Self::Target {
        self.connection.as_deref().expect("pooled connection used after release")
    }
}
impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_deref_mut().expect("pooled connection used after release")
    }
}
impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(connection);
        }
    }
}
