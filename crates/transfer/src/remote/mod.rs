//! Remote collaborator traits and implementations.
//!
//! The pipeline never speaks a transfer protocol itself. It asks a
//! [`Connector`] for fresh [`Connection`]s (through the
//! [`SessionPool`](crate::SessionPool)) and uses those to list a directory
//! and open read streams. Authentication, transport and wire details belong
//! entirely to the implementation.

mod directory;
#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "sftp")]
mod sftp;

pub use self::directory::DirectoryConnector;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockRemote;
#[cfg(feature = "sftp")]
pub use self::sftp::{SftpConnector, SftpOptions};
use crate::RemoteFileRef;
use crate::error::Result;
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;

/// A `'static` blocking byte stream, meant to be drained inside
/// [`spawn_blocking`](tokio::task::spawn_blocking).
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// One live session with the remote origin.
///
/// Connections are borrowed from the pool for a single listing or transfer
/// and handed back afterwards, so implementations should expect to be reused
/// many times and to sit idle between polls.
#[async_trait]
pub trait Connection: Send {
    /// Cheap liveness check, run by the pool before handing out an idle
    /// connection. Returning an error gets the connection discarded.
    async fn ping(&mut self) -> Result<()>;

    /// List regular files directly inside `directory` (non-recursive).
    ///
    /// Implementations must return entries sorted by name, so that a fixed
    /// remote directory always produces the same listing order. Entries whose
    /// names fail [`validate_name`](crate::validate_name) are skipped.
    async fn list(&mut self, directory: &Path) -> Result<Vec<RemoteFileRef>>;

    /// Open a read stream for a listed file.
    ///
    /// Never modifies or removes the remote original. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if the file vanished
    /// since it was listed.
    async fn open(&mut self, file: &RemoteFileRef) -> Result<BoxSyncRead>;
}

/// Factory for [`Connection`]s; the pool calls this whenever it needs a new
/// session (first use, or replacing one that failed its ping).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name used in logs and as the default marker namespace.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn Connection>>;
}
