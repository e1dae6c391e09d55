//! Remote side of the ferry pipeline.
//!
//! This crate owns everything that talks to the remote origin: the
//! [`RemoteFileRef`] identity handed out by listings, the [`Connector`] and
//! [`Connection`] collaborator traits that hide the transfer protocol, and the
//! [`SessionPool`] that bounds and recycles live connections between polls.

pub mod error;
mod file;
mod path;
pub mod pool;
pub mod remote;

pub use crate::file::RemoteFileRef;
pub use crate::path::{validate as validate_path, validate_directory, validate_name};
pub use crate::pool::{PoolOptions, PoolStatus, PooledConnection, SessionPool};
pub use crate::remote::{Connection, Connector};
use std::sync::Arc;

pub type ConnectorHandle = Arc<dyn Connector>;
