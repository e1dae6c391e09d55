//! Dedup filters guarding both ends of a transfer.
//!
//! The [`RemoteFilter`] decides which listed remote files are selected for
//! transfer, and is backed by the durable ledger. The [`LocalFilter`] decides
//! which local copies are dispatched to the processor, and lives only in
//! memory.

mod local;
mod remote;

pub use self::local::LocalFilter;
pub use self::remote::RemoteFilter;
