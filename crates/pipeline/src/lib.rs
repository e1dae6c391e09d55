//! The ferry pipeline: poll → dedup → fetch → process → commit/rollback.
//!
//! A [`Poller`] periodically lists a remote directory through a pooled
//! connection, selects files it has not seen (recording each selection in the
//! durable ledger before anything else happens), copies them into a local
//! directory, and hands each local copy to the [`Coordinator`]. The
//! coordinator runs the [`Processor`] over the file and then either commits
//! (local copy deleted, remote marker settled) or rolls back (local copy kept,
//! remote marker cleared, health taken down).

pub mod error;
pub mod filter;
pub mod health;
mod local;
pub mod poller;
pub mod processor;
pub mod status;
pub mod sync;
pub mod transaction;

pub use crate::health::{Health, Monitor};
pub use crate::local::{LocalFile, STAGING_DIR};
pub use crate::poller::{CycleReport, PollState, Poller, PollerOptions};
pub use crate::processor::{PrimeNumberProcessor, Processor};
pub use crate::status::Outcome;
pub use crate::transaction::{Coordinator, Resolution, WorkUnit};
