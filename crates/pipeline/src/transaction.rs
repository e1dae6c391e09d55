//! Commit/rollback boundary around processing one file.
//!
//! Processing runs first. Its outcome picks one of two fixed step sequences:
//!
//! | Commit                         | Rollback                        |
//! |--------------------------------|---------------------------------|
//! | delete the local copy          | retain the local copy           |
//! | settle the remote marker       | clear the remote marker         |
//! | release the local filter entry | (local filter entry is kept)    |
//! | record `Committed`             | record `RolledBack`             |
//! | health up                      | health down with the cause      |
//!
//! The steps touch independent stores and are not atomic together. If the
//! local copy cannot be deleted, the unit is rolled back instead. A later
//! step that fails is logged and routed to health, and the remaining steps
//! still run.

use crate::error::{Error, ErrorKind, Result};
use crate::filter::{LocalFilter, RemoteFilter};
use crate::health::{ErrorRouter, HealthIndicator};
use crate::local::LocalFile;
use crate::processor::{Processor, process_file};
use crate::status::{Outcome, StatusTracker};
use exn::ResultExt;
use ferry_transfer::RemoteFileRef;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;

/// One file's journey from dispatch to resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub remote: RemoteFileRef,
    pub local: LocalFile,
}

/// How a [`WorkUnit`] was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Commit,
    /// Rolled back; carries the failure detail reported to health.
    Rollback(String),
}
impl Resolution {
    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    DeleteLocal,
    SettleRemote,
    ReleaseLocal,
    RecordStatus,
    ReportHealth,
}
impl CommitStep {
    pub const ORDER: [Self; 5] =
        [Self::DeleteLocal, Self::SettleRemote, Self::ReleaseLocal, Self::RecordStatus, Self::ReportHealth];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStep {
    /// The local copy and its local filter entry are both kept.
    RetainLocal,
    ClearRemote,
    RecordStatus,
    ReportHealth,
}
impl RollbackStep {
    pub const ORDER: [Self; 4] = [Self::RetainLocal, Self::ClearRemote, Self::RecordStatus, Self::ReportHealth];
}

/// Runs units of work through a [`Processor`] and resolves each one.
pub struct Coordinator<P> {
    processor: P,
    remote: RemoteFilter,
    local: Arc<LocalFilter>,
    status: Arc<StatusTracker>,
    health: Arc<HealthIndicator>,
    router: ErrorRouter,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl<P: Processor> Coordinator<P> {
    pub fn new(
        processor: P,
        remote: RemoteFilter,
        local: Arc<LocalFilter>,
        status: Arc<StatusTracker>,
        health: Arc<HealthIndicator>,
    ) -> Self {
        let router = ErrorRouter::new(Arc::clone(&health));
        Self {
            processor,
            remote,
            local,
            status,
            health,
            router,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Process `unit` and commit or roll it back.
    ///
    /// Processing failures are not errors here; they produce
    /// [`Resolution::Rollback`]. The only error is
    /// [`DedupConflict`](ErrorKind::DedupConflict), returned without touching
    /// any state when the same local path is already being executed.
    #[tracing::instrument(skip_all, fields(file = %unit.local.name))]
    pub async fn execute(&self, unit: WorkUnit) -> Result<Resolution> {
        let _guard = InFlight::enter(&self.in_flight, &unit.local.path)?;

        let failure = match process_file(&self.processor, &unit.local.path).await {
            Ok(lines) => {
                tracing::debug!(lines, "Processed file");
                match self.commit(&unit).await {
                    Ok(()) => return Ok(Resolution::Commit),
                    Err(err) => err,
                }
            },
            Err(err) => {
                let message = (*err).to_string();
                err.raise(ErrorKind::Processing(message))
            },
        };
        Ok(self.rollback(&unit, failure).await)
    }

    async fn commit(&self, unit: &WorkUnit) -> Result<()> {
        let mut clean = true;
        for step in CommitStep::ORDER {
            let result = match step {
                CommitStep::DeleteLocal => {
                    // Nothing has changed yet, so the unit can still roll back.
                    fs::remove_file(&unit.local.path)
                        .await
                        .or_raise(|| ErrorKind::LocalStorage(unit.local.path.clone()))?;
                    Ok(())
                },
                CommitStep::SettleRemote => self.remote.settle(&unit.remote).await,
                CommitStep::ReleaseLocal => {
                    self.local.remove(&unit.local.path);
                    Ok(())
                },
                CommitStep::RecordStatus => {
                    self.status.record(&unit.local.name, Outcome::Committed);
                    Ok(())
                },
                CommitStep::ReportHealth => {
                    // A failed step already took health down; keep it there.
                    if clean {
                        self.health.report_success();
                    }
                    Ok(())
                },
            };
            if let Err(err) = result {
                tracing::error!(?step, "Commit step failed");
                self.router.route(&err);
                clean = false;
            }
        }
        tracing::info!(file = %unit.local.name, "Committed");
        Ok(())
    }

    async fn rollback(&self, unit: &WorkUnit, cause: Error) -> Resolution {
        let detail = (*cause).to_string();
        for step in RollbackStep::ORDER {
            match step {
                RollbackStep::RetainLocal => {
                    tracing::debug!(path = %unit.local.path.display(), "Retaining local copy");
                },
                RollbackStep::ClearRemote => {
                    if let Err(err) = self.remote.clear(&unit.remote).await {
                        tracing::error!(?step, "Rollback step failed");
                        self.router.route(&err);
                    }
                },
                RollbackStep::RecordStatus => self.status.record(&unit.local.name, Outcome::RolledBack),
                // Routed last so the cause, not a ledger error, is the detail.
                RollbackStep::ReportHealth => self.router.route(&cause),
            }
        }
        tracing::warn!(file = %unit.local.name, detail, "Rolled back");
        Resolution::Rollback(detail)
    }
}

// Marks a local path as being executed for as long as it lives.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}
impl<'a> InFlight<'a> {
    fn enter(set: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> Result<Self> {
        if !set.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_path_buf()) {
            exn::bail!(ErrorKind::DedupConflict(path.to_path_buf()));
        }
        Ok(Self {
            set,
            path: path.to_path_buf(),
        })
    }
}
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.path);
    }
}
