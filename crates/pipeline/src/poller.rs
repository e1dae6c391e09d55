//! The poll loop.

use crate::error::{ErrorKind, Result, from_transfer};
use crate::filter::{LocalFilter, RemoteFilter};
use crate::health::{ErrorRouter, HealthIndicator, Monitor};
use crate::local::{self, LocalFile, STAGING_DIR};
use crate::processor::Processor;
use crate::status::StatusTracker;
use crate::sync::Synchronizer;
use crate::transaction::{Coordinator, Resolution, WorkUnit};
use exn::ResultExt;
use ferry_ledger::MarkerStoreHandle;
use ferry_transfer::{RemoteFileRef, SessionPool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{OnceCell, watch};
use tokio_util::sync::CancellationToken;

/// What to poll, where to put it, and how much per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    pub remote_directory: PathBuf,
    pub local_directory: PathBuf,
    /// Pause between the end of one cycle and the start of the next.
    pub delay: Duration,
    /// Most remote files selected per cycle.
    pub max_fetch_size: usize,
    /// Most local files dispatched per cycle.
    pub max_messages_per_poll: usize,
}

/// Phase of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Listing,
    Filtering,
    Transferring,
    Dispatching,
}

/// Summary of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub listed: usize,
    pub pruned: u64,
    pub selected: usize,
    pub fetched: usize,
    pub present: usize,
    pub failed: usize,
    /// Dispatched files, by name, in dispatch order.
    pub resolutions: Vec<(String, Resolution)>,
}
impl CycleReport {
    pub fn committed(&self) -> usize {
        self.resolutions.iter().filter(|(_, r)| r.is_commit()).count()
    }

    pub fn rolled_back(&self) -> usize {
        self.resolutions.len() - self.committed()
    }
}

/// Drives poll → dedup → fetch → process → commit/rollback.
pub struct Poller<P> {
    options: PollerOptions,
    pool: SessionPool,
    remote: RemoteFilter,
    local: Arc<LocalFilter>,
    synchronizer: Synchronizer,
    coordinator: Coordinator<P>,
    router: ErrorRouter,
    monitor: Monitor,
    state: watch::Sender<PollState>,
    recovered: OnceCell<()>,
}

impl<P: Processor> Poller<P> {
    pub fn new(options: PollerOptions, pool: SessionPool, store: MarkerStoreHandle, processor: P) -> Self {
        let remote = RemoteFilter::new(store);
        let local = Arc::new(LocalFilter::new());
        let status = Arc::new(StatusTracker::new());
        let health = Arc::new(HealthIndicator::new());
        let synchronizer = Synchronizer::new(pool.clone(), &options.local_directory, remote.clone());
        let coordinator = Coordinator::new(
            processor,
            remote.clone(),
            Arc::clone(&local),
            Arc::clone(&status),
            Arc::clone(&health),
        );
        Self {
            router: ErrorRouter::new(Arc::clone(&health)),
            monitor: Monitor::new(status, health),
            state: watch::Sender::new(PollState::Idle),
            recovered: OnceCell::new(),
            options,
            pool,
            remote,
            local,
            synchronizer,
            coordinator,
        }
    }

    pub fn options(&self) -> &PollerOptions {
        &self.options
    }

    /// Read-only access to outcomes and health.
    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    /// Follow the phase of the current cycle.
    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Let a retained (rolled-back) local file be dispatched again on the
    /// next cycle. Returns `false` if `name` was not being held back.
    pub fn requeue(&self, name: &str) -> bool {
        self.local.reset(&self.options.local_directory.join(name))
    }

    /// Run a single cycle.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        self.cycle(&CancellationToken::new()).await
    }

    /// Poll until `shutdown` is cancelled or a fatal error occurs.
    ///
    /// The first cycle starts immediately; the first cycle of a poller also
    /// cleans up after a run that was interrupted mid-transfer. A failed
    /// cycle is logged and routed, then the loop carries on after the usual
    /// delay. Cancellation is honoured between units of work; the unit being
    /// processed always resolves first. The pool is closed before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            remote = %self.options.remote_directory.display(),
            local = %self.options.local_directory.display(),
            delay = ?self.options.delay,
            "Poller started"
        );
        let outcome = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }
            match self.cycle(&shutdown).await {
                Ok(report) => tracing::debug!(?report, "Cycle complete"),
                Err(err) if err.is_fatal() => {
                    self.router.route(&err);
                    break Err(err);
                },
                Err(err) => self.router.route(&err),
            }
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                () = tokio::time::sleep(self.options.delay) => {},
            }
        };
        self.pool.close().await;
        tracing::info!("Poller stopped");
        outcome
    }

    async fn cycle(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        let result = self.cycle_inner(shutdown).await;
        self.state.send_replace(PollState::Idle);
        result
    }

    async fn cycle_inner(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        // Before anything is selected, so no transfer of this process is in flight.
        self.recovered.get_or_try_init(|| self.recover()).await?;
        let mut report = CycleReport::default();
        let directory = &self.options.remote_directory;

        self.state.send_replace(PollState::Listing);
        let listing = self.list().await?;
        report.listed = listing.len();

        self.state.send_replace(PollState::Filtering);
        report.pruned = self.remote.prune(directory, &listing).await?;
        let selected = self.remote.filter(&listing, self.options.max_fetch_size).await?;
        report.selected = selected.len();

        self.state.send_replace(PollState::Transferring);
        let synced = self.synchronizer.sync(&selected).await?;
        report.fetched = synced.fetched.len();
        report.present = synced.present.len();
        report.failed = synced.failed.len();
        for (_, err) in &synced.failed {
            self.router.route(err);
        }
        let mut listed: HashMap<PathBuf, RemoteFileRef> = synced
            .fetched
            .into_iter()
            .chain(synced.present)
            .map(|unit| (unit.local.path, unit.remote))
            .collect();

        self.state.send_replace(PollState::Dispatching);
        for file in local::scan(&self.options.local_directory).await? {
            if report.resolutions.len() >= self.options.max_messages_per_poll {
                break;
            }
            if shutdown.is_cancelled() {
                tracing::info!("Shutdown requested; leaving remaining files for later");
                break;
            }
            if !self.local.admit(&file.path) {
                continue;
            }
            // A concurrent cycle may have committed (and deleted) it since the scan.
            let Ok(file) = LocalFile::stat(&file.path).await else {
                self.local.remove(&file.path);
                continue;
            };
            let name = file.name.clone();
            // Copies left from earlier cycles have no listing entry at hand.
            let remote = listed.remove(&file.path).unwrap_or_else(|| file.origin(directory));
            let unit = WorkUnit { remote, local: file };
            let resolution = self.coordinator.execute(unit).await?;
            report.resolutions.push((name, resolution));
        }
        Ok(report)
    }

    /// Undo what an interrupted run left half done. Staged partial copies are
    /// deleted, and in-flight markers whose file never reached the local root
    /// are cleared so the next listing selects those files again.
    async fn recover(&self) -> Result<()> {
        let staging = self.options.local_directory.join(STAGING_DIR);
        match fs::remove_dir_all(&staging).await {
            Ok(()) => tracing::info!(path = %staging.display(), "Removed partial transfers"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::LocalStorage(staging)),
        }
        let mut reclaimed = 0;
        for marker in self.remote.in_flight(&self.options.remote_directory).await? {
            let copy = Path::new(&marker.key).file_name().map(|name| self.options.local_directory.join(name));
            let present = match &copy {
                Some(path) => fs::try_exists(path).await.or_raise(|| ErrorKind::LocalStorage(path.clone()))?,
                None => false,
            };
            if !present && self.remote.forget(&marker.key).await? {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, "Cleared markers of transfers that never completed");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RemoteFileRef>> {
        let directory = &self.options.remote_directory;
        let mut connection = self.pool.acquire().await.map_err(|err| from_transfer(err, || ErrorKind::Connection))?;
        let listed = connection.list(directory).await;
        match listed {
            Ok(listing) => Ok(listing),
            Err(err) => {
                // The session may be wedged; don't hand it out again.
                connection.discard();
                Err(err).or_raise(|| ErrorKind::Listing(directory.clone()))
            },
        }
    }
}
