//! Copying selected remote files into the local root.

use crate::error::{Error, ErrorKind, Result, from_transfer};
use crate::filter::RemoteFilter;
use crate::local::{LocalFile, STAGING_DIR};
use crate::transaction::WorkUnit;
use exn::ResultExt;
use ferry_transfer::remote::BoxSyncRead;
use ferry_transfer::{RemoteFileRef, SessionPool, validate_name};
use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::task::spawn_blocking;

/// What happened to each selected file, in selection order.
///
/// Files that reached the local root are paired with the listing entry they
/// were selected from, so the ledger settles exactly what was listed.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Copied in this pass.
    pub fetched: Vec<WorkUnit>,
    /// Already in the local root (e.g. retained after a rollback); not copied.
    pub present: Vec<WorkUnit>,
    /// Not copied; their remote markers have been cleared for a retry.
    pub failed: Vec<(RemoteFileRef, Error)>,
}

enum Transferred {
    Fetched(LocalFile),
    Present(LocalFile),
}

/// Copies remote files into a local directory using pooled connections.
///
/// The remote original is only ever read. Bytes land in the
/// [staging directory](STAGING_DIR) first and are renamed into place once
/// complete, with the remote modification time preserved.
#[derive(Clone)]
pub struct Synchronizer {
    pool: SessionPool,
    local_root: PathBuf,
    filter: RemoteFilter,
}
impl Synchronizer {
    pub fn new(pool: SessionPool, local_root: impl Into<PathBuf>, filter: RemoteFilter) -> Self {
        Self {
            pool,
            local_root: local_root.into(),
            filter,
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Copy every file in `files`, at most pool-size at a time.
    ///
    /// A failing file does not stop the others. Only a local root that cannot
    /// be created fails the whole pass, in which case every marker is cleared.
    pub async fn sync(&self, files: &[RemoteFileRef]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if files.is_empty() {
            return Ok(report);
        }
        let staging = self.local_root.join(STAGING_DIR);
        if let Err(err) = fs::create_dir_all(&staging).await {
            for file in files {
                self.release(file).await;
            }
            return Err(err).or_raise(|| ErrorKind::LocalStorage(staging));
        }

        let concurrency = self.pool.options().size.max(1);
        let transfers: Vec<_> = files.iter().map(|file| self.transfer(file)).collect();
        let results: Vec<Result<Transferred>> = stream::iter(transfers).buffered(concurrency).collect().await;

        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(Transferred::Fetched(local)) => report.fetched.push(WorkUnit {
                    remote: file.clone(),
                    local,
                }),
                Ok(Transferred::Present(local)) => report.present.push(WorkUnit {
                    remote: file.clone(),
                    local,
                }),
                Err(err) => {
                    self.release(file).await;
                    report.failed.push((file.clone(), err));
                },
            }
        }
        tracing::debug!(
            fetched = report.fetched.len(),
            present = report.present.len(),
            failed = report.failed.len(),
            "Synchronized remote files"
        );
        Ok(report)
    }

    // Clear the marker of a file that did not make it, so it is retried.
    async fn release(&self, file: &RemoteFileRef) {
        if let Err(err) = self.filter.clear(file).await {
            tracing::error!(file = %file, error = ?err, "Cannot clear marker of failed transfer");
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(file = %file))]
    async fn transfer(&self, file: &RemoteFileRef) -> Result<Transferred> {
        let failed = || ErrorKind::Transfer(file.key());
        validate_name(&file.name).or_raise(failed)?;
        if file.name == STAGING_DIR {
            exn::bail!(failed());
        }
        let target = self.local_root.join(&file.name);
        if fs::try_exists(&target).await.or_raise(failed)? {
            tracing::debug!(path = %target.display(), "Local copy already present");
            return Ok(Transferred::Present(LocalFile::stat(target).await.or_raise(failed)?));
        }

        let mut connection = self.pool.acquire().await.map_err(|err| from_transfer(err, failed))?;
        let reader = connection.open(file).await.or_raise(failed)?;
        let partial = self.local_root.join(STAGING_DIR).join(&file.name);
        let modified = SystemTime::from(file.modified);
        let written = {
            let (partial, target) = (partial.clone(), target.clone());
            spawn_blocking(move || write_local(reader, &partial, &target, modified)).await.or_raise(failed)?
        };
        // The read stream may borrow the session, so hand the connection back
        // only once the copy is finished.
        drop(connection);
        if let Err(err) = written {
            _ = fs::remove_file(&partial).await;
            return Err(err).or_raise(failed);
        }

        tracing::info!(path = %target.display(), size = file.size, "Fetched remote file");
        Ok(Transferred::Fetched(LocalFile::stat(target).await.or_raise(failed)?))
    }
}

fn write_local(mut reader: BoxSyncRead, partial: &Path, target: &Path, modified: SystemTime) -> std::io::Result<()> {
    let mut out = std::fs::File::create(partial)?;
    std::io::copy(&mut reader, &mut out)?;
    out.set_modified(modified)?;
    out.sync_all()?;
    drop(out);
    std::fs::rename(partial, target)
}
