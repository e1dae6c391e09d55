//! Local copies of remote files.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_transfer::RemoteFileRef;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs;

/// Directory inside the local root where copies are written before being
/// moved into place. Any remote file name can be staged in it without
/// colliding with a finished copy.
pub const STAGING_DIR: &str = ".ferry-partial";

/// A file in the local root, copied from the remote directory.
///
/// The modification time is the remote one, preserved at whole-second
/// precision, so [`origin`](Self::origin) can rebuild the dedup identity of
/// the remote file without asking the remote again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: UtcDateTime,
}
impl LocalFile {
    /// Stat a regular file in the local root.
    pub async fn stat(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).await.or_raise(|| ErrorKind::LocalStorage(path.clone()))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::LocalStorage(path));
        }
        let modified = metadata.modified().or_raise(|| ErrorKind::LocalStorage(path.clone()))?;
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => exn::bail!(ErrorKind::LocalStorage(path)),
        };
        Ok(Self {
            name,
            size: metadata.len(),
            modified: UtcDateTime::from(modified),
            path,
        })
    }

    /// The remote file this copy was made from, assuming it came from
    /// `remote_directory`.
    pub fn origin(&self, remote_directory: &Path) -> RemoteFileRef {
        RemoteFileRef::new(remote_directory, &self.name, self.size, self.modified)
    }
}

/// List the complete files in `root`, sorted by name.
///
/// A missing root is treated as empty. Sub-directories, including the
/// [staging directory](STAGING_DIR), are skipped.
pub async fn scan(root: &Path) -> Result<Vec<LocalFile>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).or_raise(|| ErrorKind::LocalStorage(root.to_path_buf())),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::LocalStorage(root.to_path_buf()))? {
        let path = entry.path();
        let file_type = entry.file_type().await.or_raise(|| ErrorKind::LocalStorage(path.clone()))?;
        if !file_type.is_file() {
            continue;
        }
        match LocalFile::stat(path).await {
            Ok(file) => files.push(file),
            // Removed between listing and stat, or not valid UTF-8.
            Err(err) => tracing::debug!(error = ?err, "Skipping local entry"),
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
