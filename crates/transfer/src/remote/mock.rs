//! In-memory remote for testing.

use crate::error::{ErrorKind, Result};
use crate::remote::{BoxSyncRead, Connection, Connector};
use crate::{RemoteFileRef, validate_directory, validate_path};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use time::UtcDateTime;
use tokio::sync::RwLock;

struct MockFile {
    modified: UtcDateTime,
    data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    files: RwLock<BTreeMap<PathBuf, MockFile>>,
    /// Connections opened under an older generation fail their ping.
    generation: AtomicU64,
    refuse: AtomicBool,
    opened: AtomicUsize,
    live: AtomicUsize,
    fetches: Mutex<HashMap<PathBuf, usize>>,
    failing: Mutex<HashSet<PathBuf>>,
}

/// In-memory remote origin for testing.
///
/// Files are stored in a `BTreeMap` behind a [`RwLock`], keyed by their
/// validated path, so listings come out sorted for free. The mock is cheap to
/// clone: every clone (and every connection it hands out) shares the same
/// state, which lets a test keep one handle for assertions while the pool
/// owns another.
///
/// Besides storing files, the mock counts connections and fetches and can be
/// told to misbehave, which is what the pipeline's delivery tests need.
///
/// # Examples
///
/// ```
/// use ferry_transfer::remote::{Connector, MockRemote};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::with_files([("upload/numbers1.txt", "12345\n5\n")]);
/// let mut connection = remote.connect().await?;
/// let files = connection.list(Path::new("/upload")).await?;
/// assert_eq!(files[0].name, "numbers1.txt");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockRemote {
    name: String,
    state: Arc<MockState>,
}

impl MockRemote {
    /// Create a mock remote pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let modified = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockRemote::with_files: invalid path {}", path.display());
            };
            map.insert(validated, MockFile { modified, data: data.into() });
        }
        let state = MockState {
            files: RwLock::new(map),
            ..MockState::default()
        };
        Self {
            name: "mock".to_string(),
            state: Arc::new(state),
        }
    }

    /// Change the name of the mock remote.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add or replace a file, stamped with the current time.
    pub async fn put(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Result<()> {
        self.put_with_modified(path, data, UtcDateTime::now()).await
    }

    /// Add or replace a file with an explicit modification time.
    pub async fn put_with_modified(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        modified: UtcDateTime,
    ) -> Result<()> {
        let path = validate_path(path)?;
        self.state.files.write().await.insert(path, MockFile { modified, data: data.into() });
        Ok(())
    }

    /// Remove a file; returns whether it existed.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.state.files.write().await.remove(&path).is_some())
    }

    /// Whether a file exists at `path`.
    pub async fn contains(&self, path: impl AsRef<Path>) -> bool {
        let Ok(path) = validate_path(path) else {
            return false;
        };
        self.state.files.read().await.contains_key(&path)
    }

    /// How many times the file at `path` has been opened for transfer.
    pub fn fetch_count(&self, path: impl AsRef<Path>) -> usize {
        let Ok(path) = validate_path(path) else {
            return 0;
        };
        self.state.fetches.lock().unwrap_or_else(PoisonError::into_inner).get(&path).copied().unwrap_or(0)
    }

    /// Total number of connections ever opened.
    pub fn connections_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of connections currently alive (opened and not yet dropped).
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Make every transfer of `path` fail until [`restore`](Self::restore) is called.
    pub fn fail_transfers(&self, path: impl AsRef<Path>) {
        if let Ok(path) = validate_path(path) {
            self.state.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(path);
        }
    }

    /// Undo [`fail_transfers`](Self::fail_transfers).
    pub fn restore(&self, path: impl AsRef<Path>) {
        if let Ok(path) = validate_path(path) {
            self.state.failing.lock().unwrap_or_else(PoisonError::into_inner).remove(&path);
        }
    }

    /// Make every connection opened so far fail its next liveness ping.
    pub fn break_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }
}
impl Default for MockRemote {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl Connector for MockRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.state.refuse.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network(format!("{}: connection refused", self.name)));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            generation: self.state.generation.load(Ordering::SeqCst),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    generation: u64,
    state: Arc<MockState>,
}
impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&mut self) -> Result<()> {
        if self.generation != self.state.generation.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network("stale mock connection".to_string()));
        }
        Ok(())
    }

    async fn list(&mut self, directory: &Path) -> Result<Vec<RemoteFileRef>> {
        let normalized = validate_directory(directory)?;
        let guard = self.state.files.read().await;
        let files = guard
            .iter()
            .filter(|(path, _)| path.parent() == Some(normalized.as_path()))
            .filter_map(|(path, file)| {
                let name = path.file_name()?.to_str()?;
                Some(RemoteFileRef::new(directory, name, file.data.len() as u64, file.modified))
            })
            .collect();
        Ok(files)
    }

    async fn open(&mut self, file: &RemoteFileRef) -> Result<BoxSyncRead> {
        let path = validate_directory(&file.directory)?.join(crate::validate_name(&file.name)?);
        *self.state.fetches.lock().unwrap_or_else(PoisonError::into_inner).entry(path.clone()).or_default() += 1;
        if self.state.failing.lock().unwrap_or_else(PoisonError::into_inner).contains(&path) {
            exn::bail!(ErrorKind::Network(format!("transfer of {} interrupted", path.display())));
        }
        let guard = self.state.files.read().await;
        let data = guard.get(&path).map(|f| f.data.clone()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(Box::new(Cursor::new(data)))
    }
}
