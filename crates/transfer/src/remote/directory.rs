//! Directory-backed remote.
//!
//! Treats a directory on this machine (a network mount, a shared volume, a
//! test fixture) as the remote origin. Listing and opening go through
//! `tokio::fs`; nothing is ever written to the directory.

use crate::error::{ErrorKind, Result};
use crate::remote::{BoxSyncRead, Connection, Connector};
use crate::{RemoteFileRef, validate_directory, validate_name};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Connector for a locally reachable directory tree.
///
/// # Examples
///
/// ```no_run
/// use ferry_transfer::remote::DirectoryConnector;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = DirectoryConnector::new("inbox", "/mnt/partner-share")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryConnector {
    name: String,
    root: PathBuf,
}
impl DirectoryConnector {
    /// Create a connector rooted at an absolute directory.
    ///
    /// The directory does not have to exist yet; connections will fail their
    /// ping until it does.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut connection = DirectoryConnection { root: self.root.clone() };
        connection.ping().await?;
        tracing::debug!(connector = %self.name, root = %self.root.display(), "Opened directory connection");
        Ok(Box::new(connection))
    }
}

struct DirectoryConnection {
    root: PathBuf,
}
impl DirectoryConnection {
    fn resolve(&self, directory: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_directory(directory)?))
    }
}

#[async_trait]
impl Connection for DirectoryConnection {
    async fn ping(&mut self) -> Result<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| ErrorKind::from_io(e, &self.root))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(self.root.clone()));
        }
        Ok(())
    }

    async fn list(&mut self, directory: &Path) -> Result<Vec<RemoteFileRef>> {
        let absolute = self.resolve(directory)?;
        let mut entries = fs::read_dir(&absolute).await.map_err(|e| ErrorKind::from_io(e, directory))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, directory))? {
            let metadata = entry.metadata().await.map_err(|e| ErrorKind::from_io(e, &entry.path()))?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::warn!(path = %entry.path().display(), "Skipping remote file with non UTF-8 name");
                continue;
            };
            if validate_name(name).is_err() {
                tracing::warn!(name, "Skipping remote file with invalid name");
                continue;
            }
            let modified = metadata.modified().map_err(ErrorKind::Io)?;
            files.push(RemoteFileRef::new(directory, name, metadata.len(), modified.into()));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn open(&mut self, file: &RemoteFileRef) -> Result<BoxSyncRead> {
        let name = validate_name(&file.name)?;
        let absolute = self.resolve(&file.directory)?.join(name);
        let handle = fs::File::open(&absolute).await.map_err(|e| ErrorKind::from_io(e, &file.path()))?;
        let handle = handle.into_std().await;
        // A directory can be opened on some platforms; reading it is an error we want now.
        let metadata = handle.metadata().or_raise(|| ErrorKind::NotFound(file.path()))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(file.path()));
        }
        Ok(Box::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(DirectoryConnector::new("name", temp_dir.path()).is_ok());
        assert!(DirectoryConnector::new("name", "relative/path").is_err());
    }

    #[tokio::test]
    async fn test_connect_fails_for_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connector = DirectoryConnector::new("name", temp_dir.path().join("missing")).unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_non_recursive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let upload = temp_dir.path().join("upload");
        std::fs::create_dir_all(upload.join("nested")).unwrap();
        std::fs::write(upload.join("b.txt"), b"2").unwrap();
        std::fs::write(upload.join("a.txt"), b"1").unwrap();
        std::fs::write(upload.join("nested/c.txt"), b"3").unwrap();

        let connector = DirectoryConnector::new("name", temp_dir.path()).unwrap();
        let mut connection = connector.connect().await.unwrap();
        let files = connection.list(Path::new("/upload")).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(files[0].directory, Path::new("/upload"));
        assert_eq!(files[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connector = DirectoryConnector::new("name", temp_dir.path()).unwrap();
        let mut connection = connector.connect().await.unwrap();
        let err = connection.list(Path::new("nope")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_reads_without_modifying() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("numbers.txt"), b"12345\n5\n").unwrap();
        let connector = DirectoryConnector::new("name", temp_dir.path()).unwrap();
        let mut connection = connector.connect().await.unwrap();
        let files = connection.list(Path::new("/")).await.unwrap();
        let mut reader = connection.open(&files[0]).await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "12345\n5\n");
        assert!(temp_dir.path().join("numbers.txt").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_traversal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connector = DirectoryConnector::new("name", temp_dir.path()).unwrap();
        let mut connection = connector.connect().await.unwrap();
        let sneaky = RemoteFileRef::new("/", "../passwd", 0, time::UtcDateTime::now());
        assert!(connection.open(&sneaky).await.is_err());
    }
}
