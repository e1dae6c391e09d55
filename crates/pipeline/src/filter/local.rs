use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Accept-once filter over local paths.
///
/// A path is admitted once and stays accepted until it is removed (after a
/// commit) or explicitly reset (operator requeue). A rolled-back file is
/// therefore not dispatched again on its own.
#[derive(Debug, Default)]
pub struct LocalFilter {
    seen: Mutex<HashSet<PathBuf>>,
}
impl LocalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `path` is offered.
    pub fn admit(&self, path: &Path) -> bool {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_path_buf())
    }

    /// Forget `path` after its unit committed.
    pub fn remove(&self, path: &Path) -> bool {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).remove(path)
    }

    /// Forget `path` so that a retained copy is dispatched again.
    pub fn reset(&self, path: &Path) -> bool {
        let reset = self.remove(path);
        if reset {
            tracing::info!(path = %path.display(), "Local file requeued");
        }
        reset
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_each_path_once() {
        let filter = LocalFilter::new();
        assert!(filter.admit(Path::new("/local/a.txt")));
        assert!(!filter.admit(Path::new("/local/a.txt")));
        assert!(filter.admit(Path::new("/local/b.txt")));
    }

    #[test]
    fn test_remove_readmits() {
        let filter = LocalFilter::new();
        filter.admit(Path::new("/local/a.txt"));
        assert!(filter.remove(Path::new("/local/a.txt")));
        assert!(!filter.contains(Path::new("/local/a.txt")));
        assert!(filter.admit(Path::new("/local/a.txt")));
    }

    #[test]
    fn test_reset_of_unknown_path_is_a_no_op() {
        let filter = LocalFilter::new();
        assert!(!filter.reset(Path::new("/local/never.txt")));
    }
}
