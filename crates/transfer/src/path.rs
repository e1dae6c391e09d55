//! Path validation and security utilities.
//!
//! Remote listings are untrusted input: a listed name ends up joined onto the
//! local root, so anything that could climb out of it must be rejected here.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a relative path for security and correctness.
/// Ensures that paths don't escape the root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ferry_transfer::validate_path;
/// assert!(validate_path("upload/numbers.txt").is_ok());
/// assert!(validate_path("a/../numbers.txt").is_ok()); // (never leaves the root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("/upload/./in//").unwrap(), Path::new("upload/in"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let normalized = validate_directory(&path)?;
    if normalized.as_os_str().is_empty() {
        exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
    }
    Ok(normalized)
}

/// Like [`validate`], but an empty result (the root itself) is accepted.
///
/// Remote directories are commonly configured as `/` or `.`, which both
/// normalize to the connector's root.
pub fn validate_directory(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Validates a bare file name taken from a remote listing.
///
/// The name must be exactly one normal path component: no separators, no
/// `.`/`..`, no null bytes.
pub fn validate_name(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(s)), None) if s == name && !name.contains('\0') => Ok(name),
        _ => exn::bail!(ErrorKind::InvalidPath(PathBuf::from(name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("upload/numbers.txt")).unwrap(), Path::new("upload/numbers.txt"));
        assert_eq!(validate(Path::new("simple.txt")).unwrap(), Path::new("simple.txt"));
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("/upload/")).unwrap(), Path::new("upload"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_directory_root_is_accepted() {
        assert_eq!(validate_directory("/").unwrap(), PathBuf::new());
        assert_eq!(validate_directory(".").unwrap(), PathBuf::new());
        assert_eq!(validate_directory("/upload").unwrap(), Path::new("upload"));
        assert!(validate_directory("/..").is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(validate_name("numbers1.txt").unwrap(), "numbers1.txt");
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b.txt").is_err());
        assert!(validate_name("/abs.txt").is_err());
        assert!(validate_name("trailing/").is_err());
        assert!(validate_name("nul\0.txt").is_err());
    }
}
