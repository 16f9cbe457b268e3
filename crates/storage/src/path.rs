//! Storage paths.
//!
//! Backends are handed paths relative to their root: an upload such as
//! `2024/01/photo.jpg`, a backup file, or an object key. Whatever the source
//! (metadata written by some plugin, a user-supplied prefix) the path is
//! normalised here before any backend touches it.

use crate::error::{ErrorKind, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Normalise a relative storage path.
///
/// `.` segments, empty segments and a leading slash are dropped, and `..` is
/// resolved as long as it stays below the root. Paths that end up empty or
/// above the root, contain a NUL byte or carry a Windows prefix are
/// [`InvalidPath`](ErrorKind::InvalidPath).
///
/// ```
/// use offload_storage::validate_path;
/// use std::path::Path;
///
/// assert_eq!(validate_path("/2024//01/./photo.jpg").unwrap(), Path::new("2024/01/photo.jpg"));
/// assert_eq!(validate_path("2023/../2024/01/photo.jpg").unwrap(), Path::new("2024/01/photo.jpg"));
/// assert!(validate_path("../wp-config.php").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut segments: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir => {},
            Component::ParentDir => {
                segments.pop().ok_or_else(invalid)?;
            },
            // NUL truncates the path once it reaches a syscall.
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(segment) => segments.push(segment),
            Component::Prefix(_) => exn::bail!(invalid()),
        }
    }
    if segments.is_empty() {
        exn::bail!(invalid());
    }
    Ok(segments.into_iter().collect())
}

/// The object key for a storage path: normalised, UTF-8 and `/` separated on
/// every platform.
pub fn to_key(path: impl AsRef<Path>) -> Result<String> {
    let path = validate(path)?;
    let segments = path.iter().map(OsStr::to_str).collect::<Option<Vec<_>>>();
    match segments {
        Some(segments) => Ok(segments.join("/")),
        None => exn::bail!(ErrorKind::InvalidPath(path)),
    }
}
