//! Filesystem utilities.
//!
//! Helper functions for file operations.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{ArchiveError, Result};

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write `bytes` to `path` via a sibling temp file and rename.
///
/// Readers never observe a partially written file. A replaced file keeps its
/// permissions; new files get `0644` on unix.
pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    match std::fs::metadata(path) {
        Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => default_permissions(tmp.as_file())?,
        Err(err) => return Err(err.into()),
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| ArchiveError::Io(err.error))?;
    Ok(())
}

#[cfg(unix)]
fn default_permissions(file: &std::fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn default_permissions(_file: &std::fs::File) -> Result<()> {
    Ok(())
}

/// Reject absolute paths and any `..`/root/prefix component.
///
/// Returns the normalized relative path (with `.` components dropped).
pub fn safe_relative_path(raw: &str) -> Result<PathBuf> {
    if raw.trim().is_empty() {
        return Err(ArchiveError::UnsafePath("empty path".to_string()));
    }
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(ArchiveError::UnsafePath(raw.to_string()));
    }
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(raw.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ArchiveError::UnsafePath(raw.to_string()));
    }
    Ok(clean)
}

/// Apply a unix permission mode. No-op elsewhere.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Forward-slash form of a relative path, as stored in plans and manifests.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
