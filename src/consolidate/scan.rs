//! Working-tree walk shared by both planners.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glob::Pattern;
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};
use crate::utils::fs::to_slash;

/// A regular file found under the scan root.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Forward-slash path relative to the scan root.
    pub rel: String,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl ScannedFile {
    /// Whole days since last modification, saturating at zero for future mtimes.
    #[must_use]
    pub fn age_days(&self, now: SystemTime) -> u64 {
        now.duration_since(self.modified)
            .map(|age| age.as_secs() / 86_400)
            .unwrap_or(0)
    }
}

/// Compiled exclude globs, matched against root-relative slash paths.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn new(globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|err| {
                    ArchiveError::Validation(format!("invalid exclude pattern {raw:?}: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_excluded(&self, rel: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(rel))
    }

    /// True when every file below `rel_dir` would be excluded.
    fn prunes_dir(&self, rel_dir: &str) -> bool {
        // A probe child lets `dir/**` style patterns cut the walk short.
        self.is_excluded(rel_dir) || self.is_excluded(&format!("{rel_dir}/probe"))
    }
}

/// Every regular file under `root` not matched by `excludes`, sorted by path.
///
/// Symlinks are not followed.
pub fn scan_tree(root: &Path, excludes: &ExcludeSet) -> Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        return Err(ArchiveError::Validation(format!(
            "scan root is not a directory: {}",
            root.display()
        )));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map(to_slash)
                .unwrap_or_default();
            !excludes.prunes_dir(&rel)
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(to_slash)
            .unwrap_or_else(|_| to_slash(entry.path()));
        if excludes.is_excluded(&rel) {
            continue;
        }
        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        files.push(ScannedFile {
            path: entry.path().to_path_buf(),
            rel,
            size_bytes: metadata.len(),
            modified: metadata.modified()?,
        });
    }
    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(files)
}
