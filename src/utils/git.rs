//! Git utilities

use std::path::Path;

use crate::error::Result;

/// Commit SHA of HEAD for the repository containing `path`.
///
/// Returns `None` outside a repository or on an unborn branch.
pub fn head_commit(path: impl AsRef<Path>) -> Result<Option<String>> {
    resolve_revision(path, "HEAD")
}

/// Resolve `rev` (`HEAD`, a branch, a short SHA) to a full commit SHA.
///
/// Returns `None` outside a repository, on an unborn branch, or when the
/// revision does not exist.
pub fn resolve_revision(path: impl AsRef<Path>, rev: &str) -> Result<Option<String>> {
    let repo = match git2::Repository::discover(path.as_ref()) {
        Ok(repo) => repo,
        Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let object = match repo.revparse_single(rev) {
        Ok(object) => object,
        Err(err)
            if matches!(
                err.code(),
                git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
            ) =>
        {
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let commit = object.peel_to_commit()?;
    Ok(Some(commit.id().to_string()))
}
