//! Verify and unpack release bundles.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

use super::manifest::{LOCKED_MANIFEST_NAME, SHA256_KEY, canonical_manifest_hash, parse_manifest};
use super::pack::{RELEASE_REPO, TOOL};
use crate::error::{ArchiveError, Result};
use crate::evidence::EvidenceLog;
use crate::utils::fs::{ensure_dir, safe_relative_path, set_mode, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub ok: bool,
    /// Hash recorded in the embedded manifest.
    pub sha256_manifest: Option<String>,
    /// Hash recomputed from the embedded manifest.
    pub computed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackReport {
    pub dest: PathBuf,
    pub files: usize,
    pub symlinks: usize,
    pub scripts_run: usize,
    pub scripts_skipped: usize,
}

fn open_archive(bundle: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(bundle).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(format!("bundle not found: {}", bundle.display()))
        } else {
            ArchiveError::Io(err)
        }
    })?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn read_embedded_manifest(bundle: &Path) -> Result<Vec<u8>> {
    let mut archive = open_archive(bundle)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()? == Path::new(LOCKED_MANIFEST_NAME) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return Ok(bytes);
        }
    }
    Err(ArchiveError::Integrity(format!(
        "{LOCKED_MANIFEST_NAME} missing from {}",
        bundle.display()
    )))
}

fn check_manifest(bundle: &Path) -> Result<VerifyReport> {
    let bytes = read_embedded_manifest(bundle)?;
    let locked: Value = serde_json::from_slice(&bytes)
        .map_err(|err| ArchiveError::Integrity(format!("embedded manifest unreadable: {err}")))?;
    let recorded = locked
        .get("checks")
        .and_then(|checks| checks.get(SHA256_KEY))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let computed = canonical_manifest_hash(&locked)?;
    Ok(VerifyReport {
        ok: recorded.as_deref() == Some(computed.as_str()),
        sha256_manifest: recorded,
        computed,
    })
}

/// Recompute the embedded manifest's hash and compare it with the recorded one.
///
/// A mismatch is reported as `ok: false`; a bundle without an embedded
/// manifest is an [`ArchiveError::Integrity`] error.
pub fn verify_bundle(evidence: &EvidenceLog, actor: &str, bundle: &Path) -> Result<VerifyReport> {
    let report = check_manifest(bundle)?;
    evidence.evidence_append(
        "VERIFY",
        actor,
        TOOL,
        RELEASE_REPO,
        json!({
            "bundle": bundle.display().to_string(),
            "ok": report.ok,
            "sha256_manifest": report.sha256_manifest,
        }),
    )?;
    if report.ok {
        info!(bundle = %bundle.display(), "bundle verified");
    } else {
        warn!(
            bundle = %bundle.display(),
            recorded = ?report.sha256_manifest,
            computed = %report.computed,
            "manifest hash mismatch"
        );
    }
    Ok(report)
}

/// Whether `target`, resolved from the directory holding `member`, leaves the root.
fn link_escapes(member: &Path, target: &Path) -> bool {
    let mut depth = member
        .parent()
        .map_or(0, |parent| {
            parent
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        });
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

fn unsafe_member(name: &str, detail: &str) -> ArchiveError {
    ArchiveError::UnsafePath(format!("{name}: {detail}"))
}

/// Extract every member of `archive` under `dest`, refusing anything that could
/// write outside it. Returns (regular files, symlinks) extracted.
fn safe_extract<R: Read>(archive: &mut Archive<R>, dest: &Path) -> Result<(usize, usize)> {
    let mut files = 0;
    let mut symlinks = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_string_lossy().into_owned();
        let rel = safe_relative_path(&raw)?;
        match entry.header().entry_type() {
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                return Err(unsafe_member(&raw, "device or fifo member"));
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| unsafe_member(&raw, "symlink without target"))?
                    .into_owned();
                if target.is_absolute() {
                    return Err(unsafe_member(&raw, "absolute symlink target"));
                }
                if link_escapes(&rel, &target) {
                    return Err(unsafe_member(&raw, "symlink escapes destination"));
                }
                symlinks += 1;
            }
            EntryType::Link => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| unsafe_member(&raw, "hardlink without target"))?;
                safe_relative_path(&target.to_string_lossy())?;
            }
            EntryType::Regular | EntryType::Continuous => files += 1,
            _ => {}
        }
        debug!(member = %raw, "extracting");
        if !entry.unpack_in(dest)? {
            return Err(unsafe_member(&raw, "refused by extractor"));
        }
    }
    Ok((files, symlinks))
}

fn render_template(text: &str, vars: &BTreeMap<String, Value>) -> String {
    vars.iter().fold(text.to_string(), |acc, (key, value)| {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        acc.replace(&format!("{{{{{key}}}}}"), &replacement)
    })
}

/// Verify, extract and finish a bundle into `dest`.
///
/// After extraction, `template_vars` are substituted and declared modes applied.
/// `post_unpack_commands` only run when `allow_scripts` is set.
pub fn unpack_bundle(
    evidence: &EvidenceLog,
    actor: &str,
    bundle: &Path,
    dest: &Path,
    allow_scripts: bool,
) -> Result<UnpackReport> {
    let verified = check_manifest(bundle)?;
    if !verified.ok {
        return Err(ArchiveError::Integrity(format!(
            "manifest hash mismatch in {}: recorded {}, computed {}",
            bundle.display(),
            verified.sha256_manifest.as_deref().unwrap_or("<none>"),
            verified.computed
        )));
    }

    ensure_dir(dest)?;
    let mut archive = open_archive(bundle)?;
    let (files, symlinks) = safe_extract(&mut archive, dest)?;

    let manifest = parse_manifest(&std::fs::read_to_string(dest.join(LOCKED_MANIFEST_NAME))?)?;
    for component in &manifest.components {
        let path = dest.join(safe_relative_path(&component.dest_path)?);
        if let Some(vars) = component.template_vars.as_ref().filter(|vars| !vars.is_empty()) {
            let text = std::fs::read_to_string(&path).map_err(|err| {
                ArchiveError::Validation(format!(
                    "template_vars on non-text component {}: {err}",
                    component.dest_path
                ))
            })?;
            // Extraction already applied the declared mode, which may be read-only.
            write_atomic(&path, render_template(&text, vars).as_bytes())?;
        }
        set_mode(&path, component.mode_bits()?)?;
    }

    let mut scripts_run = 0;
    let mut scripts_skipped = 0;
    for command in &manifest.post_unpack_commands {
        if !allow_scripts {
            info!(command = %command, "post-unpack command skipped (scripts not allowed)");
            scripts_skipped += 1;
            continue;
        }
        info!(command = %command, dest = %dest.display(), "running post-unpack command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dest)
            .status()?;
        if !status.success() {
            return Err(ArchiveError::Script(format!("{command:?} exited with {status}")));
        }
        scripts_run += 1;
    }

    evidence.evidence_append(
        "UNPACK",
        actor,
        TOOL,
        RELEASE_REPO,
        json!({
            "bundle": bundle.display().to_string(),
            "dest": dest.display().to_string(),
            "release_id": manifest.release_id,
            "files": files,
            "symlinks": symlinks,
            "scripts_run": scripts_run,
            "scripts_skipped": scripts_skipped,
        }),
    )?;

    Ok(UnpackReport {
        dest: dest.to_path_buf(),
        files,
        symlinks,
        scripts_run,
        scripts_skipped,
    })
}
