//! Build a deterministic release bundle from archived tombstones.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use tar::{EntryType, Header};
use tracing::{info, warn};

use super::manifest::{LOCKED_MANIFEST_NAME, Manifest, lock_manifest, manifest_from_value};
use crate::archive::ArchiveService;
use crate::error::{ArchiveError, Result};
use crate::evidence::EvidenceLog;
use crate::storage::{NewReleaseComponent, NewReleaseMeta};
use crate::utils::fs::{ensure_dir, safe_relative_path, set_mode, to_slash, write_atomic};

pub(crate) const TOOL: &str = "release";
pub(crate) const RELEASE_REPO: &str = "_codex_";

/// Path of the sidecar lock file written next to `bundle`.
#[must_use]
pub fn lock_path_for(bundle: &Path) -> PathBuf {
    let mut name = bundle.as_os_str().to_os_string();
    name.push(".lock.json");
    PathBuf::from(name)
}

/// What `pack_release` produced.
#[derive(Debug, Clone)]
pub struct PackReport {
    pub bundle: PathBuf,
    pub lock_path: PathBuf,
    pub sha256_manifest: String,
    pub locked: Value,
}

enum Member {
    File { rel: String, bytes: Vec<u8>, mode: u32 },
    Symlink { rel: String, target: String },
}

impl Member {
    fn rel(&self) -> &str {
        match self {
            Self::File { rel, .. } | Self::Symlink { rel, .. } => rel,
        }
    }
}

/// Restore every component into `staging`, then write `out` plus its lock.
///
/// `staging` is emptied first. The bundle is byte-identical across runs for
/// the same manifest and archive contents: entries are sorted, and every
/// header carries mtime 0 and uid/gid 0.
pub fn pack_release(
    service: &ArchiveService,
    manifest_path: &Path,
    staging: &Path,
    out: &Path,
) -> Result<PackReport> {
    let raw = std::fs::read_to_string(manifest_path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(format!("manifest not found: {}", manifest_path.display()))
        } else {
            ArchiveError::Io(err)
        }
    })?;
    let value: Value = serde_json::from_str(&raw)?;
    let manifest = manifest_from_value(&value)?;

    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    ensure_dir(staging)?;

    let mut members = stage_components(service, &manifest, staging)?;
    stage_symlinks(&manifest, staging, &mut members)?;
    members.sort_by(|a, b| a.rel().cmp(b.rel()));

    let (locked, sha256_manifest) = lock_manifest(&value)?;
    let locked_bytes = serde_json::to_vec_pretty(&locked)?;
    write_atomic(staging.join(LOCKED_MANIFEST_NAME), &locked_bytes)?;

    let bundle_bytes = build_tarball(&members, &locked_bytes)?;
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    write_atomic(out, &bundle_bytes)?;
    let lock_path = lock_path_for(out);
    write_atomic(&lock_path, &locked_bytes)?;

    service.evidence().evidence_append(
        "PACK",
        &manifest.actor,
        TOOL,
        RELEASE_REPO,
        json!({
            "release_id": manifest.release_id,
            "version": manifest.version,
            "bundle": out.display().to_string(),
            "sha256_manifest": sha256_manifest,
            "components": manifest.components.len(),
            "symlinks": manifest.symlinks.len(),
        }),
    )?;
    info!(
        release_id = %manifest.release_id,
        bundle = %out.display(),
        sha256_manifest = %sha256_manifest,
        "release packed"
    );

    persist_release(service, &manifest, &locked);

    Ok(PackReport {
        bundle: out.to_path_buf(),
        lock_path,
        sha256_manifest,
        locked,
    })
}

fn stage_components(
    service: &ArchiveService,
    manifest: &Manifest,
    staging: &Path,
) -> Result<Vec<Member>> {
    let mut members = Vec::with_capacity(manifest.components.len());
    for component in &manifest.components {
        let rel = safe_relative_path(&component.dest_path)?;
        let mode = component.mode_bits()?;
        let restored = service.restore_as(&component.tombstone, &manifest.actor)?;
        let dest = staging.join(&rel);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        write_atomic(&dest, &restored.bytes)?;
        set_mode(&dest, mode)?;
        members.push(Member::File {
            rel: to_slash(&rel),
            bytes: restored.bytes,
            mode,
        });
    }
    Ok(members)
}

fn stage_symlinks(manifest: &Manifest, staging: &Path, members: &mut Vec<Member>) -> Result<()> {
    for link in &manifest.symlinks {
        let rel = safe_relative_path(&link.link_path)?;
        let path = staging.join(&rel);
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        #[cfg(unix)]
        {
            if path.symlink_metadata().is_ok() {
                std::fs::remove_file(&path)?;
            }
            std::os::unix::fs::symlink(&link.target, &path)?;
        }
        members.push(Member::Symlink {
            rel: to_slash(&rel),
            target: link.target.clone(),
        });
    }
    Ok(())
}

fn base_header(entry_type: EntryType, mode: u32, size: u64) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("")?;
    header.set_groupname("")?;
    header.set_mode(mode);
    header.set_size(size);
    Ok(header)
}

fn build_tarball(members: &[Member], locked_manifest: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    for member in members {
        match member {
            Member::File { rel, bytes, mode } => {
                let mut header = base_header(EntryType::Regular, *mode, bytes.len() as u64)?;
                builder.append_data(&mut header, rel, bytes.as_slice())?;
            }
            Member::Symlink { rel, target } => {
                let mut header = base_header(EntryType::Symlink, 0o777, 0)?;
                builder.append_link(&mut header, rel, target)?;
            }
        }
    }
    let mut header = base_header(EntryType::Regular, 0o644, locked_manifest.len() as u64)?;
    builder.append_data(&mut header, LOCKED_MANIFEST_NAME, locked_manifest)?;
    let tar_bytes = builder.into_inner()?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&tar_bytes)?;
    Ok(encoder.finish()?)
}

fn target_label(target: &Value) -> Option<String> {
    match target {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Record the release in the DAL. Failures are logged and recorded, never raised.
fn persist_release(service: &ArchiveService, manifest: &Manifest, locked: &Value) {
    let evidence = service.evidence();
    match try_persist(service, manifest, locked) {
        Ok((id, existing)) => record(
            evidence,
            "RELEASE_PERSIST",
            &manifest.actor,
            json!({
                "release_id": manifest.release_id,
                "release_meta_id": id,
                "existing": existing,
            }),
        ),
        Err(err) => {
            warn!(release_id = %manifest.release_id, error = %err, "release metadata not persisted");
            record(
                evidence,
                "RELEASE_PERSIST_FAIL",
                &manifest.actor,
                json!({
                    "release_id": manifest.release_id,
                    "error": err.to_string(),
                }),
            );
        }
    }
}

fn try_persist(
    service: &ArchiveService,
    manifest: &Manifest,
    locked: &Value,
) -> Result<(i64, bool)> {
    let dal = service.dal();
    if let Some(existing) = dal.get_release_meta_by_release_id(&manifest.release_id)? {
        return Ok((existing.id, true));
    }
    let row = dal.create_release_meta(&NewReleaseMeta {
        release_id: manifest.release_id.clone(),
        version: manifest.version.clone(),
        created_at: manifest.created_at.clone(),
        actor: manifest.actor.clone(),
        target: target_label(&manifest.target),
        metadata: json!({
            "target": manifest.target,
            "checks": locked.get("checks").cloned().unwrap_or(Value::Null),
        }),
    })?;
    for component in &manifest.components {
        dal.add_release_component(&NewReleaseComponent {
            release_meta_id: row.id,
            tombstone: component.tombstone.clone(),
            dest_path: component.dest_path.clone(),
            mode: component.mode.clone(),
            template_vars: component
                .template_vars
                .as_ref()
                .map(|vars| json!(vars)),
        })?;
    }
    Ok((row.id, false))
}

fn record(evidence: &EvidenceLog, action: &str, actor: &str, context: Value) {
    if let Err(err) = evidence.evidence_append(action, actor, TOOL, RELEASE_REPO, context) {
        warn!(action, error = %err, "failed to record release evidence");
    }
}
