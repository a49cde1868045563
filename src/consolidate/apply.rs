//! Apply phase: archive current bytes, then replace files with stubs.
//!
//! Both appliers are reversible: the replaced content is always stored first,
//! and the file is only overwritten after the store succeeded.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::cluster::ConsolidationPlan;
use super::shim::{SHIM_MARKER, ShimContext, TombstoneStub, render_shim, tombstone_stub};
use super::staleness::Plan;
use crate::archive::{ArchiveService, sha256_hex};
use crate::error::Result;
use crate::utils::fs::write_atomic;

/// Per-file outcome of an apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    /// Why the entry was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl AppliedEntry {
    fn skipped(path: &str, why: &str) -> Self {
        Self {
            path: path.to_string(),
            tombstone: None,
            sha256: None,
            canonical: None,
            skipped: Some(why.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedEntry>,
    pub skipped: Vec<AppliedEntry>,
    pub ts: String,
}

impl ApplyReport {
    fn push(&mut self, entry: AppliedEntry) {
        if entry.skipped.is_some() {
            self.skipped.push(entry);
        } else {
            self.applied.push(entry);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanApplyOptions {
    pub repo: String,
    pub actor: String,
    /// Replace archived files with a tombstone stub.
    pub write_stubs: bool,
}

#[derive(Debug, Clone)]
pub struct ConsolidationApplyOptions {
    pub repo: String,
    pub actor: String,
    pub commit_sha: Option<String>,
    /// Also archive each canonical file and link its duplicates to it.
    pub link_canonical: bool,
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Archive every plan entry and optionally leave tombstone stubs behind.
///
/// Entries whose file is gone, or whose content changed since planning (when
/// the plan recorded a sha256), are reported as skipped.
pub fn apply_plan(
    service: &ArchiveService,
    plan: &Plan,
    root: &Path,
    options: &PlanApplyOptions,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for entry in &plan.entries {
        let file = resolve(root, &entry.path);
        if !file.is_file() {
            report.push(AppliedEntry::skipped(&entry.path, "missing"));
            continue;
        }
        let bytes = std::fs::read(&file)?;
        let sha256 = sha256_hex(&bytes);
        if entry.sha256.as_deref().is_some_and(|planned| planned != sha256) {
            warn!(path = %entry.path, "file changed since plan was built");
            report.push(AppliedEntry::skipped(&entry.path, "changed since plan"));
            continue;
        }

        let reason = if entry.reason.is_empty() {
            "stale"
        } else {
            entry.reason.as_str()
        };
        let commit = entry
            .commit_sha
            .as_deref()
            .or(plan.analyze_sha.as_deref());
        let receipt = service.store_file(
            &options.repo,
            &file,
            &entry.path,
            &options.actor,
            reason,
            commit,
        )?;

        if options.write_stubs {
            let stub = tombstone_stub(&TombstoneStub {
                path: &entry.path,
                tombstone: &receipt.tombstone,
                sha256: &receipt.sha256,
                reason,
                actor: &options.actor,
                commit,
            });
            write_atomic(&file, stub.as_bytes())?;
        }

        service.evidence().evidence_append(
            "ARCHIVE_APPLY",
            &options.actor,
            "archive",
            &options.repo,
            json!({
                "path": entry.path,
                "tombstone": receipt.tombstone,
                "sha256": receipt.sha256,
                "reason": reason,
                "stub": options.write_stubs,
            }),
        )?;
        report.push(AppliedEntry {
            path: entry.path.clone(),
            tombstone: Some(receipt.tombstone),
            sha256: Some(receipt.sha256),
            canonical: None,
            skipped: None,
        });
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "archive plan applied"
    );
    report.ts = Utc::now().to_rfc3339();
    Ok(report)
}

/// Replace every duplicate in `plan` with a shim pointing at its canonical.
///
/// Files already carrying the shim marker are skipped, so re-running an apply
/// is harmless.
pub fn apply_consolidation(
    service: &ArchiveService,
    plan: &ConsolidationPlan,
    root: &Path,
    options: &ConsolidationApplyOptions,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for cluster in &plan.clusters {
        let canonical = cluster.canonical.path.as_str();
        let canonical_file = resolve(root, canonical);
        let canonical_tombstone = if options.link_canonical && canonical_file.is_file() {
            Some(
                service
                    .store_file(
                        &options.repo,
                        &canonical_file,
                        canonical,
                        &options.actor,
                        "canonical",
                        options.commit_sha.as_deref(),
                    )?
                    .tombstone,
            )
        } else {
            None
        };

        for duplicate in &cluster.duplicates {
            let file = resolve(root, &duplicate.path);
            if !file.is_file() {
                report.push(AppliedEntry::skipped(&duplicate.path, "missing"));
                continue;
            }
            let bytes = std::fs::read(&file)?;
            if String::from_utf8_lossy(&bytes).contains(SHIM_MARKER) {
                report.push(AppliedEntry::skipped(&duplicate.path, "already consolidated"));
                continue;
            }

            let reason = format!("duplicate of {canonical}");
            let receipt = service.store_file(
                &options.repo,
                &file,
                &duplicate.path,
                &options.actor,
                &reason,
                options.commit_sha.as_deref(),
            )?;

            let shim = render_shim(&ShimContext {
                duplicate: &duplicate.path,
                canonical,
                tombstone: &receipt.tombstone,
            });
            write_atomic(&file, shim.as_bytes())?;

            service.evidence().evidence_append(
                "CONSOLIDATE_APPLY",
                &options.actor,
                "archive",
                &options.repo,
                json!({
                    "path": duplicate.path,
                    "tombstone": receipt.tombstone,
                    "sha256": receipt.sha256,
                    "canonical": canonical,
                }),
            )?;

            if let Some(canonical_tombstone) = &canonical_tombstone {
                service.refer_dup_to_canonical(
                    &receipt.tombstone,
                    canonical_tombstone,
                    &options.actor,
                )?;
            }

            report.push(AppliedEntry {
                path: duplicate.path.clone(),
                tombstone: Some(receipt.tombstone),
                sha256: Some(receipt.sha256),
                canonical: Some(canonical.to_string()),
                skipped: None,
            });
        }
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "consolidation applied"
    );
    report.ts = Utc::now().to_rfc3339();
    Ok(report)
}
