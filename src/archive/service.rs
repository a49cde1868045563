//! Store / restore / link operations on top of the DAL and evidence log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use super::codec::{Codec, IdentityCodec};
use super::detect::{detect_lang, guess_mime};
use super::sha256_hex;
use crate::config::PerformanceConfig;
use crate::error::{ArchiveError, Result};
use crate::evidence::EvidenceLog;
use crate::logging::{OperationLog, log_operation};
use crate::perf::{Timer, TimingMetrics};
use crate::storage::{
    ArchiveDal, ArchiveSummary, NewTombstone, TombstoneLink, TombstoneRecord,
};
use crate::utils::fs::ensure_dir;
use crate::utils::redact::redact_text_credentials;

const TOOL: &str = "archive";

/// Repo recorded when the tombstone (and so its repo) is unknown.
const UNKNOWN_REPO: &str = "_codex_";

/// Arguments for [`ArchiveService::store`].
#[derive(Debug, Clone, Copy)]
pub struct StoreRequest<'a> {
    pub repo: &'a str,
    pub path: &'a str,
    pub by: &'a str,
    pub reason: &'a str,
    pub commit_sha: Option<&'a str>,
    pub bytes: &'a [u8],
    pub mime: Option<&'a str>,
    pub lang: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub tombstone: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Restored payload plus the tombstone's metadata.
#[derive(Debug, Clone)]
pub struct Restored {
    pub bytes: Vec<u8>,
    pub meta: TombstoneRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReceipt {
    pub tombstone: String,
    pub output: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Restoration to the filesystem; the seam batch restore depends on.
pub trait RestoreService: Send + Sync {
    fn restore_to_path(&self, tombstone: &str, output: &Path, actor: &str)
    -> Result<RestoreReceipt>;
}

pub struct ArchiveService {
    dal: Arc<dyn ArchiveDal>,
    evidence: EvidenceLog,
    codec: Arc<dyn Codec>,
    performance: PerformanceConfig,
    default_actor: String,
}

impl ArchiveService {
    pub fn new(dal: Arc<dyn ArchiveDal>, evidence: EvidenceLog) -> Self {
        Self {
            dal,
            evidence,
            codec: Arc::new(IdentityCodec),
            performance: PerformanceConfig::default(),
            default_actor: "codex".to_string(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_performance(mut self, performance: PerformanceConfig) -> Self {
        self.performance = performance;
        self
    }

    #[must_use]
    pub fn with_default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    #[must_use]
    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    #[must_use]
    pub fn dal(&self) -> &dyn ArchiveDal {
        self.dal.as_ref()
    }

    #[must_use]
    pub fn default_actor(&self) -> &str {
        &self.default_actor
    }

    /// Archive `bytes` under a new tombstone.
    pub fn store(&self, req: &StoreRequest<'_>) -> Result<StoreReceipt> {
        let timer = Timer::start("store");
        let sha256 = sha256_hex(req.bytes);
        let size_bytes = req.bytes.len() as u64;
        let payload = self.codec.encode(req.bytes)?;

        let result = self.dal.create_tombstone(&NewTombstone {
            sha256: sha256.clone(),
            repo: req.repo.to_string(),
            path: req.path.to_string(),
            actor: req.by.to_string(),
            reason: req.reason.to_string(),
            commit_sha: req.commit_sha.map(ToString::to_string),
            mime: req.mime.map(ToString::to_string),
            lang: req.lang.map(ToString::to_string),
            size_bytes,
            codec: self.codec.name().to_string(),
            payload,
        });
        let elapsed = timer.finish(&self.performance);

        let tombstone = match result {
            Ok(id) => id,
            Err(err) => {
                self.log("STORE", req.by, None, Some(elapsed), Some(&err));
                return Err(err);
            }
        };

        let mut context = json!({
            "path": req.path,
            "tombstone": tombstone,
            "sha256": sha256,
            "size_bytes": size_bytes,
            "reason": req.reason,
            "commit_sha": req.commit_sha,
        });
        self.attach_metrics(
            &mut context,
            &TimingMetrics {
                duration_ms: Some(elapsed),
                write_ms: None,
            },
        );
        self.evidence
            .evidence_append("STORE", req.by, TOOL, req.repo, context)?;
        self.log("STORE", req.by, Some(&tombstone), Some(elapsed), None);

        Ok(StoreReceipt {
            tombstone,
            sha256,
            size_bytes,
        })
    }

    /// Read a file and archive it, detecting mime/lang when not given.
    pub fn store_file(
        &self,
        repo: &str,
        file: &Path,
        record_path: &str,
        by: &str,
        reason: &str,
        commit_sha: Option<&str>,
    ) -> Result<StoreReceipt> {
        let bytes = std::fs::read(file)?;
        let mime = guess_mime(file);
        let lang = detect_lang(file);
        self.store(&StoreRequest {
            repo,
            path: record_path,
            by,
            reason,
            commit_sha,
            bytes: &bytes,
            mime: mime.as_deref(),
            lang: lang.as_deref(),
        })
    }

    /// Restore a tombstone's bytes, recording the attempt as the default actor.
    pub fn restore(&self, tombstone: &str) -> Result<Restored> {
        self.restore_as(tombstone, &self.default_actor)
    }

    /// Restore a tombstone's bytes on behalf of `actor`.
    ///
    /// Fails with [`ArchiveError::TombstoneNotFound`] for unknown ids. Success
    /// and failure are both recorded as `RESTORE` evidence.
    pub fn restore_as(&self, tombstone: &str, actor: &str) -> Result<Restored> {
        let timer = Timer::start("restore");
        let result = self.fetch(tombstone);
        let metrics = TimingMetrics {
            duration_ms: Some(timer.finish(&self.performance)),
            write_ms: None,
        };
        let repo = result.as_ref().ok().map(|restored| restored.meta.repo.clone());
        self.record_restore(tombstone, actor, repo.as_deref(), None, &metrics, &result)?;
        result
    }

    /// Look up and decode a payload without emitting evidence.
    fn fetch(&self, tombstone: &str) -> Result<Restored> {
        let stored = self
            .dal
            .get_tombstone(tombstone)?
            .ok_or_else(|| ArchiveError::TombstoneNotFound(tombstone.to_string()))?;
        if stored.record.codec != self.codec.name() {
            return Err(ArchiveError::Validation(format!(
                "tombstone {tombstone} was written with codec {}, not {}",
                stored.record.codec,
                self.codec.name()
            )));
        }
        let bytes = self.codec.decode(&stored.payload)?;
        let actual = sha256_hex(&bytes);
        if actual != stored.record.sha256 {
            return Err(ArchiveError::Integrity(format!(
                "tombstone {tombstone}: expected sha256 {}, got {actual}",
                stored.record.sha256
            )));
        }
        Ok(Restored {
            bytes,
            meta: stored.record,
        })
    }

    /// Record that `duplicate` is redundant with `canonical`. Both must exist.
    pub fn refer_dup_to_canonical(
        &self,
        duplicate: &str,
        canonical: &str,
        actor: &str,
    ) -> Result<()> {
        let dup = self
            .dal
            .get_tombstone(duplicate)?
            .ok_or_else(|| ArchiveError::TombstoneNotFound(duplicate.to_string()))?;
        if self.dal.get_tombstone(canonical)?.is_none() {
            return Err(ArchiveError::TombstoneNotFound(canonical.to_string()));
        }
        self.dal.link_duplicate(duplicate, canonical)?;
        self.evidence.evidence_append(
            "LINK_DUPLICATE",
            actor,
            TOOL,
            &dup.record.repo,
            json!({ "duplicate": duplicate, "canonical": canonical }),
        )?;
        self.log("LINK_DUPLICATE", actor, Some(duplicate), None, None);
        Ok(())
    }

    pub fn links_for(&self, tombstone: &str) -> Result<Vec<TombstoneLink>> {
        self.dal.links_for(tombstone)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<TombstoneRecord>> {
        self.dal.list_recent(limit)
    }

    pub fn summary(&self) -> Result<ArchiveSummary> {
        self.dal.summary()
    }

    fn record_restore(
        &self,
        tombstone: &str,
        actor: &str,
        repo: Option<&str>,
        output: Option<&Path>,
        metrics: &TimingMetrics,
        result: &Result<Restored>,
    ) -> Result<()> {
        let mut context = json!({ "tombstone": tombstone });
        if let Some(output) = output {
            context["output"] = json!(output.display().to_string());
        }
        self.attach_metrics(&mut context, metrics);

        match result {
            Ok(restored) => {
                context["status"] = json!("SUCCESS");
                context["sha256"] = json!(restored.meta.sha256);
                context["path"] = json!(restored.meta.path);
                self.log("RESTORE", actor, Some(tombstone), metrics.duration_ms, None);
                self.evidence.evidence_append(
                    "RESTORE",
                    actor,
                    TOOL,
                    &restored.meta.repo,
                    context,
                )
            }
            Err(err) => {
                context["status"] = json!("FAILED");
                context["error"] = json!(redact_text_credentials(&err.to_string()));
                self.log("RESTORE", actor, Some(tombstone), metrics.duration_ms, Some(err));
                // The caller gets the original error; a failed audit write is only logged.
                // Unknown ids have no repo to report under.
                let repo = repo.unwrap_or(UNKNOWN_REPO);
                if let Err(evidence_err) =
                    self.evidence
                        .evidence_append("RESTORE", actor, TOOL, repo, context)
                {
                    warn!(error = %evidence_err, "failed to record restore failure");
                }
                Ok(())
            }
        }
    }

    fn attach_metrics(&self, context: &mut Value, metrics: &TimingMetrics) {
        if self.performance.enabled && !metrics.is_empty() {
            context["metrics"] = json!(metrics);
        }
    }

    fn log(
        &self,
        action: &str,
        actor: &str,
        tombstone: Option<&str>,
        duration_ms: Option<u64>,
        error: Option<&ArchiveError>,
    ) {
        log_operation(
            action,
            &OperationLog {
                actor,
                tombstone,
                backend: self.dal.kind().as_str(),
                url: self.dal.url(),
                duration_ms,
                error: error.map(ToString::to_string),
            },
        );
    }
}

impl RestoreService for ArchiveService {
    fn restore_to_path(
        &self,
        tombstone: &str,
        output: &Path,
        actor: &str,
    ) -> Result<RestoreReceipt> {
        let timer = Timer::start("restore_to_path");
        let fetched = self.fetch(tombstone);

        let mut write_ms = None;
        let mut repo = None;
        let result = fetched.and_then(|restored| {
            repo = Some(restored.meta.repo.clone());
            let write_timer = Timer::start("restore_write");
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    ensure_dir(parent)?;
                }
            }
            std::fs::write(output, &restored.bytes)?;
            write_ms = Some(write_timer.finish(&self.performance));
            Ok(restored)
        });

        let metrics = TimingMetrics {
            duration_ms: Some(timer.finish(&self.performance)),
            write_ms,
        };
        self.record_restore(tombstone, actor, repo.as_deref(), Some(output), &metrics, &result)?;
        let restored = result?;
        Ok(RestoreReceipt {
            tombstone: tombstone.to_string(),
            output: output.to_path_buf(),
            sha256: restored.meta.sha256,
            size_bytes: restored.meta.size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteDal;
    use tempfile::TempDir;

    fn service() -> (TempDir, ArchiveService) {
        let dir = TempDir::new().unwrap();
        let dal = SqliteDal::open(dir.path().join("archive.sqlite")).unwrap();
        let evidence = EvidenceLog::new(dir.path().join("evidence"));
        (dir, ArchiveService::new(Arc::new(dal), evidence))
    }

    fn request(bytes: &[u8]) -> StoreRequest<'_> {
        StoreRequest {
            repo: "codex",
            path: "src/a.py",
            by: "alice",
            reason: "superseded",
            commit_sha: Some("abc"),
            bytes,
            mime: Some("text/x-python"),
            lang: Some("python"),
        }
    }

    #[derive(Debug)]
    struct ShiftCodec;

    impl Codec for ShiftCodec {
        fn name(&self) -> &'static str {
            "shift"
        }
        fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
            Ok(raw.iter().map(|b| b.wrapping_add(1)).collect())
        }
        fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> {
            Ok(stored.iter().map(|b| b.wrapping_sub(1)).collect())
        }
    }

    // ===== store / restore =====

    #[test]
    fn store_then_restore_round_trips() {
        let (_dir, svc) = service();
        let receipt = svc.store(&request(b"print('hi')\n")).unwrap();
        assert_eq!(receipt.sha256, sha256_hex(b"print('hi')\n"));

        let restored = svc.restore(&receipt.tombstone).unwrap();
        assert_eq!(restored.bytes, b"print('hi')\n");
        assert_eq!(restored.meta.path, "src/a.py");
        assert_eq!(restored.meta.lang.as_deref(), Some("python"));
    }

    #[test]
    fn same_bytes_same_sha_different_tombstones() {
        let (_dir, svc) = service();
        let a = svc.store(&request(b"x")).unwrap();
        let b = svc.store(&request(b"x")).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_ne!(a.tombstone, b.tombstone);
    }

    #[test]
    fn restore_unknown_is_not_found_and_recorded() {
        let (_dir, svc) = service();
        let err = svc.restore("no-such-id").unwrap_err();
        assert!(matches!(err, ArchiveError::TombstoneNotFound(_)));

        let records = svc.evidence().read_all().unwrap();
        let last = records.last().unwrap();
        assert_eq!(last["action"], "RESTORE");
        assert_eq!(last["context"]["status"], "FAILED");
    }

    #[test]
    fn store_and_restore_emit_evidence() {
        let (_dir, svc) = service();
        let receipt = svc.store(&request(b"abc")).unwrap();
        svc.restore_as(&receipt.tombstone, "bob").unwrap();

        let records = svc.evidence().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["action"], "STORE");
        assert_eq!(records[0]["context"]["sha256"], receipt.sha256);
        assert_eq!(records[1]["action"], "RESTORE");
        assert_eq!(records[1]["actor"], "bob");
        assert_eq!(records[1]["context"]["status"], "SUCCESS");
        assert!(records[1]["context"]["metrics"]["duration_ms"].is_u64());
    }

    #[test]
    fn metrics_omitted_when_disabled() {
        let (_dir, svc) = service();
        let svc = svc.with_performance(PerformanceConfig {
            enabled: false,
            ..PerformanceConfig::default()
        });
        svc.store(&request(b"abc")).unwrap();
        let records = svc.evidence().read_all().unwrap();
        assert!(records[0]["context"].get("metrics").is_none());
    }

    #[test]
    fn restore_to_path_writes_file() {
        let (dir, svc) = service();
        let receipt = svc.store(&request(b"payload")).unwrap();
        let out = dir.path().join("out/nested/file.py");

        let restored = svc
            .restore_to_path(&receipt.tombstone, &out, "carol")
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"payload");
        assert_eq!(restored.size_bytes, 7);

        let records = svc.evidence().read_all().unwrap();
        assert_eq!(records.last().unwrap()["context"]["output"], out.display().to_string());
    }

    #[test]
    fn failed_write_is_recorded_under_the_tombstone_repo() {
        let (dir, svc) = service();
        let receipt = svc.store(&request(b"payload")).unwrap();
        // A directory at the output path makes the write fail after the lookup.
        let out = dir.path().join("taken");
        std::fs::create_dir_all(&out).unwrap();

        assert!(svc.restore_to_path(&receipt.tombstone, &out, "carol").is_err());
        let records = svc.evidence().read_all().unwrap();
        let last = records.last().unwrap();
        assert_eq!(last["context"]["status"], "FAILED");
        assert_eq!(last["repo"], "codex");

        assert!(svc.restore_to_path("ghost", &out, "carol").is_err());
        let records = svc.evidence().read_all().unwrap();
        assert_eq!(records.last().unwrap()["repo"], UNKNOWN_REPO);
    }

    // ===== codec =====

    #[test]
    fn custom_codec_round_trips_and_guards_mismatch() {
        let dir = TempDir::new().unwrap();
        let dal: Arc<dyn ArchiveDal> =
            Arc::new(SqliteDal::open(dir.path().join("archive.sqlite")).unwrap());
        let evidence = EvidenceLog::new(dir.path().join("evidence"));

        let shifted = ArchiveService::new(dal.clone(), evidence.clone()).with_codec(Arc::new(ShiftCodec));
        let receipt = shifted.store(&request(b"secret")).unwrap();
        assert_eq!(shifted.restore(&receipt.tombstone).unwrap().bytes, b"secret");

        let stored = dal.get_tombstone(&receipt.tombstone).unwrap().unwrap();
        assert_ne!(stored.payload, b"secret");

        let plain = ArchiveService::new(dal, evidence);
        assert!(matches!(
            plain.restore(&receipt.tombstone),
            Err(ArchiveError::Validation(_))
        ));
    }

    // ===== links =====

    #[test]
    fn refer_dup_to_canonical_keeps_both() {
        let (_dir, svc) = service();
        let dup = svc.store(&request(b"dup")).unwrap();
        let canon = svc.store(&request(b"canon")).unwrap();

        svc.refer_dup_to_canonical(&dup.tombstone, &canon.tombstone, "alice")
            .unwrap();

        assert_eq!(svc.restore(&dup.tombstone).unwrap().bytes, b"dup");
        assert_eq!(svc.restore(&canon.tombstone).unwrap().bytes, b"canon");
        let links = svc.links_for(&canon.tombstone).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].duplicate, dup.tombstone);
    }

    #[test]
    fn refer_dup_requires_existing_tombstones() {
        let (_dir, svc) = service();
        let dup = svc.store(&request(b"dup")).unwrap();
        assert!(matches!(
            svc.refer_dup_to_canonical(&dup.tombstone, "ghost", "alice"),
            Err(ArchiveError::TombstoneNotFound(_))
        ));
    }
}
