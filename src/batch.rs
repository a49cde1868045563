//! Bulk restoration over a JSON or CSV manifest.
//!
//! Items run on a bounded rayon pool (`batch.concurrent` workers). Each item
//! gets its own retry loop; a failing item is recorded in its result and never
//! aborts the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::archive::RestoreService;
use crate::config::{BatchConfig, PerformanceConfig};
use crate::error::{ArchiveError, Result};
use crate::perf::Timer;
use crate::retry::{RetryConfig, retry_with_backoff_when};
use crate::utils::fs::write_atomic;

/// One restore request from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub tombstone: String,
    /// Resolved against the manifest's directory when relative.
    pub output: PathBuf,
    pub actor: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawItem {
    #[serde(default)]
    tombstone: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct BatchManifest {
    pub items: Vec<BatchItem>,
    pub path: PathBuf,
}

impl BatchManifest {
    /// Parse a `.json`/`.jsonl` (object with `items`, or a bare list) or `.csv`
    /// (`tombstone,output[,actor]` header) manifest.
    pub fn from_path(path: &Path, default_actor: &str) -> Result<Self> {
        if !path.is_file() {
            return Err(ArchiveError::NotFound(format!(
                "manifest file not found: {}",
                path.display()
            )));
        }
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let raw = match ext.as_str() {
            "json" | "jsonl" => Self::load_json(path)?,
            "csv" => Self::load_csv(path)?,
            _ => {
                return Err(ArchiveError::Validation(format!(
                    "manifest must be a JSON or CSV file: {}",
                    path.display()
                )));
            }
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let items = raw
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Self::item(index + 1, entry, base, default_actor))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(ArchiveError::Validation(format!(
                "manifest does not contain any restore entries: {}",
                path.display()
            )));
        }
        Ok(Self {
            items,
            path: path.to_path_buf(),
        })
    }

    fn item(index: usize, raw: RawItem, base: &Path, default_actor: &str) -> Result<BatchItem> {
        let tombstone = non_empty(raw.tombstone).ok_or_else(|| {
            ArchiveError::Validation(format!("manifest entry {index} missing tombstone"))
        })?;
        let output = non_empty(raw.output).ok_or_else(|| {
            ArchiveError::Validation(format!("manifest entry {index} missing output path"))
        })?;
        let actor = non_empty(raw.actor)
            .or_else(|| non_empty(Some(default_actor.to_string())))
            .ok_or_else(|| {
                ArchiveError::Validation(format!(
                    "manifest entry {index} has no actor and no default actor was given"
                ))
            })?;
        Ok(BatchItem {
            tombstone,
            output: base.join(output),
            actor,
        })
    }

    fn load_json(path: &Path) -> Result<Vec<RawItem>> {
        let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let entries = match value {
            Value::Object(mut map) => map.remove("items").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        let Value::Array(entries) = entries else {
            return Err(ArchiveError::Validation(
                "JSON manifest must be a list of entries or contain an 'items' array".to_string(),
            ));
        };
        entries
            .into_iter()
            .map(|entry| {
                if entry.is_object() {
                    Ok(serde_json::from_value(entry)?)
                } else {
                    Err(ArchiveError::Validation(
                        "each manifest entry must be an object".to_string(),
                    ))
                }
            })
            .collect()
    }

    fn load_csv(path: &Path) -> Result<Vec<RawItem>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;
        let mut items = Vec::new();
        for row in reader.deserialize() {
            items.push(row?);
        }
        Ok(items)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Success,
    Failed,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub tombstone: String,
    pub output: String,
    pub actor: String,
    pub status: ItemStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error message of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dry_run: bool,
    /// Completion order is not guaranteed; membership and counts are.
    pub results: Vec<BatchItemResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Called as `(completed, total, latest)` every `progress_interval` items and
/// once at the end.
pub type ProgressCallback = Box<dyn Fn(usize, usize, &BatchItemResult) + Send + Sync>;

pub struct BatchRestore {
    service: Arc<dyn RestoreService>,
    retry: RetryConfig,
    batch: BatchConfig,
    performance: PerformanceConfig,
    progress: Option<ProgressCallback>,
}

impl BatchRestore {
    pub fn new(
        service: Arc<dyn RestoreService>,
        retry: RetryConfig,
        batch: BatchConfig,
        performance: PerformanceConfig,
    ) -> Self {
        Self {
            service,
            retry,
            batch,
            performance,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Restore every item; per-item failures land in the result.
    pub fn restore(&self, manifest: &BatchManifest) -> Result<BatchResult> {
        self.batch.validate()?;
        let timer = Timer::start("batch_restore");
        let total = manifest.len();
        let completed = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.batch.concurrent)
            .thread_name(|index| format!("batch-restore-{index}"))
            .build()
            .map_err(|err| ArchiveError::Io(std::io::Error::other(err.to_string())))?;

        let results: Vec<BatchItemResult> = pool.install(|| {
            manifest
                .items
                .par_iter()
                .map(|item| {
                    let result = self.restore_one(item);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.report_progress(done, total, &result);
                    result
                })
                .collect()
        });

        let succeeded = results
            .iter()
            .filter(|r| r.status == ItemStatus::Success)
            .count();
        let failed = results.len() - succeeded;
        let elapsed = timer.finish(&self.performance);
        info!(total, succeeded, failed, duration_ms = elapsed, "batch restore finished");

        Ok(BatchResult {
            total,
            succeeded,
            failed,
            dry_run: false,
            results,
            duration_ms: self.performance.enabled.then_some(elapsed),
        })
    }

    /// Validate and total the manifest without touching the archive.
    #[must_use]
    pub fn dry_run(&self, manifest: &BatchManifest) -> BatchResult {
        let results = manifest
            .items
            .iter()
            .map(|item| BatchItemResult {
                tombstone: item.tombstone.clone(),
                output: item.output.display().to_string(),
                actor: item.actor.clone(),
                status: ItemStatus::DryRun,
                attempts: 0,
                sha256: None,
                duration_ms: None,
                detail: None,
            })
            .collect();
        BatchResult {
            total: manifest.len(),
            succeeded: 0,
            failed: 0,
            dry_run: true,
            results,
            duration_ms: None,
        }
    }

    /// Persist `result` as pretty JSON for later audit.
    pub fn save_results(path: &Path, result: &BatchResult) -> Result<PathBuf> {
        let mut body = serde_json::to_vec_pretty(result)?;
        body.push(b'\n');
        write_atomic(path, &body)?;
        Ok(path.to_path_buf())
    }

    fn restore_one(&self, item: &BatchItem) -> BatchItemResult {
        let timer = Timer::start("batch_item");
        let mut attempts = 0u32;
        let outcome = retry_with_backoff_when(&self.retry, ArchiveError::is_retryable, || {
            attempts += 1;
            self.service
                .restore_to_path(&item.tombstone, &item.output, &item.actor)
        });
        let elapsed = timer.finish(&self.performance);

        let (status, sha256, detail) = match outcome {
            Ok(receipt) => (ItemStatus::Success, Some(receipt.sha256), None),
            Err(err) => {
                warn!(tombstone = %item.tombstone, attempts, error = %err, "batch item failed");
                (ItemStatus::Failed, None, Some(err.to_string()))
            }
        };
        BatchItemResult {
            tombstone: item.tombstone.clone(),
            output: item.output.display().to_string(),
            actor: item.actor.clone(),
            status,
            attempts,
            sha256,
            duration_ms: self.performance.enabled.then_some(elapsed),
            detail,
        }
    }

    fn report_progress(&self, done: usize, total: usize, latest: &BatchItemResult) {
        let Some(callback) = &self.progress else {
            return;
        };
        let interval = self.batch.progress_interval.max(1);
        if done % interval == 0 || done == total {
            callback(done, total, latest);
        }
    }
}
