//! Staleness planning: flag files that look dead enough to archive.

use std::path::Path;
use std::time::SystemTime;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::scan::{ExcludeSet, ScannedFile, scan_tree};
use crate::archive::detect::{detect_lang, guess_mime};
use crate::archive::sha256_hex;
use crate::error::Result;
use crate::utils::git::resolve_revision;

/// Weights for the staleness score.
///
/// `score = clamp(age_weight·[age ≥ threshold] + marker_weight·[marker]
/// + path_weight·[legacy path])`; files at or above `threshold` are flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessPolicy {
    /// Default: 0.6
    #[serde(default = "default_age_weight")]
    pub age_weight: f64,

    /// Default: 0.4
    #[serde(default = "default_marker_weight")]
    pub marker_weight: f64,

    /// Default: 0.2
    #[serde(default = "default_path_weight")]
    pub path_weight: f64,

    /// Minimum score for a file to enter the plan
    /// Default: 0.7
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Case-sensitive substrings that mark a file deprecated
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,

    /// Path segments that mark legacy code
    #[serde(default = "default_legacy_segments")]
    pub legacy_segments: Vec<String>,

    /// Only the first N bytes are searched for markers
    /// Default: 256 KiB
    #[serde(default = "default_marker_scan_bytes")]
    pub marker_scan_bytes: usize,
}

fn default_age_weight() -> f64 {
    0.6
}

fn default_marker_weight() -> f64 {
    0.4
}

fn default_path_weight() -> f64 {
    0.2
}

fn default_threshold() -> f64 {
    0.7
}

fn default_markers() -> Vec<String> {
    ["DEPRECATED", "@deprecated", "deprecated::", "TODO: remove", "LEGACY"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_legacy_segments() -> Vec<String> {
    ["legacy", "deprecated", "attic"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_marker_scan_bytes() -> usize {
    256 * 1024
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            age_weight: default_age_weight(),
            marker_weight: default_marker_weight(),
            path_weight: default_path_weight(),
            threshold: default_threshold(),
            markers: default_markers(),
            legacy_segments: default_legacy_segments(),
            marker_scan_bytes: default_marker_scan_bytes(),
        }
    }
}

/// Signals observed for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessSignals {
    pub stale_age: bool,
    pub marker: Option<String>,
    pub legacy_path: bool,
}

impl StalenessPolicy {
    pub fn signals(
        &self,
        rel: &str,
        content: &[u8],
        age_days: u64,
        age_days_threshold: u64,
    ) -> StalenessSignals {
        let head = &content[..content.len().min(self.marker_scan_bytes)];
        let text = String::from_utf8_lossy(head);
        let marker = self
            .markers
            .iter()
            .find(|marker| text.contains(marker.as_str()))
            .cloned();
        let legacy_path = rel.split('/').any(|segment| {
            self.legacy_segments
                .iter()
                .any(|legacy| segment.eq_ignore_ascii_case(legacy))
        });
        StalenessSignals {
            stale_age: age_days >= age_days_threshold,
            marker,
            legacy_path,
        }
    }

    #[must_use]
    pub fn score(&self, signals: &StalenessSignals) -> f64 {
        let mut score = 0.0;
        if signals.stale_age {
            score += self.age_weight;
        }
        if signals.marker.is_some() {
            score += self.marker_weight;
        }
        if signals.legacy_path {
            score += self.path_weight;
        }
        (score * 10_000.0).round().clamp(0.0, 10_000.0) / 10_000.0
    }

    #[must_use]
    pub fn is_candidate(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

/// Human-readable reason for a flagged file.
fn describe(signals: &StalenessSignals, age_days: u64) -> String {
    let mut parts = Vec::new();
    if signals.stale_age {
        parts.push(format!("unmodified for {age_days} days"));
    }
    if let Some(marker) = &signals.marker {
        parts.push(format!("contains {marker:?}"));
    }
    if signals.legacy_path {
        parts.push("legacy path".to_string());
    }
    parts.join("; ")
}

/// One archival candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub path: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

/// Output of [`build_plan`], input of `apply_plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze_sha: Option<String>,
    #[serde(default)]
    pub age_days_threshold: u64,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

/// Walk `root` and collect files whose staleness score reaches the threshold.
///
/// `analyze_sha` is a git revision; when it resolves, the full commit SHA is
/// recorded on every entry, otherwise the raw value is kept.
pub fn build_plan(
    root: &Path,
    analyze_sha: Option<&str>,
    excludes: &[String],
    age_days_threshold: u64,
    policy: &StalenessPolicy,
) -> Result<Plan> {
    let excludes = ExcludeSet::new(excludes)?;
    let files = scan_tree(root, &excludes)?;
    let commit = match analyze_sha {
        Some(rev) => Some(resolve_revision(root, rev)?.unwrap_or_else(|| rev.to_string())),
        None => None,
    };

    let now = SystemTime::now();
    let mut entries = Vec::new();
    for file in &files {
        if let Some(entry) = evaluate(file, now, age_days_threshold, policy, commit.as_deref())? {
            entries.push(entry);
        }
    }
    info!(
        scanned = files.len(),
        flagged = entries.len(),
        root = %root.display(),
        "archive plan built"
    );

    Ok(Plan {
        generated_at: Utc::now().to_rfc3339(),
        root: root.display().to_string(),
        analyze_sha: commit,
        age_days_threshold,
        entries,
    })
}

fn evaluate(
    file: &ScannedFile,
    now: SystemTime,
    age_days_threshold: u64,
    policy: &StalenessPolicy,
    commit: Option<&str>,
) -> Result<Option<PlanEntry>> {
    let content = std::fs::read(&file.path)?;
    let age_days = file.age_days(now);
    let signals = policy.signals(&file.rel, &content, age_days, age_days_threshold);
    let score = policy.score(&signals);
    if !policy.is_candidate(score) {
        return Ok(None);
    }
    debug!(path = %file.rel, score, "archive candidate");
    Ok(Some(PlanEntry {
        path: file.rel.clone(),
        score,
        reason: describe(&signals, age_days),
        mime: guess_mime(&file.path),
        lang: detect_lang(&file.path),
        sha256: Some(sha256_hex(&content)),
        size_bytes: Some(file.size_bytes),
        age_days: Some(age_days),
        commit_sha: commit.map(str::to_string),
    }))
}
