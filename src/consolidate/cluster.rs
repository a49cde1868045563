//! Consolidation planning: group near-duplicates and pick a canonical file.

use std::path::Path;
use std::time::SystemTime;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::scan::{ExcludeSet, ScannedFile, scan_tree};
use super::similarity::{Fingerprint, Similarity, SimilarityPolicy};
use crate::archive::detect::{detect_lang, guess_mime};
use crate::error::Result;

/// Stem suffixes that mark a file as a leftover copy.
const STALE_SUFFIXES: &[&str] = &["_old", "_bak", "_copy", "_legacy", ".orig"];

/// Weights for choosing the canonical member of a cluster.
///
/// `canon_score = freshness_weight·freshness + usage_weight·usage
/// + testcov_weight·testcov + path_weight·path_fitness
/// − complexity_weight·complexity_penalty`, clamped to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonPolicy {
    /// Default: 0.25
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f64,

    /// Default: 0.25
    #[serde(default = "default_usage_weight")]
    pub usage_weight: f64,

    /// Default: 0.20
    #[serde(default = "default_testcov_weight")]
    pub testcov_weight: f64,

    /// Default: 0.20
    #[serde(default = "default_path_weight")]
    pub path_weight: f64,

    /// Default: 0.10
    #[serde(default = "default_complexity_weight")]
    pub complexity_weight: f64,

    /// Path prefixes where canonical code is expected to live
    #[serde(default = "default_preferred_prefixes")]
    pub preferred_prefixes: Vec<String>,
}

fn default_freshness_weight() -> f64 {
    0.25
}

fn default_usage_weight() -> f64 {
    0.25
}

fn default_testcov_weight() -> f64 {
    0.20
}

fn default_path_weight() -> f64 {
    0.20
}

fn default_complexity_weight() -> f64 {
    0.10
}

fn default_preferred_prefixes() -> Vec<String> {
    vec!["src/".to_string()]
}

impl Default for CanonPolicy {
    fn default() -> Self {
        Self {
            freshness_weight: default_freshness_weight(),
            usage_weight: default_usage_weight(),
            testcov_weight: default_testcov_weight(),
            path_weight: default_path_weight(),
            complexity_weight: default_complexity_weight(),
            preferred_prefixes: default_preferred_prefixes(),
        }
    }
}

impl CanonPolicy {
    fn preferred(&self, rel: &str) -> bool {
        self.preferred_prefixes
            .iter()
            .any(|prefix| rel.starts_with(prefix.as_str()))
    }

    /// Structural fitness of a path in [0, 1].
    #[must_use]
    pub fn path_fitness(&self, rel: &str) -> f64 {
        let mut score: f64 = 0.0;
        if self.preferred(rel) {
            score += 0.5;
        }
        if is_legacy(rel) {
            score -= 0.3;
        }
        if file_stem(rel).ends_with("_v2") {
            score += 0.1;
        }
        score.clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn usage(&self, rel: &str) -> f64 {
        if is_legacy(rel) {
            0.1
        } else if self.preferred(rel) {
            0.7
        } else {
            0.4
        }
    }

    #[must_use]
    pub fn canon_score(&self, rel: &str, signals: &CanonSignals) -> f64 {
        let base = self.freshness_weight * signals.freshness.clamp(0.0, 1.0)
            + self.usage_weight * signals.usage.clamp(0.0, 1.0)
            + self.testcov_weight * signals.testcov.clamp(0.0, 1.0)
            + self.path_weight * self.path_fitness(rel);
        let penalty = self.complexity_weight * complexity_penalty(signals.size_bytes, signals.sloc);
        round4((base - penalty).clamp(0.0, 1.0))
    }
}

/// Inputs to [`CanonPolicy::canon_score`] for one file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonSignals {
    pub freshness: f64,
    pub usage: f64,
    pub testcov: f64,
    pub size_bytes: u64,
    pub sloc: usize,
}

/// Step function of age: recent files score higher.
#[must_use]
pub fn freshness(age_days: u64) -> f64 {
    match age_days {
        0..=7 => 1.0,
        8..=30 => 0.8,
        31..=180 => 0.5,
        181..=365 => 0.3,
        _ => 0.1,
    }
}

/// Penalty in [0, 0.4] growing with line count and size.
#[must_use]
pub fn complexity_penalty(size_bytes: u64, sloc: usize) -> f64 {
    (sloc as f64 / 2000.0 + size_bytes as f64 / (512.0 * 1024.0)).min(0.4)
}

fn file_stem(rel: &str) -> &str {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

fn is_legacy(rel: &str) -> bool {
    let lower = rel.to_lowercase();
    lower.split('/').any(|segment| segment == "legacy")
        || STALE_SUFFIXES
            .iter()
            .any(|suffix| file_stem(&lower).ends_with(suffix))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A scored cluster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub path: String,
    pub score: f64,
    pub freshness: f64,
    pub usage: f64,
    pub testcov: f64,
    pub size_bytes: u64,
    pub sloc: usize,
    pub age_days: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// A file to be replaced by a shim pointing at the cluster's canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub path: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<Similarity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub canonical: Candidate,
    pub duplicates: Vec<DuplicateEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationPlan {
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

struct Analyzed {
    file: ScannedFile,
    text: String,
    fingerprint: Fingerprint,
}

/// Scan `root` and group near-duplicate files into clusters.
///
/// Each file joins at most one cluster: the first earlier file (in path order)
/// it matches. Inside a cluster, members are ranked by canon score (ties broken
/// by path) and the best becomes canonical.
pub fn build_consolidation_plan(
    root: &Path,
    excludes: &[String],
    similarity: &SimilarityPolicy,
    canon: &CanonPolicy,
) -> Result<ConsolidationPlan> {
    let excludes = ExcludeSet::new(excludes)?;
    let files = scan_tree(root, &excludes)?;

    let mut analyzed = Vec::with_capacity(files.len());
    for file in files {
        if file.size_bytes > similarity.max_file_bytes {
            continue;
        }
        let bytes = std::fs::read(&file.path)?;
        if bytes.contains(&0) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let fingerprint = Fingerprint::new(&file.path, &text, similarity);
        analyzed.push(Analyzed {
            file,
            text,
            fingerprint,
        });
    }

    let now = SystemTime::now();
    let mut visited = vec![false; analyzed.len()];
    let mut clusters = Vec::new();

    for i in 0..analyzed.len() {
        if visited[i] {
            continue;
        }
        let mut group = vec![(i, None)];
        for j in (i + 1)..analyzed.len() {
            if visited[j] {
                continue;
            }
            let (a, b) = (&analyzed[i].fingerprint, &analyzed[j].fingerprint);
            let measured = a.compare(b);
            if let Some(reason) = similarity.near_duplicate(a, b, &measured) {
                debug!(
                    a = %analyzed[i].file.rel,
                    b = %analyzed[j].file.rel,
                    reason = reason.as_str(),
                    "near duplicate"
                );
                group.push((j, Some(reason)));
                visited[j] = true;
            }
        }
        visited[i] = true;
        if group.len() < 2 {
            continue;
        }

        let mut ranked: Vec<(usize, Candidate)> = group
            .iter()
            .map(|(idx, _)| (*idx, candidate(root, &analyzed[*idx], now, canon)))
            .collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
        });

        let (canonical_idx, canonical) = ranked.remove(0);
        let duplicates = ranked
            .into_iter()
            .map(|(idx, member)| {
                let measured = analyzed[canonical_idx]
                    .fingerprint
                    .compare(&analyzed[idx].fingerprint);
                let reason = similarity
                    .near_duplicate(
                        &analyzed[canonical_idx].fingerprint,
                        &analyzed[idx].fingerprint,
                        &measured,
                    )
                    .or_else(|| {
                        group
                            .iter()
                            .find(|(member, _)| *member == idx)
                            .and_then(|(_, reason)| *reason)
                    })
                    .map_or("transitive", |reason| reason.as_str());
                DuplicateEntry {
                    path: member.path,
                    score: member.score,
                    reason: reason.to_string(),
                    similarity: Some(measured),
                }
            })
            .collect();
        clusters.push(Cluster {
            canonical,
            duplicates,
        });
    }

    info!(
        files = analyzed.len(),
        clusters = clusters.len(),
        root = %root.display(),
        "consolidation plan built"
    );

    Ok(ConsolidationPlan {
        generated_at: Utc::now().to_rfc3339(),
        root: root.display().to_string(),
        clusters,
    })
}

fn candidate(root: &Path, item: &Analyzed, now: SystemTime, canon: &CanonPolicy) -> Candidate {
    let rel = item.file.rel.as_str();
    let age_days = item.file.age_days(now);
    let signals = CanonSignals {
        freshness: freshness(age_days),
        usage: canon.usage(rel),
        testcov: test_coverage(root, rel),
        size_bytes: item.file.size_bytes,
        sloc: item.text.lines().filter(|line| !line.trim().is_empty()).count(),
    };
    Candidate {
        path: rel.to_string(),
        score: canon.canon_score(rel, &signals),
        freshness: signals.freshness,
        usage: signals.usage,
        testcov: signals.testcov,
        size_bytes: signals.size_bytes,
        sloc: signals.sloc,
        age_days,
        mime: guess_mime(&item.file.path),
        lang: detect_lang(&item.file.path),
    }
}

/// 0.6 when a test file named after the stem exists under `tests/`.
fn test_coverage(root: &Path, rel: &str) -> f64 {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let ext = if ext.is_empty() {
        String::new()
    } else {
        format!(".{ext}")
    };
    let tests = root.join("tests");
    let covered = [format!("{stem}{ext}"), format!("test_{stem}{ext}")]
        .iter()
        .any(|candidate| tests.join(candidate).is_file());
    if covered { 0.6 } else { 0.0 }
}
