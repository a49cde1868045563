use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consolidate::{CanonPolicy, SimilarityPolicy, StalenessPolicy};
use crate::env::EnvSnapshot;
use crate::error::{ArchiveError, Result};
use crate::retry::RetryConfig;
use crate::storage::BackendKind;
use crate::utils::redact::redact_url_credentials;

/// Project-relative config file consulted when no explicit file is given.
pub const PROJECT_CONFIG_FILE: &str = ".codex/archive.toml";

pub const DEFAULT_SQLITE_URL: &str = "sqlite:///./.codex/archive.sqlite";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveAppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub plan: PlanConfig,
}

impl ArchiveAppConfig {
    /// Load configuration with precedence defaults < TOML < environment.
    ///
    /// An explicit `config_file` (or `CODEX_CONFIG`) replaces the global and
    /// project files entirely; it must exist.
    pub fn load(config_file: Option<&Path>, env: &EnvSnapshot) -> Result<Self> {
        Self::load_from(config_file, Path::new("."), env)
    }

    pub fn load_from(
        config_file: Option<&Path>,
        project_root: &Path,
        env: &EnvSnapshot,
    ) -> Result<Self> {
        let mut config = Self::default();

        let explicit = config_file
            .map(PathBuf::from)
            .or_else(|| env.get_string("CODEX_CONFIG").map(PathBuf::from));

        if let Some(path) = explicit {
            let patch = Self::load_patch(&path)?.ok_or_else(|| {
                ArchiveError::Config(format!("config file not found: {}", path.display()))
            })?;
            config.merge_patch(patch);
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_patch(&project_root.join(PROJECT_CONFIG_FILE))? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides(env)?;
        config.validate()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match dirs::config_dir() {
            Some(dir) => Self::load_patch(&dir.join("codex/archive.toml")),
            None => Ok(None),
        }
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path).map_err(|err| {
            ArchiveError::Config(format!("read config {}: {err}", path.display()))
        })?;
        let patch = toml::from_str(&raw).map_err(|err| {
            ArchiveError::Config(format!("parse config {}: {err}", path.display()))
        })?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.backend {
            self.backend.merge(patch);
        }
        if let Some(patch) = patch.logging {
            self.logging.merge(patch);
        }
        if let Some(patch) = patch.retry {
            merge_retry(&mut self.retry, patch);
        }
        if let Some(patch) = patch.batch {
            self.batch.merge(patch);
        }
        if let Some(patch) = patch.performance {
            self.performance.merge(patch);
        }
        if let Some(patch) = patch.evidence {
            self.evidence.merge(patch);
        }
        if let Some(patch) = patch.plan {
            self.plan.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self, env: &EnvSnapshot) -> Result<()> {
        if let Some(value) = env.get_string("CODEX_ARCHIVE_BACKEND") {
            self.backend.backend = value.to_lowercase();
        }
        if let Some(value) = env.get("CODEX_ARCHIVE_URL") {
            self.backend.url = value.trim().to_string();
        }

        if let Some(value) = env.get_string("CODEX_ARCHIVE_LOG_LEVEL") {
            self.logging.level = value.to_lowercase();
        }
        if let Some(value) = env.get_string("CODEX_ARCHIVE_LOG_FORMAT") {
            self.logging.format = value.to_lowercase();
        }
        if let Some(value) = env.get_string("CODEX_ARCHIVE_LOG_FILE") {
            self.logging.file = Some(value);
        }

        if let Some(value) = env.get_bool("CODEX_ARCHIVE_RETRY_ENABLED") {
            self.retry.enabled = value;
        }
        if let Some(value) = env.get_parsed::<u32>("CODEX_ARCHIVE_RETRY_ATTEMPTS")? {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env.get_parsed::<f64>("CODEX_ARCHIVE_RETRY_INITIAL")? {
            self.retry.initial_delay = value;
        }
        if let Some(value) = env.get_parsed::<f64>("CODEX_ARCHIVE_RETRY_MAX_DELAY")? {
            self.retry.max_delay = value;
        }
        if let Some(value) = env.get_parsed::<f64>("CODEX_ARCHIVE_RETRY_MULTIPLIER")? {
            self.retry.multiplier = value;
        }
        if let Some(value) = env.get_parsed::<f64>("CODEX_ARCHIVE_RETRY_JITTER")? {
            self.retry.jitter = value;
        }

        if let Some(value) = env.get_parsed::<usize>("CODEX_ARCHIVE_BATCH_CONCURRENT")? {
            self.batch.concurrent = value;
        }
        if let Some(value) = env.get_parsed::<usize>("CODEX_ARCHIVE_BATCH_PROGRESS_INTERVAL")? {
            self.batch.progress_interval = value;
        }

        if let Some(value) = env.get_bool("CODEX_ARCHIVE_PERF_ENABLED") {
            self.performance.enabled = value;
        }

        if let Some(value) = env.get_string("CODEX_EVIDENCE_DIR") {
            self.evidence.dir = PathBuf::from(value);
        }
        if let Some(value) = env.get_string("CODEX_ACTOR") {
            self.evidence.actor = value;
        }

        if let Some(values) = env.get_list("CODEX_ARCHIVE_PLAN_EXCLUDES") {
            self.plan.excludes = values;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.logging.validate()?;
        validate_retry(&self.retry)?;
        self.batch.validate()?;
        self.plan.validate()?;
        Ok(())
    }

    /// Copy of this config with credentials in the backend URL masked.
    #[must_use]
    pub fn to_redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.backend.url = redact_url_credentials(&copy.backend.url);
        copy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            url: DEFAULT_SQLITE_URL.to_string(),
        }
    }
}

impl BackendConfig {
    fn merge(&mut self, patch: BackendPatch) {
        if let Some(value) = patch.backend {
            self.backend = value.to_lowercase();
        }
        if let Some(value) = patch.url {
            self.url = value;
        }
    }

    /// Typed backend selector; errors on names outside the supported set.
    pub fn kind(&self) -> Result<BackendKind> {
        self.backend.parse()
    }

    pub fn validate(&self) -> Result<()> {
        self.kind()?;
        if self.url.trim().is_empty() {
            return Err(ArchiveError::Validation(
                "backend url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, patch: LoggingPatch) {
        if let Some(value) = patch.level {
            self.level = value.to_lowercase();
        }
        if let Some(value) = patch.format {
            self.format = value.to_lowercase();
        }
        if let Some(value) = patch.file {
            self.file = Some(value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.as_str()) {
            return Err(ArchiveError::Config(format!(
                "unknown log level {} (expected one of {})",
                self.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&self.format.as_str()) {
            return Err(ArchiveError::Config(format!(
                "unknown log format {} (expected text or json)",
                self.format
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

fn merge_retry(retry: &mut RetryConfig, patch: RetryPatch) {
    if let Some(value) = patch.enabled {
        retry.enabled = value;
    }
    if let Some(value) = patch.max_attempts {
        retry.max_attempts = value;
    }
    if let Some(value) = patch.initial_delay {
        retry.initial_delay = value;
    }
    if let Some(value) = patch.multiplier {
        retry.multiplier = value;
    }
    if let Some(value) = patch.max_delay {
        retry.max_delay = value;
    }
    if let Some(value) = patch.jitter {
        retry.jitter = value;
    }
    if let Some(value) = patch.seed {
        retry.seed = Some(value);
    }
}

fn validate_retry(retry: &RetryConfig) -> Result<()> {
    if retry.max_attempts == 0 {
        return Err(ArchiveError::Config(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }
    for (name, value) in [
        ("initial_delay", retry.initial_delay),
        ("max_delay", retry.max_delay),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ArchiveError::Config(format!(
                "retry.{name} must be a non-negative number, got {value}"
            )));
        }
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ArchiveError::Config(format!(
            "retry.multiplier must be >= 1.0, got {}",
            retry.multiplier
        )));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ArchiveError::Config(format!(
            "retry.jitter must be within [0, 1], got {}",
            retry.jitter
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker pool size for batch restore.
    #[serde(default)]
    pub concurrent: usize,
    /// Report aggregate progress every N completed items.
    #[serde(default)]
    pub progress_interval: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrent: 5,
            progress_interval: 10,
        }
    }
}

impl BatchConfig {
    fn merge(&mut self, patch: BatchPatch) {
        if let Some(value) = patch.concurrent {
            self.concurrent = value;
        }
        if let Some(value) = patch.progress_interval {
            self.progress_interval = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent == 0 {
            return Err(ArchiveError::Config(
                "batch.concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Operations slower than this are logged at warn level.
    #[serde(default)]
    pub slow_operation_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_operation_ms: 1_000,
        }
    }
}

impl PerformanceConfig {
    fn merge(&mut self, patch: PerformancePatch) {
        if let Some(value) = patch.enabled {
            self.enabled = value;
        }
        if let Some(value) = patch.slow_operation_ms {
            self.slow_operation_ms = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default)]
    pub dir: PathBuf,
    /// Default actor recorded when a command does not name one.
    #[serde(default)]
    pub actor: String,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".codex/evidence"),
            actor: "codex".to_string(),
        }
    }
}

impl EvidenceConfig {
    fn merge(&mut self, patch: EvidencePatch) {
        if let Some(value) = patch.dir {
            self.dir = value;
        }
        if let Some(value) = patch.actor {
            self.actor = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Glob patterns skipped by the planners.
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub age_days: u64,
    #[serde(default)]
    pub staleness: StalenessPolicy,
    #[serde(default)]
    pub similarity: SimilarityPolicy,
    #[serde(default)]
    pub canon: CanonPolicy,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            excludes: vec![
                ".git/**".to_string(),
                ".codex/**".to_string(),
                "target/**".to_string(),
                "node_modules/**".to_string(),
                "**/__pycache__/**".to_string(),
            ],
            age_days: 180,
            staleness: StalenessPolicy::default(),
            similarity: SimilarityPolicy::default(),
            canon: CanonPolicy::default(),
        }
    }
}

impl PlanConfig {
    fn merge(&mut self, patch: PlanPatch) {
        if let Some(value) = patch.excludes {
            self.excludes = value;
        }
        if let Some(value) = patch.age_days {
            self.age_days = value;
        }
        // Policy tables replace the defaults wholesale; missing keys take defaults.
        if let Some(value) = patch.staleness {
            self.staleness = value;
        }
        if let Some(value) = patch.similarity {
            self.similarity = value;
        }
        if let Some(value) = patch.canon {
            self.canon = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let staleness = &self.staleness;
        if !(0.0..=1.0).contains(&staleness.threshold) {
            return Err(ArchiveError::Config(format!(
                "plan.staleness.threshold must be within [0, 1], got {}",
                staleness.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity.jaccard_min) {
            return Err(ArchiveError::Config(format!(
                "plan.similarity.jaccard_min must be within [0, 1], got {}",
                self.similarity.jaccard_min
            )));
        }
        if self.similarity.shingle_size == 0 {
            return Err(ArchiveError::Config(
                "plan.similarity.shingle_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub backend: Option<BackendPatch>,
    pub logging: Option<LoggingPatch>,
    pub retry: Option<RetryPatch>,
    pub batch: Option<BatchPatch>,
    pub performance: Option<PerformancePatch>,
    pub evidence: Option<EvidencePatch>,
    pub plan: Option<PlanPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BackendPatch {
    pub backend: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoggingPatch {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RetryPatch {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay: Option<f64>,
    pub multiplier: Option<f64>,
    pub max_delay: Option<f64>,
    pub jitter: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BatchPatch {
    pub concurrent: Option<usize>,
    pub progress_interval: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PerformancePatch {
    pub enabled: Option<bool>,
    pub slow_operation_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EvidencePatch {
    pub dir: Option<PathBuf>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PlanPatch {
    pub excludes: Option<Vec<String>>,
    pub age_days: Option<u64>,
    pub staleness: Option<StalenessPolicy>,
    pub similarity: Option<SimilarityPolicy>,
    pub canon: Option<CanonPolicy>,
}
