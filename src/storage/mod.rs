//! Archive persistence.
//!
//! One [`ArchiveDal`] implementation per backend. The backend is chosen once
//! by [`open_dal`] from a [`BackendConfig`]; callers only see the trait.
//! Connections are opened per unit of work and closed afterwards.

pub mod mariadb;
pub mod migrations;
pub mod postgres;
pub mod schema;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BackendConfig;
use crate::env::EnvSnapshot;
use crate::error::{ArchiveError, Result};

pub use mariadb::MariaDbDal;
pub use postgres::PostgresDal;
pub use sqlite::SqliteDal;

/// Tables whose names may appear in dynamically composed SQL.
pub const ARCHIVE_TABLES: &[&str] = &[
    "tombstone",
    "tombstone_link",
    "release_meta",
    "release_component",
];

/// Supported persistence backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgres,
    Mariadb,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mariadb => "mariadb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mariadb" | "mysql" => Ok(Self::Mariadb),
            other => Err(ArchiveError::Validation(format!(
                "unknown backend {other:?} (expected sqlite, postgres or mariadb)"
            ))),
        }
    }
}

/// Return `name` unchanged if it is in `allowed`, else fail.
///
/// Every identifier interpolated into SQL text goes through here.
pub fn validate_identifier<'a>(name: &'a str, allowed: &[&str]) -> Result<&'a str> {
    if allowed.contains(&name) {
        Ok(name)
    } else {
        Err(ArchiveError::Validation(format!(
            "identifier {name:?} is not allowed"
        )))
    }
}

/// Input for [`ArchiveDal::create_tombstone`].
#[derive(Debug, Clone)]
pub struct NewTombstone {
    pub sha256: String,
    pub repo: String,
    pub path: String,
    pub actor: String,
    pub reason: String,
    pub commit_sha: Option<String>,
    pub mime: Option<String>,
    pub lang: Option<String>,
    pub size_bytes: u64,
    pub codec: String,
    /// Encoded payload as persisted.
    pub payload: Vec<u8>,
}

/// Tombstone metadata as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneRecord {
    pub id: String,
    pub sha256: String,
    pub repo: String,
    pub path: String,
    pub actor: String,
    pub reason: String,
    pub commit_sha: Option<String>,
    pub mime: Option<String>,
    pub lang: Option<String>,
    pub size_bytes: u64,
    pub codec: String,
    pub created_at: String,
}

/// A tombstone row together with its encoded payload.
#[derive(Debug, Clone)]
pub struct StoredTombstone {
    pub record: TombstoneRecord,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneLink {
    pub duplicate: String,
    pub canonical: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewReleaseMeta {
    pub release_id: String,
    pub version: String,
    pub created_at: String,
    pub actor: String,
    pub target: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMetaRow {
    pub id: i64,
    pub release_id: String,
    pub version: String,
    pub created_at: String,
    pub actor: String,
    pub target: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewReleaseComponent {
    pub release_meta_id: i64,
    pub tombstone: String,
    pub dest_path: String,
    pub mode: String,
    pub template_vars: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseComponentRow {
    pub id: i64,
    pub release_meta_id: i64,
    pub tombstone: String,
    pub dest_path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub template_vars: Option<Value>,
}

/// Aggregate counts across the archive tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub tombstones: u64,
    pub total_bytes: u64,
    pub links: u64,
    pub releases: u64,
    pub components: u64,
}

/// Persistence operations shared by every backend.
pub trait ArchiveDal: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Connection string as configured (callers redact before logging).
    fn url(&self) -> &str;

    /// Create missing tables. Idempotent.
    fn ensure_schema(&self) -> Result<()>;

    /// Insert a tombstone and return its new id.
    fn create_tombstone(&self, tombstone: &NewTombstone) -> Result<String>;

    fn get_tombstone(&self, id: &str) -> Result<Option<StoredTombstone>>;

    /// Record that `duplicate` is redundant with `canonical`. Idempotent.
    fn link_duplicate(&self, duplicate: &str, canonical: &str) -> Result<()>;

    /// Links where `tombstone` is either side.
    fn links_for(&self, tombstone: &str) -> Result<Vec<TombstoneLink>>;

    fn list_recent(&self, limit: usize) -> Result<Vec<TombstoneRecord>>;

    fn summary(&self) -> Result<ArchiveSummary>;

    fn create_release_meta(&self, meta: &NewReleaseMeta) -> Result<ReleaseMetaRow>;

    fn get_release_meta_by_release_id(&self, release_id: &str) -> Result<Option<ReleaseMetaRow>>;

    fn add_release_component(&self, component: &NewReleaseComponent)
    -> Result<ReleaseComponentRow>;

    fn list_release_components(&self, release_meta_id: i64) -> Result<Vec<ReleaseComponentRow>>;
}

/// Open the backend named by `config` and make sure its schema exists.
pub fn open_dal(config: &BackendConfig) -> Result<Box<dyn ArchiveDal>> {
    config.validate()?;
    let dal: Box<dyn ArchiveDal> = match config.kind()? {
        BackendKind::Sqlite => Box::new(SqliteDal::from_url(&config.url)?),
        BackendKind::Postgres => Box::new(PostgresDal::from_url(&config.url)?),
        BackendKind::Mariadb => Box::new(MariaDbDal::from_url(&config.url)?),
    };
    dal.ensure_schema()?;
    Ok(dal)
}

/// Select the backend from `CODEX_ARCHIVE_BACKEND` / `CODEX_ARCHIVE_URL`.
pub fn from_env(env: &EnvSnapshot) -> Result<Box<dyn ArchiveDal>> {
    let mut config = BackendConfig::default();
    if let Some(backend) = env.get_string("CODEX_ARCHIVE_BACKEND") {
        config.backend = backend.to_lowercase();
    }
    if let Some(url) = env.get("CODEX_ARCHIVE_URL") {
        config.url = url.trim().to_string();
    }
    open_dal(&config)
}

/// Fresh tombstone identifier.
pub(crate) fn new_tombstone_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Row-count query for an allow-listed table.
pub(crate) fn count_sql(table: &str) -> Result<String> {
    let table = validate_identifier(table, ARCHIVE_TABLES)?;
    Ok(format!("SELECT COUNT(*) FROM {table}"))
}
