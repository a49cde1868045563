//! SQLite backend (rusqlite).

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::{
    ArchiveDal, ArchiveSummary, BackendKind, NewReleaseComponent, NewReleaseMeta, NewTombstone,
    ReleaseComponentRow, ReleaseMetaRow, StoredTombstone, TombstoneLink, TombstoneRecord,
    count_sql, migrations, new_tombstone_id, now_rfc3339,
};
use crate::error::{ArchiveError, Result};

const TOMBSTONE_COLUMNS: &str = "id, sha256, repo, path, actor, reason, commit_sha, mime, lang, \
                                 size_bytes, codec, created_at";

#[derive(Debug, Clone)]
pub struct SqliteDal {
    path: PathBuf,
    url: String,
}

impl SqliteDal {
    /// Parse `sqlite:///relative/path` or `sqlite:////absolute/path`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("sqlite://").ok_or_else(|| {
            ArchiveError::Validation(format!("not a sqlite url: {url}"))
        })?;
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        if rest.is_empty() || rest.contains(":memory:") {
            return Err(ArchiveError::Validation(format!(
                "sqlite url must name a database file: {url}"
            )));
        }
        Ok(Self {
            path: PathBuf::from(rest),
            url: url.to_string(),
        })
    }

    /// Open a database file directly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dal = Self {
            url: format!("sqlite:///{}", path.display()),
            path,
        };
        dal.ensure_schema()?;
        Ok(dal)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One connection per unit of work.
    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        Self::configure_pragmas(&conn)?;
        Ok(conn)
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn count(conn: &Connection, table: &str) -> Result<u64> {
        let n: i64 = conn.query_row(&count_sql(table)?, [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

impl ArchiveDal for SqliteDal {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        let version = migrations::run_migrations(&conn)?;
        debug!(path = %self.path.display(), version, "sqlite schema ready");
        Ok(())
    }

    fn create_tombstone(&self, tombstone: &NewTombstone) -> Result<String> {
        let conn = self.connect()?;
        let id = new_tombstone_id();
        conn.execute(
            "INSERT INTO tombstone (id, sha256, repo, path, actor, reason, commit_sha, mime, lang,
                                    size_bytes, codec, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                tombstone.sha256,
                tombstone.repo,
                tombstone.path,
                tombstone.actor,
                tombstone.reason,
                tombstone.commit_sha,
                tombstone.mime,
                tombstone.lang,
                i64::try_from(tombstone.size_bytes).unwrap_or(i64::MAX),
                tombstone.codec,
                now_rfc3339(),
                tombstone.payload,
            ],
        )?;
        Ok(id)
    }

    fn get_tombstone(&self, id: &str) -> Result<Option<StoredTombstone>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {TOMBSTONE_COLUMNS}, payload FROM tombstone WHERE id = ?1");
        let stored = conn
            .query_row(&sql, [id], |row| {
                Ok(StoredTombstone {
                    record: tombstone_from_row(row)?,
                    payload: row.get(12)?,
                })
            })
            .optional()?;
        Ok(stored)
    }

    fn link_duplicate(&self, duplicate: &str, canonical: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO tombstone_link (duplicate, canonical, created_at)
             VALUES (?1, ?2, ?3)",
            params![duplicate, canonical, now_rfc3339()],
        )?;
        Ok(())
    }

    fn links_for(&self, tombstone: &str) -> Result<Vec<TombstoneLink>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT duplicate, canonical, created_at FROM tombstone_link
             WHERE duplicate = ?1 OR canonical = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([tombstone], |row| {
            Ok(TombstoneLink {
                duplicate: row.get(0)?,
                canonical: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<TombstoneRecord>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {TOMBSTONE_COLUMNS} FROM tombstone ORDER BY created_at DESC, id LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], tombstone_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn summary(&self) -> Result<ArchiveSummary> {
        let conn = self.connect()?;
        let total_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM tombstone",
            [],
            |row| row.get(0),
        )?;
        Ok(ArchiveSummary {
            tombstones: Self::count(&conn, "tombstone")?,
            total_bytes: u64::try_from(total_bytes).unwrap_or(0),
            links: Self::count(&conn, "tombstone_link")?,
            releases: Self::count(&conn, "release_meta")?,
            components: Self::count(&conn, "release_component")?,
        })
    }

    fn create_release_meta(&self, meta: &NewReleaseMeta) -> Result<ReleaseMetaRow> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO release_meta (release_id, version, created_at, actor, target, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.release_id,
                meta.version,
                meta.created_at,
                meta.actor,
                meta.target,
                serde_json::to_string(&meta.metadata)?,
            ],
        )?;
        Ok(ReleaseMetaRow {
            id: conn.last_insert_rowid(),
            release_id: meta.release_id.clone(),
            version: meta.version.clone(),
            created_at: meta.created_at.clone(),
            actor: meta.actor.clone(),
            target: meta.target.clone(),
            metadata: meta.metadata.clone(),
        })
    }

    fn get_release_meta_by_release_id(&self, release_id: &str) -> Result<Option<ReleaseMetaRow>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, release_id, version, created_at, actor, target, metadata
                 FROM release_meta WHERE release_id = ?1",
                [release_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(id, release_id, version, created_at, actor, target, metadata)| -> Result<ReleaseMetaRow> {
            Ok(ReleaseMetaRow {
                id,
                release_id,
                version,
                created_at,
                actor,
                target,
                metadata: serde_json::from_str(&metadata)?,
            })
        })
        .transpose()
    }

    fn add_release_component(
        &self,
        component: &NewReleaseComponent,
    ) -> Result<ReleaseComponentRow> {
        let conn = self.connect()?;
        let template_vars = component
            .template_vars
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO release_component (release_meta_id, tombstone, dest_path, mode, type,
                                            template_vars)
             VALUES (?1, ?2, ?3, ?4, 'file', ?5)",
            params![
                component.release_meta_id,
                component.tombstone,
                component.dest_path,
                component.mode,
                template_vars,
            ],
        )?;
        Ok(ReleaseComponentRow {
            id: conn.last_insert_rowid(),
            release_meta_id: component.release_meta_id,
            tombstone: component.tombstone.clone(),
            dest_path: component.dest_path.clone(),
            mode: component.mode.clone(),
            kind: "file".to_string(),
            template_vars: component.template_vars.clone(),
        })
    }

    fn list_release_components(&self, release_meta_id: i64) -> Result<Vec<ReleaseComponentRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, release_meta_id, tombstone, dest_path, mode, type, template_vars
             FROM release_component WHERE release_meta_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([release_meta_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, release_meta_id, tombstone, dest_path, mode, kind, vars) = row?;
            out.push(ReleaseComponentRow {
                id,
                release_meta_id,
                tombstone,
                dest_path,
                mode,
                kind,
                template_vars: vars.map(|raw| serde_json::from_str(&raw)).transpose()?,
            });
        }
        Ok(out)
    }
}

fn tombstone_from_row(row: &Row<'_>) -> rusqlite::Result<TombstoneRecord> {
    let size: i64 = row.get(9)?;
    Ok(TombstoneRecord {
        id: row.get(0)?,
        sha256: row.get(1)?,
        repo: row.get(2)?,
        path: row.get(3)?,
        actor: row.get(4)?,
        reason: row.get(5)?,
        commit_sha: row.get(6)?,
        mime: row.get(7)?,
        lang: row.get(8)?,
        size_bytes: u64::try_from(size).unwrap_or(0),
        codec: row.get(10)?,
        created_at: row.get(11)?,
    })
}
