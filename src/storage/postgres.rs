//! PostgreSQL backend (sqlx).
//!
//! Each operation opens a connection on a throwaway current-thread runtime,
//! runs its statements and closes the connection.

use std::future::Future;

use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Connection, Row};
use tracing::debug;

use super::{
    ArchiveDal, ArchiveSummary, BackendKind, NewReleaseComponent, NewReleaseMeta, NewTombstone,
    ReleaseComponentRow, ReleaseMetaRow, StoredTombstone, TombstoneLink, TombstoneRecord,
    count_sql, new_tombstone_id, now_rfc3339, schema,
};
use crate::error::{ArchiveError, Result};
use crate::utils::redact::redact_url_credentials;

const TOMBSTONE_COLUMNS: &str = "id, sha256, repo, path, actor, reason, commit_sha, mime, lang, \
                                 size_bytes, codec, created_at";

#[derive(Debug, Clone)]
pub struct PostgresDal {
    url: String,
}

impl PostgresDal {
    pub fn from_url(url: &str) -> Result<Self> {
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ArchiveError::Validation(format!(
                "not a postgres url: {}",
                redact_url_credentials(url)
            )));
        }
        Ok(Self {
            url: url.to_string(),
        })
    }

    /// Run one unit of work on a fresh connection.
    fn with_conn<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(PgConnection) -> Fut,
        Fut: Future<Output = Result<(T, PgConnection)>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async {
            let conn = PgConnection::connect(&self.url).await?;
            let (value, conn) = work(conn).await?;
            conn.close().await?;
            Ok::<T, ArchiveError>(value)
        })
    }
}

impl ArchiveDal for PostgresDal {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|mut conn| async move {
            for statement in schema::schema_statements(BackendKind::Postgres) {
                sqlx::query(statement).execute(&mut conn).await?;
            }
            Ok(((), conn))
        })?;
        debug!(url = %redact_url_credentials(&self.url), "postgres schema ready");
        Ok(())
    }

    fn create_tombstone(&self, tombstone: &NewTombstone) -> Result<String> {
        let id = new_tombstone_id();
        let insert_id = id.clone();
        self.with_conn(|mut conn| async move {
            sqlx::query(
                "INSERT INTO tombstone (id, sha256, repo, path, actor, reason, commit_sha, mime,
                                        lang, size_bytes, codec, created_at, payload)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(&insert_id)
            .bind(&tombstone.sha256)
            .bind(&tombstone.repo)
            .bind(&tombstone.path)
            .bind(&tombstone.actor)
            .bind(&tombstone.reason)
            .bind(&tombstone.commit_sha)
            .bind(&tombstone.mime)
            .bind(&tombstone.lang)
            .bind(i64::try_from(tombstone.size_bytes).unwrap_or(i64::MAX))
            .bind(&tombstone.codec)
            .bind(now_rfc3339())
            .bind(&tombstone.payload)
            .execute(&mut conn)
            .await?;
            Ok(((), conn))
        })?;
        Ok(id)
    }

    fn get_tombstone(&self, id: &str) -> Result<Option<StoredTombstone>> {
        self.with_conn(|mut conn| async move {
            let sql = format!("SELECT {TOMBSTONE_COLUMNS}, payload FROM tombstone WHERE id = $1");
            let row = sqlx::query(&sql).bind(id).fetch_optional(&mut conn).await?;
            let stored = row
                .map(|row| -> Result<StoredTombstone> {
                    Ok(StoredTombstone {
                        record: tombstone_from_row(&row)?,
                        payload: row.try_get("payload")?,
                    })
                })
                .transpose()?;
            Ok((stored, conn))
        })
    }

    fn link_duplicate(&self, duplicate: &str, canonical: &str) -> Result<()> {
        self.with_conn(|mut conn| async move {
            sqlx::query(
                "INSERT INTO tombstone_link (duplicate, canonical, created_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (duplicate, canonical) DO NOTHING",
            )
            .bind(duplicate)
            .bind(canonical)
            .bind(now_rfc3339())
            .execute(&mut conn)
            .await?;
            Ok(((), conn))
        })
    }

    fn links_for(&self, tombstone: &str) -> Result<Vec<TombstoneLink>> {
        self.with_conn(|mut conn| async move {
            let rows = sqlx::query(
                "SELECT duplicate, canonical, created_at FROM tombstone_link
                 WHERE duplicate = $1 OR canonical = $1 ORDER BY id",
            )
            .bind(tombstone)
            .fetch_all(&mut conn)
            .await?;
            let links = rows
                .iter()
                .map(|row| -> std::result::Result<TombstoneLink, sqlx::Error> {
                    Ok(TombstoneLink {
                        duplicate: row.try_get("duplicate")?,
                        canonical: row.try_get("canonical")?,
                        created_at: row.try_get("created_at")?,
                    })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
            Ok((links, conn))
        })
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<TombstoneRecord>> {
        self.with_conn(|mut conn| async move {
            let sql = format!(
                "SELECT {TOMBSTONE_COLUMNS} FROM tombstone ORDER BY created_at DESC, id LIMIT $1"
            );
            let rows = sqlx::query(&sql)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&mut conn)
                .await?;
            let records = rows
                .iter()
                .map(tombstone_from_row)
                .collect::<Result<Vec<_>>>()?;
            Ok((records, conn))
        })
    }

    fn summary(&self) -> Result<ArchiveSummary> {
        self.with_conn(|mut conn| async move {
            let mut counts = [0u64; 4];
            for (slot, table) in counts.iter_mut().zip([
                "tombstone",
                "tombstone_link",
                "release_meta",
                "release_component",
            ]) {
                let (n,): (i64,) = sqlx::query_as(&count_sql(table)?)
                    .fetch_one(&mut conn)
                    .await?;
                *slot = u64::try_from(n).unwrap_or(0);
            }
            let (bytes,): (i64,) =
                sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0)::BIGINT FROM tombstone")
                    .fetch_one(&mut conn)
                    .await?;
            let summary = ArchiveSummary {
                tombstones: counts[0],
                total_bytes: u64::try_from(bytes).unwrap_or(0),
                links: counts[1],
                releases: counts[2],
                components: counts[3],
            };
            Ok((summary, conn))
        })
    }

    fn create_release_meta(&self, meta: &NewReleaseMeta) -> Result<ReleaseMetaRow> {
        let metadata = serde_json::to_string(&meta.metadata)?;
        self.with_conn(|mut conn| async move {
            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO release_meta (release_id, version, created_at, actor, target, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(&meta.release_id)
            .bind(&meta.version)
            .bind(&meta.created_at)
            .bind(&meta.actor)
            .bind(&meta.target)
            .bind(&metadata)
            .fetch_one(&mut conn)
            .await?;
            let row = ReleaseMetaRow {
                id,
                release_id: meta.release_id.clone(),
                version: meta.version.clone(),
                created_at: meta.created_at.clone(),
                actor: meta.actor.clone(),
                target: meta.target.clone(),
                metadata: meta.metadata.clone(),
            };
            Ok((row, conn))
        })
    }

    fn get_release_meta_by_release_id(&self, release_id: &str) -> Result<Option<ReleaseMetaRow>> {
        self.with_conn(|mut conn| async move {
            let row = sqlx::query(
                "SELECT id, release_id, version, created_at, actor, target, metadata
                 FROM release_meta WHERE release_id = $1",
            )
            .bind(release_id)
            .fetch_optional(&mut conn)
            .await?;
            let meta = row
                .map(|row| -> Result<ReleaseMetaRow> {
                    let metadata: String = row.try_get("metadata")?;
                    Ok(ReleaseMetaRow {
                        id: row.try_get("id")?,
                        release_id: row.try_get("release_id")?,
                        version: row.try_get("version")?,
                        created_at: row.try_get("created_at")?,
                        actor: row.try_get("actor")?,
                        target: row.try_get("target")?,
                        metadata: serde_json::from_str(&metadata)?,
                    })
                })
                .transpose()?;
            Ok((meta, conn))
        })
    }

    fn add_release_component(
        &self,
        component: &NewReleaseComponent,
    ) -> Result<ReleaseComponentRow> {
        let template_vars = component
            .template_vars
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|mut conn| async move {
            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO release_component (release_meta_id, tombstone, dest_path, mode, type,
                                                template_vars)
                 VALUES ($1, $2, $3, $4, 'file', $5) RETURNING id",
            )
            .bind(component.release_meta_id)
            .bind(&component.tombstone)
            .bind(&component.dest_path)
            .bind(&component.mode)
            .bind(&template_vars)
            .fetch_one(&mut conn)
            .await?;
            let row = ReleaseComponentRow {
                id,
                release_meta_id: component.release_meta_id,
                tombstone: component.tombstone.clone(),
                dest_path: component.dest_path.clone(),
                mode: component.mode.clone(),
                kind: "file".to_string(),
                template_vars: component.template_vars.clone(),
            };
            Ok((row, conn))
        })
    }

    fn list_release_components(&self, release_meta_id: i64) -> Result<Vec<ReleaseComponentRow>> {
        self.with_conn(|mut conn| async move {
            let rows = sqlx::query(
                "SELECT id, release_meta_id, tombstone, dest_path, mode, type, template_vars
                 FROM release_component WHERE release_meta_id = $1 ORDER BY id",
            )
            .bind(release_meta_id)
            .fetch_all(&mut conn)
            .await?;
            let components = rows
                .iter()
                .map(component_from_row)
                .collect::<Result<Vec<_>>>()?;
            Ok((components, conn))
        })
    }
}

fn tombstone_from_row(row: &PgRow) -> Result<TombstoneRecord> {
    let size: i64 = row.try_get("size_bytes")?;
    Ok(TombstoneRecord {
        id: row.try_get("id")?,
        sha256: row.try_get("sha256")?,
        repo: row.try_get("repo")?,
        path: row.try_get("path")?,
        actor: row.try_get("actor")?,
        reason: row.try_get("reason")?,
        commit_sha: row.try_get("commit_sha")?,
        mime: row.try_get("mime")?,
        lang: row.try_get("lang")?,
        size_bytes: u64::try_from(size).unwrap_or(0),
        codec: row.try_get("codec")?,
        created_at: row.try_get("created_at")?,
    })
}

fn component_from_row(row: &PgRow) -> Result<ReleaseComponentRow> {
    let vars: Option<String> = row.try_get("template_vars")?;
    Ok(ReleaseComponentRow {
        id: row.try_get("id")?,
        release_meta_id: row.try_get("release_meta_id")?,
        tombstone: row.try_get("tombstone")?,
        dest_path: row.try_get("dest_path")?,
        mode: row.try_get("mode")?,
        kind: row.try_get("type")?,
        template_vars: vars.map(|raw| serde_json::from_str(&raw)).transpose()?,
    })
}
