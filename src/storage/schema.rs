//! DDL per backend.
//!
//! SQLite uses the versioned migrations; the server backends run idempotent
//! `CREATE TABLE IF NOT EXISTS` statements on every `ensure_schema`.

use super::BackendKind;
use super::migrations::MIGRATIONS;

const POSTGRES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tombstone (
        id          TEXT PRIMARY KEY,
        sha256      TEXT NOT NULL,
        repo        TEXT NOT NULL,
        path        TEXT NOT NULL,
        actor       TEXT NOT NULL,
        reason      TEXT NOT NULL,
        commit_sha  TEXT,
        mime        TEXT,
        lang        TEXT,
        size_bytes  BIGINT NOT NULL,
        codec       TEXT NOT NULL DEFAULT 'identity',
        created_at  TEXT NOT NULL,
        payload     BYTEA NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tombstone_sha256 ON tombstone(sha256)",
    "CREATE TABLE IF NOT EXISTS tombstone_link (
        id          BIGSERIAL PRIMARY KEY,
        duplicate   TEXT NOT NULL REFERENCES tombstone(id),
        canonical   TEXT NOT NULL REFERENCES tombstone(id),
        created_at  TEXT NOT NULL,
        UNIQUE (duplicate, canonical)
    )",
    "CREATE TABLE IF NOT EXISTS release_meta (
        id          BIGSERIAL PRIMARY KEY,
        release_id  TEXT NOT NULL UNIQUE,
        version     TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        target      TEXT,
        metadata    TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS release_component (
        id               BIGSERIAL PRIMARY KEY,
        release_meta_id  BIGINT NOT NULL REFERENCES release_meta(id),
        tombstone        TEXT NOT NULL,
        dest_path        TEXT NOT NULL,
        mode             TEXT NOT NULL DEFAULT '0644',
        type             TEXT NOT NULL DEFAULT 'file',
        template_vars    TEXT
    )",
];

const MARIADB: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tombstone (
        id          VARCHAR(36) PRIMARY KEY,
        sha256      CHAR(64) NOT NULL,
        repo        VARCHAR(512) NOT NULL,
        path        TEXT NOT NULL,
        actor       VARCHAR(255) NOT NULL,
        reason      TEXT NOT NULL,
        commit_sha  VARCHAR(64),
        mime        VARCHAR(255),
        lang        VARCHAR(64),
        size_bytes  BIGINT NOT NULL,
        codec       VARCHAR(32) NOT NULL DEFAULT 'identity',
        created_at  VARCHAR(40) NOT NULL,
        payload     LONGBLOB NOT NULL,
        INDEX idx_tombstone_sha256 (sha256)
    )",
    "CREATE TABLE IF NOT EXISTS tombstone_link (
        id          BIGINT AUTO_INCREMENT PRIMARY KEY,
        duplicate   VARCHAR(36) NOT NULL,
        canonical   VARCHAR(36) NOT NULL,
        created_at  VARCHAR(40) NOT NULL,
        UNIQUE KEY uq_link (duplicate, canonical),
        FOREIGN KEY (duplicate) REFERENCES tombstone(id),
        FOREIGN KEY (canonical) REFERENCES tombstone(id)
    )",
    "CREATE TABLE IF NOT EXISTS release_meta (
        id          BIGINT AUTO_INCREMENT PRIMARY KEY,
        release_id  VARCHAR(255) NOT NULL UNIQUE,
        version     VARCHAR(64) NOT NULL,
        created_at  VARCHAR(40) NOT NULL,
        actor       VARCHAR(255) NOT NULL,
        target      VARCHAR(255),
        metadata    LONGTEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS release_component (
        id               BIGINT AUTO_INCREMENT PRIMARY KEY,
        release_meta_id  BIGINT NOT NULL,
        tombstone        VARCHAR(36) NOT NULL,
        dest_path        TEXT NOT NULL,
        mode             VARCHAR(8) NOT NULL DEFAULT '0644',
        type             VARCHAR(16) NOT NULL DEFAULT 'file',
        template_vars    LONGTEXT,
        FOREIGN KEY (release_meta_id) REFERENCES release_meta(id)
    )",
];

/// DDL statements for `kind`, in execution order.
#[must_use]
pub fn schema_statements(kind: BackendKind) -> Vec<&'static str> {
    match kind {
        BackendKind::Sqlite => MIGRATIONS.to_vec(),
        BackendKind::Postgres => POSTGRES.to_vec(),
        BackendKind::Mariadb => MARIADB.to_vec(),
    }
}
