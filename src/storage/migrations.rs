//! SQLite migrations

use rusqlite::Connection;

use crate::error::Result;

pub(crate) const MIGRATIONS: [&str; 2] = [
    include_str!("../../migrations/001_archive_schema.sql"),
    include_str!("../../migrations/002_release_schema.sql"),
];

#[allow(clippy::cast_possible_truncation)]
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Apply every migration newer than `PRAGMA user_version`.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let current_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    for (target_version, sql) in (1..).zip(MIGRATIONS.iter()) {
        if current_version >= target_version {
            continue;
        }

        conn.execute_batch(sql)?;
        conn.pragma_update(None, "user_version", target_version)?;
    }

    Ok(SCHEMA_VERSION)
}
