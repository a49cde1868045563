//! Append-only JSONL audit trail.
//!
//! Every archive and release operation appends one line to
//! `<evidence dir>/archive_ops.jsonl`. Lines are never rewritten. Appends take
//! an exclusive advisory lock on the log file so concurrent writers (threads or
//! processes) cannot interleave partial lines.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::utils::redact::redact_text_credentials;

/// Default log file name inside the evidence directory.
pub const EVIDENCE_FILE: &str = "archive_ops.jsonl";

/// Fields every evidence record must carry.
pub const REQUIRED_FIELDS: [&str; 5] = ["action", "actor", "tool", "repo", "context"];

#[derive(Debug, Clone)]
pub struct EvidenceLog {
    dir: PathBuf,
    commit: Option<String>,
}

impl EvidenceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            commit: None,
        }
    }

    /// Commit SHA merged into every record's `meta`.
    #[must_use]
    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(EVIDENCE_FILE)
    }

    /// Append `payload` as one line of `<dir>/<filename>`.
    ///
    /// Required fields are checked before the file is touched. `ts` is filled
    /// in when absent, `meta` is merged, and string values are redacted.
    pub fn append_evidence(&self, filename: &str, payload: Value) -> Result<()> {
        let Value::Object(mut record) = payload else {
            return Err(ArchiveError::Validation(
                "evidence payload must be a JSON object".to_string(),
            ));
        };
        validate_filename(filename)?;
        validate_required(&record)?;

        record
            .entry("ts")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let meta = record
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(meta) = meta {
            meta.entry("commit")
                .or_insert_with(|| self.commit.clone().map_or(Value::Null, Value::String));
            meta.entry("runtime")
                .or_insert_with(|| json!(concat!("codex-archive/", env!("CARGO_PKG_VERSION"))));
            meta.entry("os")
                .or_insert_with(|| json!(std::env::consts::OS));
        }

        let mut record = Value::Object(record);
        redact_strings(&mut record);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.lock_exclusive()?;
        let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        let unlocked = FileExt::unlock(&file);
        written?;
        unlocked?;

        debug!(path = %path.display(), "evidence appended");
        Ok(())
    }

    /// Append a standard record to the archive operations log.
    pub fn evidence_append(
        &self,
        action: &str,
        actor: &str,
        tool: &str,
        repo: &str,
        context: Value,
    ) -> Result<()> {
        self.append_evidence(
            EVIDENCE_FILE,
            json!({
                "action": action,
                "actor": actor,
                "tool": tool,
                "repo": repo,
                "context": context,
            }),
        )
    }

    /// Every record of the archive operations log, oldest first.
    pub fn read_all(&self) -> Result<Vec<Value>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let ok = !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && filename != "."
        && filename != "..";
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::Validation(format!(
            "evidence filename must be a plain file name: {filename:?}"
        )))
    }
}

fn validate_required(record: &Map<String, Value>) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| match record.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ArchiveError::Validation(format!(
            "evidence record missing required fields: {}",
            missing.join(", ")
        )))
    }
}

fn redact_strings(value: &mut Value) {
    match value {
        Value::String(s) => {
            let redacted = redact_text_credentials(s);
            if redacted != *s {
                *s = redacted;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_strings),
        Value::Object(map) => map.values_mut().for_each(redact_strings),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log() -> (TempDir, EvidenceLog) {
        let dir = TempDir::new().unwrap();
        let log = EvidenceLog::new(dir.path().join("evidence")).with_commit(Some("abc123".into()));
        (dir, log)
    }

    // ===== validation =====

    #[test]
    fn missing_fields_fail_before_any_write() {
        let (_dir, log) = log();
        let err = log
            .append_evidence(EVIDENCE_FILE, json!({"action": "STORE", "actor": "a"}))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
        assert!(err.to_string().contains("tool"));
        assert!(!log.dir().exists());
    }

    #[test]
    fn empty_string_field_counts_as_missing() {
        let (_dir, log) = log();
        let err = log
            .evidence_append("STORE", "", "archive", "repo", json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("actor"));
    }

    #[test]
    fn rejects_path_like_filename() {
        let (_dir, log) = log();
        let payload = json!({"action": "a", "actor": "b", "tool": "c", "repo": "d", "context": {}});
        assert!(log.append_evidence("../escape.jsonl", payload).is_err());
    }

    // ===== record shape =====

    #[test]
    fn record_has_ts_and_meta() {
        let (_dir, log) = log();
        log.evidence_append("STORE", "alice", "archive", "codex", json!({"path": "a.py"}))
            .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["action"], "STORE");
        assert!(record["ts"].as_str().is_some());
        assert_eq!(record["meta"]["commit"], "abc123");
        assert_eq!(record["meta"]["os"], std::env::consts::OS);
        assert_eq!(record["context"]["path"], "a.py");
    }

    #[test]
    fn credentials_are_redacted() {
        let (_dir, log) = log();
        log.evidence_append(
            "RESTORE_FAIL",
            "alice",
            "archive",
            "codex",
            json!({"url": "postgresql://admin:hunter2@db/archive"}),
        )
        .unwrap();

        let raw = std::fs::read_to_string(log.log_path()).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("postgresql://***@db/archive"));
    }

    // ===== append-only =====

    #[test]
    fn earlier_bytes_are_never_rewritten() {
        let (_dir, log) = log();
        let mut snapshots = Vec::new();
        for i in 0..5 {
            log.evidence_append("STORE", "alice", "archive", "codex", json!({ "i": i }))
                .unwrap();
            snapshots.push(std::fs::read(log.log_path()).unwrap());
        }
        for pair in snapshots.windows(2) {
            assert!(pair[1].len() > pair[0].len());
            assert_eq!(&pair[1][..pair[0].len()], pair[0].as_slice());
        }
        let records = log.read_all().unwrap();
        let order: Vec<i64> = records.iter().map(|r| r["context"]["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_appends_produce_whole_lines() {
        let (_dir, log) = log();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let log = &log;
                scope.spawn(move || {
                    for i in 0..25 {
                        log.evidence_append("STORE", "t", "archive", "codex", json!({"t": t, "i": i}))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(log.read_all().unwrap().len(), 100);
    }
}
