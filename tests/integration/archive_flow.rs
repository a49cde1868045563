use codex_archive::ArchiveError;
use codex_archive::archive::{RestoreService, sha256_hex};

use crate::fixture::ArchiveFixture;

// ===== store / restore =====

#[test]
fn store_then_restore_returns_identical_bytes() {
    let fx = ArchiveFixture::new();
    let bytes = b"fn main() {\n    println!(\"legacy\");\n}\n";
    let tombstone = fx.store("src/legacy.rs", bytes);

    let restored = fx.service.restore(&tombstone).unwrap();
    assert_eq!(restored.bytes, bytes);
    assert_eq!(restored.meta.path, "src/legacy.rs");
    assert_eq!(restored.meta.repo, "fixture-repo");
    assert_eq!(restored.meta.sha256, sha256_hex(bytes));
    assert_eq!(restored.meta.size_bytes, bytes.len() as u64);
}

#[test]
fn identical_content_gets_distinct_tombstones() {
    let fx = ArchiveFixture::new();
    let a = fx.store("a.txt", b"same");
    let b = fx.store("b.txt", b"same");
    assert_ne!(a, b);

    let summary = fx.service.summary().unwrap();
    assert_eq!(summary.tombstones, 2);
    assert_eq!(summary.total_bytes, 8);
}

#[test]
fn store_file_detects_mime_and_language() {
    let fx = ArchiveFixture::new();
    let file = fx.write("tools/report.json", "{\"ok\": true}\n");
    let receipt = fx
        .service
        .store_file("fixture-repo", &file, "tools/report.json", "tester", "stale", None)
        .unwrap();

    let restored = fx.service.restore(&receipt.tombstone).unwrap();
    assert_eq!(restored.meta.lang.as_deref(), Some("json"));
    assert_eq!(restored.meta.mime.as_deref(), Some("application/json"));
    assert_eq!(restored.meta.reason, "stale");
}

#[test]
fn restore_to_path_creates_parent_directories() {
    let fx = ArchiveFixture::new();
    let tombstone = fx.store("notes.md", b"# notes\n");
    let out = fx.root().join("restored/deep/notes.md");

    let receipt = fx
        .service
        .restore_to_path(&tombstone, &out, "restorer")
        .unwrap();
    assert_eq!(receipt.output, out);
    assert_eq!(std::fs::read(&out).unwrap(), b"# notes\n");
}

#[test]
fn unknown_tombstone_is_not_found() {
    let fx = ArchiveFixture::new();
    let err = fx.service.restore("does-not-exist").unwrap_err();
    assert!(matches!(err, ArchiveError::TombstoneNotFound(ref id) if id == "does-not-exist"));
    assert_eq!(err.exit_code(), 3);
    assert!(!err.is_retryable());
}

// ===== evidence =====

#[test]
fn store_and_restore_are_recorded_as_evidence() {
    let fx = ArchiveFixture::new();
    let tombstone = fx.store("a.txt", b"alpha");
    fx.service.restore_as(&tombstone, "auditor").unwrap();

    let records = fx.evidence();
    assert_eq!(fx.actions(), vec!["STORE", "RESTORE"]);

    let store = &records[0];
    assert_eq!(store["actor"], "tester");
    assert_eq!(store["tool"], "archive");
    assert_eq!(store["repo"], "fixture-repo");
    assert_eq!(store["context"]["tombstone"], tombstone.as_str());
    assert_eq!(store["context"]["sha256"], sha256_hex(b"alpha"));
    assert!(store["ts"].is_string());
    assert!(store["meta"].is_object());

    let restore = &records[1];
    assert_eq!(restore["actor"], "auditor");
    assert_eq!(restore["context"]["status"], "SUCCESS");
}

#[test]
fn failed_restore_is_recorded_before_the_error_returns() {
    let fx = ArchiveFixture::new();
    assert!(fx.service.restore_as("missing", "auditor").is_err());

    let records = fx.evidence();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["action"], "RESTORE");
    assert_eq!(records[0]["context"]["status"], "FAILED");
    assert!(
        records[0]["context"]["error"]
            .as_str()
            .unwrap()
            .contains("missing")
    );
}

#[test]
fn evidence_values_are_redacted() {
    let fx = ArchiveFixture::new();
    fx.service
        .store(&codex_archive::archive::StoreRequest {
            repo: "fixture-repo",
            path: "cfg.ini",
            by: "tester",
            reason: "rotated token=hunter2",
            commit_sha: None,
            bytes: b"x",
            mime: None,
            lang: None,
        })
        .unwrap();

    let raw = std::fs::read_to_string(fx.service.evidence().log_path()).unwrap();
    assert!(!raw.contains("hunter2"));
    assert!(raw.contains("token=***"));
}

// ===== links and listing =====

#[test]
fn duplicates_link_to_canonical() {
    let fx = ArchiveFixture::new();
    let canonical = fx.store("lib/util.py", b"def f(): pass\n");
    let duplicate = fx.store("old/util.py", b"def f(): pass\n");

    fx.service
        .refer_dup_to_canonical(&duplicate, &canonical, "tester")
        .unwrap();
    // Linking again is a no-op.
    fx.service
        .refer_dup_to_canonical(&duplicate, &canonical, "tester")
        .unwrap();

    let links = fx.service.links_for(&duplicate).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].duplicate, duplicate);
    assert_eq!(links[0].canonical, canonical);
    assert_eq!(fx.service.links_for(&canonical).unwrap().len(), 1);
    assert_eq!(fx.service.summary().unwrap().links, 1);
    assert!(fx.actions().contains(&"LINK_DUPLICATE".to_string()));
}

#[test]
fn linking_to_unknown_canonical_fails() {
    let fx = ArchiveFixture::new();
    let duplicate = fx.store("old/util.py", b"x");
    let err = fx
        .service
        .refer_dup_to_canonical(&duplicate, "nope", "tester")
        .unwrap_err();
    assert!(matches!(err, ArchiveError::TombstoneNotFound(_)));
    assert!(fx.service.links_for(&duplicate).unwrap().is_empty());
}

#[test]
fn list_recent_respects_limit() {
    let fx = ArchiveFixture::new();
    for i in 0..5 {
        fx.store(&format!("f{i}.txt"), format!("content {i}").as_bytes());
    }
    assert_eq!(fx.service.list_recent(3).unwrap().len(), 3);
    assert_eq!(fx.service.list_recent(50).unwrap().len(), 5);
}
