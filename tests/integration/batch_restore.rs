use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use codex_archive::ArchiveError;
use codex_archive::archive::{ArchiveService, RestoreService};
use codex_archive::batch::{BatchManifest, BatchRestore, BatchResult, ItemStatus};
use codex_archive::config::{BatchConfig, PerformanceConfig};
use codex_archive::evidence::EvidenceLog;
use codex_archive::retry::RetryConfig;
use codex_archive::storage::SqliteDal;

use crate::fixture::ArchiveFixture;

fn runner(fx: &ArchiveFixture, concurrent: usize) -> BatchRestore {
    // A second handle on the same database; the service itself is not Clone.
    let state = fx.root().join("state");
    let dal = SqliteDal::open(state.join("archive.sqlite")).unwrap();
    let service: Arc<dyn RestoreService> = Arc::new(ArchiveService::new(
        Arc::new(dal),
        EvidenceLog::new(state.join("evidence")),
    ));
    BatchRestore::new(
        service,
        RetryConfig::disabled(),
        BatchConfig {
            concurrent,
            ..BatchConfig::default()
        },
        PerformanceConfig::default(),
    )
}

fn status_of(result: &BatchResult, tombstone: &str) -> ItemStatus {
    result
        .results
        .iter()
        .find(|item| item.tombstone == tombstone)
        .map(|item| item.status)
        .expect("item present")
}

// ===== manifests =====

#[test]
fn json_manifest_restores_relative_to_its_directory() {
    let fx = ArchiveFixture::new();
    let a = fx.store("a.txt", b"alpha");
    let b = fx.store("b.txt", b"beta");
    let manifest_path = fx.write(
        "batch/restore.json",
        &serde_json::json!({
            "items": [
                {"tombstone": a, "output": "out/a.txt"},
                {"tombstone": b, "output": "out/b.txt", "actor": "someone-else"},
            ]
        })
        .to_string(),
    );

    let manifest = BatchManifest::from_path(&manifest_path, "batch-bot").unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest.items[0].actor, "batch-bot");
    assert_eq!(manifest.items[1].actor, "someone-else");

    let result = runner(&fx, 2).restore(&manifest).unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 0);
    assert!(!result.dry_run);

    let out = fx.work().join("batch/out");
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(out.join("b.txt")).unwrap(), b"beta");
}

#[test]
fn csv_manifest_is_accepted() {
    let fx = ArchiveFixture::new();
    let a = fx.store("a.txt", b"alpha");
    let manifest_path = fx.write("restore.csv", &format!("tombstone,output\n{a},restored/a.txt\n"));

    let manifest = BatchManifest::from_path(&manifest_path, "batch-bot").unwrap();
    let result = runner(&fx, 1).restore(&manifest).unwrap();
    assert_eq!(result.succeeded, 1);
    assert_eq!(
        std::fs::read(fx.work().join("restored/a.txt")).unwrap(),
        b"alpha"
    );
}

#[test]
fn manifest_errors_are_reported_up_front() {
    let fx = ArchiveFixture::new();

    let missing = BatchManifest::from_path(&fx.work().join("none.json"), "bot").unwrap_err();
    assert!(matches!(missing, ArchiveError::NotFound(_)));

    let empty = fx.write("empty.json", "[]");
    assert!(matches!(
        BatchManifest::from_path(&empty, "bot").unwrap_err(),
        ArchiveError::Validation(_)
    ));

    let no_output = fx.write("partial.json", r#"[{"tombstone": "t1"}]"#);
    let err = BatchManifest::from_path(&no_output, "bot").unwrap_err();
    assert!(err.to_string().contains("entry 1"));

    let wrong_ext = fx.write("restore.yaml", "items: []");
    assert!(matches!(
        BatchManifest::from_path(&wrong_ext, "bot").unwrap_err(),
        ArchiveError::Validation(_)
    ));
}

// ===== execution =====

#[test]
fn failing_items_do_not_abort_the_batch() {
    let fx = ArchiveFixture::new();
    let good = fx.store("good.txt", b"good");
    let manifest_path = fx.write(
        "mixed.json",
        &serde_json::json!([
            {"tombstone": good, "output": "out/good.txt"},
            {"tombstone": "ghost", "output": "out/ghost.txt"},
        ])
        .to_string(),
    );
    let manifest = BatchManifest::from_path(&manifest_path, "bot").unwrap();

    let result = runner(&fx, 4).restore(&manifest).unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(status_of(&result, &good), ItemStatus::Success);
    assert_eq!(status_of(&result, "ghost"), ItemStatus::Failed);

    let ghost = result
        .results
        .iter()
        .find(|item| item.tombstone == "ghost")
        .unwrap();
    assert_eq!(ghost.attempts, 1);
    assert!(ghost.detail.as_deref().unwrap().contains("ghost"));
    assert!(!fx.work().join("out/ghost.txt").exists());
}

#[test]
fn progress_callback_sees_every_item() {
    let fx = ArchiveFixture::new();
    let items: Vec<_> = (0..6)
        .map(|i| {
            let id = fx.store(&format!("f{i}.txt"), format!("{i}").as_bytes());
            serde_json::json!({"tombstone": id, "output": format!("out/f{i}.txt")})
        })
        .collect();
    let manifest_path = fx.write("many.json", &serde_json::Value::Array(items).to_string());
    let manifest = BatchManifest::from_path(&manifest_path, "bot").unwrap();

    let last = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&last);
    let result = runner(&fx, 3)
        .with_progress(Box::new(move |done, total, _| {
            assert_eq!(total, 6);
            seen.fetch_max(done, Ordering::SeqCst);
        }))
        .restore(&manifest)
        .unwrap();

    assert_eq!(result.succeeded, 6);
    assert_eq!(last.load(Ordering::SeqCst), 6);
}

#[test]
fn dry_run_touches_nothing() {
    let fx = ArchiveFixture::new();
    let a = fx.store("a.txt", b"alpha");
    let manifest_path = fx.write(
        "dry.json",
        &serde_json::json!([{"tombstone": a, "output": "out/a.txt"}]).to_string(),
    );
    let manifest = BatchManifest::from_path(&manifest_path, "bot").unwrap();
    let before = fx.evidence().len();

    let result = runner(&fx, 1).dry_run(&manifest);
    assert!(result.dry_run);
    assert_eq!(result.total, 1);
    assert_eq!(result.results[0].status, ItemStatus::DryRun);
    assert!(!fx.work().join("out/a.txt").exists());
    assert_eq!(fx.evidence().len(), before);
}

#[test]
fn results_can_be_saved_for_audit() {
    let fx = ArchiveFixture::new();
    let a = fx.store("a.txt", b"alpha");
    let manifest_path = fx.write(
        "audit.json",
        &serde_json::json!([{"tombstone": a, "output": "out/a.txt"}]).to_string(),
    );
    let manifest = BatchManifest::from_path(&manifest_path, "bot").unwrap();
    let result = runner(&fx, 1).restore(&manifest).unwrap();

    let path = fx.root().join("reports/batch.json");
    BatchRestore::save_results(&path, &result).unwrap();
    let saved: BatchResult =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(saved, result);
}
