use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use codex_archive::archive::{ArchiveService, StoreRequest};
use codex_archive::evidence::EvidenceLog;
use codex_archive::storage::SqliteDal;

/// Archive service over a throwaway SQLite database and evidence directory.
///
/// The database and log live under `<root>/state` so that trees scanned from
/// `<root>/work` never see them.
pub struct ArchiveFixture {
    pub temp: TempDir,
    pub service: ArchiveService,
}

impl ArchiveFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let state = temp.path().join("state");
        let dal = SqliteDal::open(state.join("archive.sqlite")).expect("open sqlite");
        let service = ArchiveService::new(Arc::new(dal), EvidenceLog::new(state.join("evidence")))
            .with_default_actor("fixture");
        std::fs::create_dir_all(temp.path().join("work")).expect("create work dir");
        Self { temp, service }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Directory for trees under test.
    pub fn work(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.work().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, content).expect("write file");
        path
    }

    /// Archive `bytes` as `path` and return the tombstone id.
    pub fn store(&self, path: &str, bytes: &[u8]) -> String {
        self.service
            .store(&StoreRequest {
                repo: "fixture-repo",
                path,
                by: "tester",
                reason: "test",
                commit_sha: None,
                bytes,
                mime: None,
                lang: None,
            })
            .expect("store")
            .tombstone
    }

    pub fn evidence(&self) -> Vec<Value> {
        self.service.evidence().read_all().expect("read evidence")
    }

    pub fn actions(&self) -> Vec<String> {
        self.evidence()
            .iter()
            .filter_map(|record| record["action"].as_str().map(ToString::to_string))
            .collect()
    }
}
