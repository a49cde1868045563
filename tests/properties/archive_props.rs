use std::path::Component;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use codex_archive::archive::{ArchiveService, StoreRequest, sha256_hex};
use codex_archive::evidence::EvidenceLog;
use codex_archive::storage::SqliteDal;
use codex_archive::utils::fs::safe_relative_path;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn store_restore_preserves_bytes(
        bytes in prop::collection::vec(any::<u8>(), 0..4096),
        path in r"[a-z]{1,8}(/[a-z]{1,8}){0,3}\.[a-z]{1,3}",
    ) {
        let temp = TempDir::new().unwrap();
        let dal = SqliteDal::open(temp.path().join("archive.sqlite")).unwrap();
        let service = ArchiveService::new(Arc::new(dal), EvidenceLog::new(temp.path().join("ev")));

        let receipt = service
            .store(&StoreRequest {
                repo: "prop",
                path: &path,
                by: "prop",
                reason: "prop",
                commit_sha: None,
                bytes: &bytes,
                mime: None,
                lang: None,
            })
            .unwrap();
        prop_assert_eq!(&receipt.sha256, &sha256_hex(&bytes));
        prop_assert_eq!(receipt.size_bytes, bytes.len() as u64);

        let restored = service.restore(&receipt.tombstone).unwrap();
        prop_assert_eq!(restored.bytes, bytes);
        prop_assert_eq!(restored.meta.path, path);
    }

    #[test]
    fn safe_paths_stay_relative(raw in r"[a-z./\\]{0,24}") {
        if let Ok(clean) = safe_relative_path(&raw) {
            prop_assert!(clean.is_relative());
            prop_assert!(!clean.as_os_str().is_empty());
            prop_assert!(clean.components().all(|c| matches!(c, Component::Normal(_))));
        }
    }
}
