use proptest::prelude::*;
use serde_json::{Value, json};

use codex_archive::release::{canonical_manifest_hash, lock_manifest};

fn arb_manifest() -> impl Strategy<Value = Value> {
    (
        "[a-z0-9][a-z0-9._-]{2,16}",
        r"[0-9]{1,2}\.[0-9]{1,2}\.[0-9]{1,2}",
        prop::collection::vec(("[a-z]{1,8}/[a-z]{1,8}", "0[0-7]{3}"), 0..5),
        prop::collection::vec("[a-z ]{1,20}", 0..3),
    )
        .prop_map(|(release_id, version, components, commands)| {
            json!({
                "release_id": release_id,
                "version": version,
                "created_at": "2025-01-01T00:00:00Z",
                "actor": "prop",
                "components": components
                    .into_iter()
                    .enumerate()
                    .map(|(i, (dest, mode))| json!({
                        "tombstone": format!("t-{i}"),
                        "dest_path": dest,
                        "mode": mode,
                    }))
                    .collect::<Vec<_>>(),
                "symlinks": [],
                "post_unpack_commands": commands,
            })
        })
}

proptest! {
    #[test]
    fn locking_is_idempotent(manifest in arb_manifest()) {
        let (locked, sha) = lock_manifest(&manifest).unwrap();
        prop_assert_eq!(&locked["checks"]["sha256_manifest"], &Value::String(sha.clone()));
        prop_assert_eq!(canonical_manifest_hash(&locked).unwrap(), sha.clone());

        let (relocked, resha) = lock_manifest(&locked).unwrap();
        prop_assert_eq!(resha, sha);
        prop_assert_eq!(relocked, locked);
    }

    #[test]
    fn recorded_hash_never_affects_the_hash(manifest in arb_manifest(), junk in "[0-9a-f]{64}") {
        let mut tampered = manifest.clone();
        tampered["checks"] = json!({ "sha256_manifest": junk });
        prop_assert_eq!(
            canonical_manifest_hash(&tampered).unwrap(),
            canonical_manifest_hash(&manifest).unwrap()
        );
    }

    #[test]
    fn any_field_change_changes_the_hash(manifest in arb_manifest(), actor in "[A-Z]{3,10}") {
        let mut edited = manifest.clone();
        edited["actor"] = Value::String(actor);
        prop_assert_ne!(
            canonical_manifest_hash(&edited).unwrap(),
            canonical_manifest_hash(&manifest).unwrap()
        );
    }
}
