use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use codex_archive::ArchiveError;
use codex_archive::release::{
    LOCKED_MANIFEST_NAME, canonical_manifest_hash, lock_path_for, pack_release, unpack_bundle,
    verify_bundle,
};

use crate::fixture::ArchiveFixture;

fn write_manifest(fx: &ArchiveFixture, manifest: &Value) -> PathBuf {
    let path = fx.root().join("release.manifest.json");
    std::fs::write(&path, serde_json::to_vec_pretty(manifest).unwrap()).unwrap();
    path
}

fn manifest(app: &str, config: &str) -> Value {
    json!({
        "release_id": "codex-service",
        "version": "2.3.0",
        "created_at": "2025-06-01T12:00:00Z",
        "actor": "release-bot",
        "target": {"os": "linux", "arch": "x86_64"},
        "components": [
            {"tombstone": app, "dest_path": "bin/service", "mode": "0755"},
            {
                "tombstone": config,
                "dest_path": "etc/service.toml",
                "mode": "0640",
                "template_vars": {"port": 9090}
            }
        ],
        "symlinks": [{"link_path": "current", "target": "bin/service"}],
        "post_unpack_commands": ["echo installed > installed.txt"],
    })
}

fn pack(fx: &ArchiveFixture, manifest_path: &Path, out: &str) -> PathBuf {
    let out = fx.root().join(out);
    pack_release(&fx.service, manifest_path, &fx.root().join("staging"), &out).unwrap();
    out
}

fn seeded(fx: &ArchiveFixture) -> PathBuf {
    let app = fx.store("bin/service", b"#!/bin/sh\nexec service-daemon\n");
    let config = fx.store("etc/service.toml", b"port = {{port}}\n");
    write_manifest(fx, &manifest(&app, &config))
}

// ===== pack =====

#[test]
fn packing_twice_produces_identical_bundles() {
    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);

    let first = pack(&fx, &manifest_path, "dist/a.tar.gz");
    let second = pack(&fx, &manifest_path, "dist/b.tar.gz");
    assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
}

#[test]
fn lock_file_carries_the_manifest_hash() {
    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);
    let bundle = pack(&fx, &manifest_path, "dist/service.tar.gz");

    let lock: Value =
        serde_json::from_slice(&std::fs::read(lock_path_for(&bundle)).unwrap()).unwrap();
    let recorded = lock["checks"]["sha256_manifest"].as_str().unwrap();
    assert_eq!(recorded.len(), 64);
    assert_eq!(recorded, canonical_manifest_hash(&lock).unwrap());

    let staged = fx.root().join("staging").join(LOCKED_MANIFEST_NAME);
    assert!(staged.is_file());
}

#[test]
fn pack_persists_release_metadata_once() {
    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);
    pack(&fx, &manifest_path, "dist/a.tar.gz");
    pack(&fx, &manifest_path, "dist/b.tar.gz");

    let dal = fx.service.dal();
    let meta = dal
        .get_release_meta_by_release_id("codex-service")
        .unwrap()
        .expect("release meta persisted");
    assert_eq!(meta.version, "2.3.0");
    assert_eq!(meta.actor, "release-bot");

    let components = dal.list_release_components(meta.id).unwrap();
    assert_eq!(components.len(), 2);
    assert!(components.iter().any(|c| c.dest_path == "etc/service.toml" && c.mode == "0640"));

    let persists: Vec<Value> = fx
        .evidence()
        .into_iter()
        .filter(|r| r["action"] == "RELEASE_PERSIST")
        .collect();
    assert_eq!(persists.len(), 2);
    assert_eq!(persists[0]["context"]["existing"], false);
    assert_eq!(persists[1]["context"]["existing"], true);
    assert_eq!(fx.service.summary().unwrap().releases, 1);
}

#[test]
fn pack_with_unknown_tombstone_fails() {
    let fx = ArchiveFixture::new();
    let manifest_path = write_manifest(&fx, &manifest("missing-app", "missing-config"));
    let out = fx.root().join("dist/broken.tar.gz");

    let err = pack_release(&fx.service, &manifest_path, &fx.root().join("staging"), &out)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::TombstoneNotFound(_)));
    assert!(!out.exists());
}

#[test]
fn pack_rejects_escaping_destinations() {
    let fx = ArchiveFixture::new();
    let app = fx.store("bin/service", b"x");
    let mut value = manifest(&app, &app);
    value["components"][0]["dest_path"] = json!("../outside");
    let manifest_path = write_manifest(&fx, &value);

    let err = pack_release(
        &fx.service,
        &manifest_path,
        &fx.root().join("staging"),
        &fx.root().join("dist/x.tar.gz"),
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.root().join("outside").exists());
}

// ===== verify / unpack =====

#[test]
fn verify_accepts_untouched_bundle() {
    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);
    let bundle = pack(&fx, &manifest_path, "dist/service.tar.gz");

    let report = verify_bundle(fx.service.evidence(), "auditor", &bundle).unwrap();
    assert!(report.ok);
    assert_eq!(report.sha256_manifest.as_deref(), Some(report.computed.as_str()));
}

#[test]
fn verify_missing_bundle_is_not_found() {
    let fx = ArchiveFixture::new();
    let err = verify_bundle(fx.service.evidence(), "auditor", &fx.root().join("nope.tar.gz"))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::NotFound(_)));
}

#[cfg(unix)]
#[test]
fn unpack_restores_tree_and_renders_templates() {
    use std::os::unix::fs::PermissionsExt;

    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);
    let bundle = pack(&fx, &manifest_path, "dist/service.tar.gz");
    let dest = fx.root().join("deploy");

    let report = unpack_bundle(fx.service.evidence(), "deployer", &bundle, &dest, false).unwrap();
    assert_eq!(report.scripts_run, 0);
    assert_eq!(report.scripts_skipped, 1);
    assert!(!dest.join("installed.txt").exists());

    assert_eq!(
        std::fs::read_to_string(dest.join("etc/service.toml")).unwrap(),
        "port = 9090\n"
    );
    let mode = std::fs::metadata(dest.join("bin/service"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_eq!(
        std::fs::read_link(dest.join("current")).unwrap(),
        PathBuf::from("bin/service")
    );

    let actions: Vec<String> = fx
        .evidence()
        .iter()
        .filter_map(|r| r["action"].as_str().map(ToString::to_string))
        .collect();
    assert!(actions.contains(&"VERIFY".to_string()));
    assert!(actions.contains(&"UNPACK".to_string()));
}

#[cfg(unix)]
#[test]
fn unpack_runs_scripts_only_when_allowed() {
    let fx = ArchiveFixture::new();
    let manifest_path = seeded(&fx);
    let bundle = pack(&fx, &manifest_path, "dist/service.tar.gz");
    let dest = fx.root().join("deploy");

    let report = unpack_bundle(fx.service.evidence(), "deployer", &bundle, &dest, true).unwrap();
    assert_eq!(report.scripts_run, 1);
    assert_eq!(
        std::fs::read_to_string(dest.join("installed.txt")).unwrap().trim(),
        "installed"
    );
}
