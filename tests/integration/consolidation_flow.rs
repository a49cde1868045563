use codex_archive::consolidate::{
    CanonPolicy, ConsolidationApplyOptions, PlanApplyOptions, SHIM_MARKER, SimilarityPolicy,
    StalenessPolicy, apply_consolidation, apply_plan, build_consolidation_plan, build_plan,
};

use crate::fixture::ArchiveFixture;

const HELPERS: &str = "import os

def load_settings(path):
    with open(path) as handle:
        return handle.read().splitlines()

def env_flag(name, default=False):
    value = os.environ.get(name)
    if value is None:
        return default
    return value.lower() in ('1', 'true', 'yes')
";

const UNRELATED: &str = "class Router:
    def __init__(self):
        self.routes = {}

    def add(self, method, pattern, handler):
        self.routes[(method, pattern)] = handler
";

fn seed_duplicates(fx: &ArchiveFixture) {
    fx.write("pkg/helpers.py", HELPERS);
    // Same code, different comments: still a structural match.
    fx.write(
        "scripts/helpers_copy.py",
        &format!("# copied from pkg for the deploy scripts\n{HELPERS}"),
    );
    fx.write("pkg/router.py", UNRELATED);
}

// ===== consolidation =====

#[test]
fn plan_groups_duplicates_under_one_canonical() {
    let fx = ArchiveFixture::new();
    seed_duplicates(&fx);

    let plan = build_consolidation_plan(
        &fx.work(),
        &[],
        &SimilarityPolicy::default(),
        &CanonPolicy::default(),
    )
    .unwrap();

    assert_eq!(plan.clusters.len(), 1);
    let cluster = &plan.clusters[0];
    assert_eq!(cluster.duplicates.len(), 1);

    let mut members = vec![
        cluster.canonical.path.clone(),
        cluster.duplicates[0].path.clone(),
    ];
    members.sort();
    assert_eq!(members, vec!["pkg/helpers.py", "scripts/helpers_copy.py"]);
    assert_eq!(cluster.duplicates[0].reason, "structural");
}

#[test]
fn excluded_paths_never_cluster() {
    let fx = ArchiveFixture::new();
    seed_duplicates(&fx);

    let plan = build_consolidation_plan(
        &fx.work(),
        &["scripts/**".to_string()],
        &SimilarityPolicy::default(),
        &CanonPolicy::default(),
    )
    .unwrap();
    assert!(plan.clusters.is_empty());
}

#[test]
fn apply_replaces_duplicate_with_shim_and_links_it() {
    let fx = ArchiveFixture::new();
    seed_duplicates(&fx);
    let plan = build_consolidation_plan(
        &fx.work(),
        &[],
        &SimilarityPolicy::default(),
        &CanonPolicy::default(),
    )
    .unwrap();
    let duplicate = plan.clusters[0].duplicates[0].path.clone();
    let original = std::fs::read(fx.work().join(&duplicate)).unwrap();

    let options = ConsolidationApplyOptions {
        repo: "fixture-repo".to_string(),
        actor: "tester".to_string(),
        commit_sha: None,
        link_canonical: true,
    };
    let report = apply_consolidation(&fx.service, &plan, &fx.work(), &options).unwrap();
    assert_eq!(report.applied.len(), 1);
    let entry = &report.applied[0];
    assert_eq!(entry.path, duplicate);

    let shim = std::fs::read_to_string(fx.work().join(&duplicate)).unwrap();
    assert!(shim.contains(SHIM_MARKER));
    let tombstone = entry.tombstone.as_deref().unwrap();
    assert!(shim.contains(tombstone));

    // The replaced bytes are recoverable and linked to the canonical copy.
    assert_eq!(fx.service.restore(tombstone).unwrap().bytes, original);
    assert_eq!(fx.service.links_for(tombstone).unwrap().len(), 1);

    // A second run recognises the shim.
    let again = apply_consolidation(&fx.service, &plan, &fx.work(), &options).unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.skipped[0].skipped.as_deref(), Some("already consolidated"));

    let actions = fx.actions();
    assert!(actions.contains(&"CONSOLIDATE_APPLY".to_string()));
    assert!(actions.contains(&"LINK_DUPLICATE".to_string()));
}

#[cfg(unix)]
#[test]
fn shim_keeps_the_duplicate_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let fx = ArchiveFixture::new();
    seed_duplicates(&fx);
    let plan = build_consolidation_plan(
        &fx.work(),
        &[],
        &SimilarityPolicy::default(),
        &CanonPolicy::default(),
    )
    .unwrap();
    let duplicate = fx.work().join(&plan.clusters[0].duplicates[0].path);
    std::fs::set_permissions(&duplicate, std::fs::Permissions::from_mode(0o755)).unwrap();

    let options = ConsolidationApplyOptions {
        repo: "fixture-repo".to_string(),
        actor: "tester".to_string(),
        commit_sha: None,
        link_canonical: false,
    };
    let report = apply_consolidation(&fx.service, &plan, &fx.work(), &options).unwrap();
    assert_eq!(report.applied.len(), 1);

    assert!(std::fs::read_to_string(&duplicate).unwrap().contains(SHIM_MARKER));
    let mode = std::fs::metadata(&duplicate).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

// ===== staleness plan =====

#[test]
fn staleness_plan_flags_marked_files() {
    let fx = ArchiveFixture::new();
    fx.write("legacy/exporter.py", "# DEPRECATED: use pkg.export\ndef run():\n    pass\n");
    fx.write("pkg/export.py", "def run():\n    return 1\n");

    let plan = build_plan(&fx.work(), None, &[], 0, &StalenessPolicy::default()).unwrap();
    let paths: Vec<&str> = plan.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["legacy/exporter.py"]);

    let entry = &plan.entries[0];
    assert!(entry.score >= 0.7);
    assert!(entry.reason.contains("DEPRECATED"));
    assert!(entry.sha256.is_some());
}

#[test]
fn fresh_files_need_more_than_a_marker() {
    let fx = ArchiveFixture::new();
    fx.write("legacy/exporter.py", "# DEPRECATED\n");

    let plan = build_plan(&fx.work(), None, &[], 10_000, &StalenessPolicy::default()).unwrap();
    assert!(plan.entries.is_empty());
}

#[test]
fn applying_a_plan_leaves_restorable_stubs() {
    let fx = ArchiveFixture::new();
    let original = "# DEPRECATED: old exporter\ndef run():\n    pass\n";
    fx.write("legacy/exporter.py", original);
    let plan = build_plan(&fx.work(), None, &[], 0, &StalenessPolicy::default()).unwrap();

    let report = apply_plan(
        &fx.service,
        &plan,
        &fx.work(),
        &PlanApplyOptions {
            repo: "fixture-repo".to_string(),
            actor: "tester".to_string(),
            write_stubs: true,
        },
    )
    .unwrap();
    assert_eq!(report.applied.len(), 1);

    let tombstone = report.applied[0].tombstone.clone().unwrap();
    let stub = std::fs::read_to_string(fx.work().join("legacy/exporter.py")).unwrap();
    assert!(stub.contains(&format!("Tombstone: {tombstone}")));
    assert_eq!(
        fx.service.restore(&tombstone).unwrap().bytes,
        original.as_bytes()
    );
    assert!(fx.actions().contains(&"ARCHIVE_APPLY".to_string()));
}

#[test]
fn files_changed_after_planning_are_skipped() {
    let fx = ArchiveFixture::new();
    fx.write("legacy/exporter.py", "# DEPRECATED\nx = 1\n");
    let plan = build_plan(&fx.work(), None, &[], 0, &StalenessPolicy::default()).unwrap();
    fx.write("legacy/exporter.py", "# DEPRECATED\nx = 2\n");

    let report = apply_plan(
        &fx.service,
        &plan,
        &fx.work(),
        &PlanApplyOptions {
            repo: "fixture-repo".to_string(),
            actor: "tester".to_string(),
            write_stubs: true,
        },
    )
    .unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped[0].skipped.as_deref(), Some("changed since plan"));
    assert!(
        std::fs::read_to_string(fx.work().join("legacy/exporter.py"))
            .unwrap()
            .ends_with("x = 2\n")
    );
}
