//! Planning and applying archival of stale and duplicate files.
//!
//! Two planners share one tree scanner:
//!
//! - [`build_plan`] scores single files for staleness and emits `entries[]`.
//! - [`build_consolidation_plan`] groups near-duplicates into `clusters[]`.
//!
//! The apply side ([`apply_plan`], [`apply_consolidation`]) archives current
//! bytes through [`ArchiveService`](crate::archive::ArchiveService) before any
//! file is overwritten with a stub.

pub mod apply;
pub mod cluster;
pub mod scan;
pub mod shim;
pub mod similarity;
pub mod staleness;

pub use apply::{
    AppliedEntry, ApplyReport, ConsolidationApplyOptions, PlanApplyOptions, apply_consolidation,
    apply_plan,
};
pub use cluster::{CanonPolicy, Cluster, ConsolidationPlan, build_consolidation_plan};
pub use scan::{ExcludeSet, ScannedFile, scan_tree};
pub use shim::{ArtifactKind, SHIM_MARKER, ShimContext, StubRenderer, render_shim, renderer_for};
pub use similarity::{Fingerprint, Similarity, SimilarityPolicy};
pub use staleness::{Plan, PlanEntry, StalenessPolicy, build_plan};
