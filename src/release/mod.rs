//! Release bundles built from archived tombstones.
//!
//! A manifest names tombstones and where they land. [`pack_release`] restores
//! them into a deterministic `.tar.gz` with a locked copy of the manifest;
//! [`verify_bundle`] and [`unpack_bundle`] check that lock before trusting the
//! bundle.

pub mod bundle;
pub mod manifest;
pub mod pack;

pub use bundle::{UnpackReport, VerifyReport, unpack_bundle, verify_bundle};
pub use manifest::{
    Component, LOCKED_MANIFEST_NAME, Manifest, Symlink, canonical_manifest_hash, init_manifest,
    load_manifest, lock_manifest, validate_manifest,
};
pub use pack::{PackReport, lock_path_for, pack_release};
