//! Content-addressed archive and release packaging.
//!
//! Superseded or duplicate files are archived as immutable tombstones keyed by
//! content hash, recorded in an append-only evidence log, and can be restored
//! one at a time or in batches. Consolidation plans replace duplicates with
//! pointer shims; release bundles are assembled from archived tombstones.

pub mod app;
pub mod archive;
pub mod batch;
pub mod cli;
pub mod config;
pub mod consolidate;
pub mod env;
pub mod error;
pub mod evidence;
pub mod logging;
pub mod perf;
pub mod release;
pub mod retry;
pub mod storage;
pub mod utils;

pub use error::{ArchiveError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
