//! Property tests for invariants that must hold for any input.

mod archive_props;
mod backoff_props;
mod manifest_props;
