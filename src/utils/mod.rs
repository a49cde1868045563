//! Small shared helpers.

pub mod fs;
pub mod git;
pub mod redact;
