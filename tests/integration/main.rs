//! Library-level flows against a throwaway SQLite archive.

mod archive_flow;
mod batch_restore;
mod consolidation_flow;
mod fixture;
mod release_flow;
