//! Error handling for codex-archive.
//!
//! This module provides:
//! - [`ArchiveError`]: The main error enum for all archive operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Error envelope emitted by `--json` output

mod codes;

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for archive operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("SQL backend error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsafe path: {0}")]
    UnsafePath(String),

    #[error("Tombstone not found: {0}")]
    TombstoneNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Transient(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Post-unpack command failed: {0}")]
    Script(String),
}

impl ArchiveError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) | Self::Sql(_) => ErrorCode::DatabaseError,
            Self::Git(_) => ErrorCode::GitError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) | Self::Csv(_) => ErrorCode::SerializationError,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::UnsafePath(_) => ErrorCode::UnsafePath,
            Self::TombstoneNotFound(_) => ErrorCode::TombstoneNotFound,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Transient(_) => ErrorCode::BackendUnavailable,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Integrity(_) => ErrorCode::IntegrityMismatch,
            Self::Script(_) => ErrorCode::ScriptFailed,
        }
    }

    /// Whether a retry has a chance of succeeding.
    ///
    /// Only connectivity-class failures qualify. Validation and not-found
    /// errors are deterministic and always fail fast.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Sql(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::UnsafePath(_) | Self::Config(_) => 2,
            Self::TombstoneNotFound(_) | Self::NotFound(_) => 3,
            _ => 1,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::TombstoneNotFound(id) => Some(serde_json::json!({ "tombstone": id })),
            Self::UnsafePath(path) => Some(serde_json::json!({ "path": path })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_archive_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "TOMBSTONE_NOT_FOUND")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 101)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the user
    pub recoverable: bool,

    /// Error category (e.g., "archive", "config")
    pub category: String,
}

impl StructuredError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_archive_error(err: &ArchiveError) -> Self {
        let mut structured = Self::new(err.code(), err.to_string());
        structured.context = err.context();
        structured
    }

    /// Wrap this error in the `{"success": false, "error": {...}}` envelope.
    #[must_use]
    pub fn envelope(&self) -> Value {
        serde_json::json!({ "success": false, "error": self })
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&ArchiveError> for StructuredError {
    fn from(err: &ArchiveError) -> Self {
        Self::from_archive_error(err)
    }
}

/// Result type alias using ArchiveError.
pub type Result<T> = std::result::Result<T, ArchiveError>;
