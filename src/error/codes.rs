//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Archive errors (tombstones, payloads)
//! - 3xx: Config errors
//! - 5xx: Backend connectivity errors
//! - 6xx: Storage errors
//! - 7xx: Git errors
//! - 8xx: Validation errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for `--json` output.
///
/// Each variant maps to a numeric code (e.g., `TombstoneNotFound` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Archive errors (1xx)
    // ========================================
    /// E101: Requested tombstone does not exist
    TombstoneNotFound,
    /// E102: Stored payload does not match its recorded digest or codec
    IntegrityMismatch,
    /// E103: A post-unpack command exited unsuccessfully
    ScriptFailed,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,

    // ========================================
    // Backend errors (5xx)
    // ========================================
    /// E501: Backend could not be reached (retryable)
    BackendUnavailable,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E604: Database operation failed
    DatabaseError,
    /// E605: Serialization/deserialization failed
    SerializationError,

    // ========================================
    // Git errors (7xx)
    // ========================================
    /// E704: General git error
    GitError,

    // ========================================
    // Validation errors (8xx)
    // ========================================
    /// E801: Input failed validation
    ValidationFailed,
    /// E802: Path would escape its destination
    UnsafePath,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E905: Generic not-found (files, releases)
    NotFound,
    /// E906: File operation failed
    IoError,
}

impl ErrorCode {
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::TombstoneNotFound => 101,
            Self::IntegrityMismatch => 102,
            Self::ScriptFailed => 103,
            Self::ConfigInvalid => 302,
            Self::BackendUnavailable => 501,
            Self::DatabaseError => 604,
            Self::SerializationError => 605,
            Self::GitError => 704,
            Self::ValidationFailed => 801,
            Self::UnsafePath => 802,
            Self::NotFound => 905,
            Self::IoError => 906,
        }
    }

    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::TombstoneNotFound => {
                "Check the tombstone id. Run `codex archive list` to see recent tombstones"
            }
            Self::IntegrityMismatch => {
                "The bundle or payload was modified after it was written. Re-pack from the archive"
            }
            Self::ScriptFailed => "Inspect the post_unpack_commands of the release manifest",
            Self::ConfigInvalid => {
                "Run `codex archive config-show` to see current values. Check TOML syntax"
            }
            Self::BackendUnavailable => {
                "Check CODEX_ARCHIVE_URL and that the database is reachable. Enable retry to ride out blips"
            }
            Self::DatabaseError => "Run `codex archive init` to create or migrate the schema",
            Self::SerializationError => "The input data may be malformed. Check it for validity",
            Self::GitError => "Check git status with `git status`",
            Self::ValidationFailed => "Review the validation message and fix the input",
            Self::UnsafePath => "Use relative paths without `..` components",
            Self::NotFound => "The requested resource was not found. Check the path or identifier",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::IntegrityMismatch | Self::DatabaseError | Self::SerializationError
        )
    }

    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "archive",
            3 => "config",
            5 => "backend",
            6 => "storage",
            7 => "git",
            8 => "validation",
            9 => "internal",
            _ => "unknown",
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::TombstoneNotFound,
            Self::IntegrityMismatch,
            Self::ScriptFailed,
            Self::ConfigInvalid,
            Self::BackendUnavailable,
            Self::DatabaseError,
            Self::SerializationError,
            Self::GitError,
            Self::ValidationFailed,
            Self::UnsafePath,
            Self::NotFound,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
