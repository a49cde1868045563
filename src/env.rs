//! Process environment captured once at the CLI boundary.
//!
//! Components below the CLI never read `std::env` directly; they receive an
//! [`EnvSnapshot`] (or a config value derived from one) explicitly.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{ArchiveError, Result};

/// Prefixes of variables retained from the process environment.
const CAPTURED_PREFIXES: &[&str] = &["CODEX_", "RUST_LOG"];

/// Immutable view of the environment variables this crate cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the relevant variables of the current process.
    #[must_use]
    pub fn from_process() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| CAPTURED_PREFIXES.iter().any(|p| key.starts_with(p)))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs (tests, embedding callers).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Non-empty string value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|value| {
            matches!(
                value.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Parse a value, mapping failures to a config error that names the key.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => value.trim().parse::<T>().map(Some).map_err(|err| {
                ArchiveError::Config(format!("invalid {key} value {value}: {err}"))
            }),
            None => Ok(None),
        }
    }

    /// Captured variable names, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToString::to_string)
                .collect()
        })
    }
}
