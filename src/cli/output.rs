//! Output helpers shared by every command.

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::error::{ArchiveError, Result, StructuredError};

/// Success envelope printed by `--json`.
#[derive(Serialize)]
pub struct JsonResponse<'a, T> {
    pub success: bool,
    pub timestamp: String,
    pub version: &'static str,
    pub data: &'a T,
}

/// Print `data` wrapped in the success envelope.
pub fn emit_json<T: Serialize>(data: &T) -> Result<()> {
    let response = JsonResponse {
        success: true,
        timestamp: Utc::now().to_rfc3339(),
        version: crate::VERSION,
        data,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Report a failed command on the channel matching the output mode.
pub fn emit_error(err: &ArchiveError, json: bool) {
    if json {
        let envelope = StructuredError::from_archive_error(err).envelope();
        println!(
            "{}",
            serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("{} {err}", "Error:".red().bold());
        let structured = StructuredError::from_archive_error(err);
        if !structured.suggestion.is_empty() {
            eprintln!("  {}", structured.suggestion.dimmed());
        }
    }
}

/// `key: value` line for human output.
pub fn field(key: &str, value: impl std::fmt::Display) {
    println!("  {:<14} {}", format!("{key}:").dimmed(), value);
}

pub fn heading(text: &str) {
    println!("{}", text.bold());
}

#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
