//! Progress reporting for long-running CLI commands.
//!
//! Adapts to the output context:
//! - TTY: an indicatif progress bar on stderr
//! - Non-TTY: one line per update on stderr
//! - JSON (`--json`): progress events as JSON lines on stderr
//! - Quiet: nothing

use std::io::IsTerminal;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Tty,
    NonTty,
    Json,
    Quiet,
}

impl ProgressMode {
    /// Pick a mode from the global flags and whether stderr is a terminal.
    #[must_use]
    pub fn detect(json: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if json {
            Self::Json
        } else if std::io::stderr().is_terminal() {
            Self::Tty
        } else {
            Self::NonTty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    ProgressStart,
    ProgressUpdate,
    ProgressComplete,
}

/// JSON progress event for `--json` mode.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub event: ProgressEventType,
    pub operation: String,
    pub current: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    fn new(event: ProgressEventType, operation: &str, current: u64, total: u64) -> Self {
        Self {
            event_type: "progress",
            event,
            operation: operation.to_string(),
            current,
            total,
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            eprintln!("{json}");
        }
    }
}

/// Handle for one determinate operation.
pub enum ProgressHandle {
    Tty(ProgressBar),
    NonTty { operation: String, total: u64 },
    Json { operation: String, total: u64 },
    Noop,
}

impl ProgressHandle {
    /// Start a progress indicator for `total` steps.
    #[must_use]
    pub fn start(mode: ProgressMode, total: u64, operation: &str) -> Self {
        match mode {
            ProgressMode::Quiet => Self::Noop,
            ProgressMode::Json => {
                ProgressEvent::new(ProgressEventType::ProgressStart, operation, 0, total).emit();
                Self::Json {
                    operation: operation.to_string(),
                    total,
                }
            }
            ProgressMode::NonTty => {
                eprintln!("[codex] {operation} (0/{total})");
                Self::NonTty {
                    operation: operation.to_string(),
                    total,
                }
            }
            ProgressMode::Tty => {
                let pb = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                {
                    pb.set_style(style.progress_chars("█▓▒░"));
                }
                pb.set_message(operation.to_string());
                Self::Tty(pb)
            }
        }
    }

    /// Report `current` completed steps, with an optional note.
    pub fn update(&self, current: u64, note: &str) {
        match self {
            Self::Tty(pb) => pb.set_position(current),
            Self::NonTty { operation, total } => {
                eprintln!("[codex] {operation} ({current}/{total}) {note}");
            }
            Self::Json { operation, total } => {
                ProgressEvent::new(ProgressEventType::ProgressUpdate, operation, current, *total)
                    .with_message(note)
                    .emit();
            }
            Self::Noop => {}
        }
    }

    pub fn finish(&self, message: &str) {
        match self {
            Self::Tty(pb) => pb.finish_with_message(message.to_string()),
            Self::NonTty { operation, .. } => eprintln!("[codex] {operation}: {message}"),
            Self::Json { operation, total } => {
                ProgressEvent::new(ProgressEventType::ProgressComplete, operation, *total, *total)
                    .with_message(message)
                    .emit();
            }
            Self::Noop => {}
        }
    }
}
