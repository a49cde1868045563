//! Tracing setup and structured operation logging.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::config::LoggingConfig;
use crate::env::EnvSnapshot;
use crate::error::Result;
use crate::utils::redact::{redact_text_credentials, redact_url_credentials};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `-v`, which wins over `logging.level`. A second
/// JSON layer appends to `logging.file` when configured. Calling this twice
/// is harmless; the first subscriber stays installed.
pub fn init_tracing(
    logging: &LoggingConfig,
    verbose: u8,
    quiet: bool,
    env: &EnvSnapshot,
) -> Result<()> {
    if quiet && logging.file.is_none() {
        return Ok(());
    }

    let directive = match verbose {
        0 => format!("warn,codex_archive={}", logging.level),
        1 => "info,codex_archive=debug".to_string(),
        2 => "debug,codex_archive=trace".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = env
        .get("RUST_LOG")
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(directive));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if !quiet {
        if logging.is_json() {
            layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
        } else {
            layers.push(fmt::layer().with_writer(std::io::stderr).boxed());
        }
    }
    if let Some(path) = &logging.file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init();
    Ok(())
}

/// One archive operation, as recorded in the structured log.
#[derive(Debug, Clone, Default)]
pub struct OperationLog<'a> {
    pub actor: &'a str,
    pub tombstone: Option<&'a str>,
    pub backend: &'a str,
    pub url: &'a str,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Emit one structured event for an archive operation.
///
/// The backend URL and error text are redacted before they reach any sink.
pub fn log_operation(action: &str, op: &OperationLog<'_>) {
    let url = redact_url_credentials(op.url);
    let tombstone = op.tombstone.unwrap_or("-");
    match &op.error {
        Some(err) => error!(
            action,
            actor = op.actor,
            tombstone,
            backend = op.backend,
            url = %url,
            duration_ms = op.duration_ms,
            error = %redact_text_credentials(err),
            "archive operation failed"
        ),
        None => info!(
            action,
            actor = op.actor,
            tombstone,
            backend = op.backend,
            url = %url,
            duration_ms = op.duration_ms,
            "archive operation"
        ),
    }
}
