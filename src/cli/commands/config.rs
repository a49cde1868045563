//! codex archive config-show

use clap::Args;
use serde_json::json;

use crate::app::AppContext;
use crate::cli::output::{emit_json, field, heading};
use crate::error::{ArchiveError, Result};

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Show credentials in the backend URL and list captured environment variables
    #[arg(long)]
    pub debug: bool,
}

pub fn run(ctx: &AppContext, args: &ConfigShowArgs) -> Result<()> {
    let config = if args.debug {
        ctx.config.clone()
    } else {
        ctx.config.to_redacted()
    };

    if ctx.json {
        let mut payload = json!({ "config": config });
        if args.debug {
            payload["env"] = json!(ctx.env.keys().collect::<Vec<_>>());
        }
        return emit_json(&payload);
    }

    heading("Archive configuration");
    field("backend", &config.backend.backend);
    field("url", &config.backend.url);
    field("log level", &config.logging.level);
    field("log format", &config.logging.format);
    if config.retry.enabled {
        field(
            "retry",
            format!("enabled (max {} attempts)", config.retry.max_attempts),
        );
    } else {
        field("retry", "disabled");
    }
    field("concurrency", config.batch.concurrent);
    field(
        "metrics",
        if config.performance.enabled { "enabled" } else { "disabled" },
    );
    field("evidence", config.evidence.dir.display());
    field("actor", &config.evidence.actor);

    if args.debug {
        println!();
        let rendered = toml::to_string_pretty(&config)
            .map_err(|err| ArchiveError::Config(format!("render config: {err}")))?;
        println!("{rendered}");
        for key in ctx.env.keys() {
            field("env", key);
        }
    }
    Ok(())
}
