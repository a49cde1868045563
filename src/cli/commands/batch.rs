//! codex archive batch-restore

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::archive::RestoreService;
use crate::batch::{BatchManifest, BatchRestore, BatchResult, ItemStatus};
use crate::cli::output::{emit_json, field, heading};
use crate::cli::progress::ProgressHandle;
use crate::error::{ArchiveError, Result};

#[derive(Args, Debug)]
pub struct BatchRestoreArgs {
    /// JSON, JSONL or CSV manifest of {tombstone, output, actor?}
    pub manifest: PathBuf,

    /// Actor for items that do not name one
    #[arg(long)]
    pub by: Option<String>,

    /// Validate the manifest without restoring anything
    #[arg(long)]
    pub dry_run: bool,

    /// Also write the results as JSON to this path
    #[arg(long, value_name = "PATH")]
    pub results: Option<PathBuf>,
}

pub fn run(ctx: &AppContext, args: &BatchRestoreArgs) -> Result<()> {
    let actor = ctx.actor(args.by.as_deref());
    let manifest = BatchManifest::from_path(&args.manifest, &actor)?;

    let result = if args.dry_run {
        // Dry runs never touch the backend.
        let service: Arc<dyn RestoreService> = Arc::new(Unopened);
        batch_runner(ctx, service).dry_run(&manifest)
    } else {
        let service: Arc<dyn RestoreService> = Arc::new(ctx.service()?);
        let progress = Arc::new(ProgressHandle::start(
            ctx.progress_mode(),
            manifest.len() as u64,
            "batch restore",
        ));
        let reporter = Arc::clone(&progress);
        let runner = batch_runner(ctx, service).with_progress(Box::new(move |done, _, item| {
            let status = match item.status {
                ItemStatus::Success => "ok",
                ItemStatus::Failed => "failed",
                ItemStatus::DryRun => "dry-run",
            };
            reporter.update(done as u64, &format!("{} {status}", item.tombstone));
        }));
        let result = runner.restore(&manifest)?;
        progress.finish(&format!("{} ok, {} failed", result.succeeded, result.failed));
        result
    };

    if let Some(path) = &args.results {
        BatchRestore::save_results(path, &result)?;
    }
    // Per-item failures are part of the report, not a command failure.
    report(ctx, &result)
}

fn batch_runner(ctx: &AppContext, service: Arc<dyn RestoreService>) -> BatchRestore {
    BatchRestore::new(
        service,
        ctx.config.retry.clone(),
        ctx.config.batch.clone(),
        ctx.config.performance.clone(),
    )
}

fn report(ctx: &AppContext, result: &BatchResult) -> Result<()> {
    if ctx.json {
        return emit_json(result);
    }
    heading("Batch restore");
    for item in &result.results {
        let mark = match item.status {
            ItemStatus::Success => "✓".green(),
            ItemStatus::Failed => "✗".red(),
            ItemStatus::DryRun => "·".dimmed(),
        };
        println!(
            "  {mark} {} -> {}{}",
            item.tombstone,
            item.output,
            item.detail
                .as_deref()
                .map(|detail| format!("  {}", detail.dimmed()))
                .unwrap_or_default()
        );
    }
    field("total", result.total);
    field("succeeded", result.succeeded);
    field("failed", result.failed);
    if result.dry_run {
        field("mode", "dry run");
    }
    Ok(())
}

/// Stand-in service for dry runs.
struct Unopened;

impl RestoreService for Unopened {
    fn restore_to_path(
        &self,
        tombstone: &str,
        _output: &std::path::Path,
        _actor: &str,
    ) -> Result<crate::archive::RestoreReceipt> {
        Err(ArchiveError::Validation(format!(
            "dry run cannot restore {tombstone}"
        )))
    }
}
