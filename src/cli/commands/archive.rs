//! codex archive - store, restore and inspect tombstones

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;

use super::{batch, config, consolidate};
use crate::app::AppContext;
use crate::archive::RestoreService;
use crate::archive::detect::{detect_lang, guess_mime};
use crate::cli::output::{emit_json, field, format_size, heading};
use crate::error::{ArchiveError, Result};
use crate::retry::retry_with_backoff_when;
use crate::storage::BackendKind;
use crate::storage::schema::schema_statements;
use crate::utils::fs::safe_relative_path;
use crate::utils::git::resolve_revision;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    #[command(subcommand)]
    pub command: ArchiveCommand,
}

#[derive(Subcommand, Debug)]
pub enum ArchiveCommand {
    /// Scan a tree and write a staleness plan
    Plan(consolidate::PlanArgs),

    /// Archive every entry of a staleness plan
    ApplyPlan(consolidate::ApplyPlanArgs),

    /// Find near-duplicate clusters and write a consolidation plan
    ConsolidatePlan(consolidate::ConsolidatePlanArgs),

    /// Archive duplicates and replace them with shims
    ConsolidateApply(consolidate::ConsolidateApplyArgs),

    /// Archive one file
    Store(StoreArgs),

    /// Restore one tombstone to disk
    Restore(RestoreArgs),

    /// Restore every tombstone listed in a JSON or CSV manifest
    BatchRestore(batch::BatchRestoreArgs),

    /// Show a tombstone's metadata and links
    Show(ShowArgs),

    /// List recently archived tombstones
    List(ListArgs),

    /// Counts across the archive tables
    Summary,

    /// Print the DDL for a backend
    Schema(SchemaArgs),

    /// Create or upgrade the archive schema
    Init,

    /// Show the effective configuration
    ConfigShow(config::ConfigShowArgs),
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Repository the file belongs to
    pub repo: String,

    /// File to archive
    pub file: PathBuf,

    /// Path recorded for the file (default: FILE as given)
    #[arg(long)]
    pub path: Option<String>,

    /// Why the file is being archived
    #[arg(long, default_value = "manual")]
    pub reason: String,

    /// Actor performing the archive
    #[arg(long)]
    pub by: Option<String>,

    /// Git revision recorded for provenance
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Override the detected MIME type
    #[arg(long)]
    pub mime: Option<String>,

    /// Override the detected language
    #[arg(long)]
    pub lang: Option<String>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Tombstone id
    pub tombstone: String,

    /// Output file (default: the path recorded at archive time)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Actor executing the restore
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub tombstone: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Maximum number of rows
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Dialect to emit (default: configured backend)
    #[arg(long)]
    pub dialect: Option<String>,
}

pub fn run(ctx: &AppContext, args: &ArchiveArgs) -> Result<()> {
    match &args.command {
        ArchiveCommand::Plan(args) => consolidate::run_plan(ctx, args),
        ArchiveCommand::ApplyPlan(args) => consolidate::run_apply_plan(ctx, args),
        ArchiveCommand::ConsolidatePlan(args) => consolidate::run_consolidate_plan(ctx, args),
        ArchiveCommand::ConsolidateApply(args) => consolidate::run_consolidate_apply(ctx, args),
        ArchiveCommand::Store(args) => run_store(ctx, args),
        ArchiveCommand::Restore(args) => run_restore(ctx, args),
        ArchiveCommand::BatchRestore(args) => batch::run(ctx, args),
        ArchiveCommand::Show(args) => run_show(ctx, args),
        ArchiveCommand::List(args) => run_list(ctx, args),
        ArchiveCommand::Summary => run_summary(ctx),
        ArchiveCommand::Schema(args) => run_schema(ctx, args),
        ArchiveCommand::Init => run_init(ctx),
        ArchiveCommand::ConfigShow(args) => config::run(ctx, args),
    }
}

fn run_store(ctx: &AppContext, args: &StoreArgs) -> Result<()> {
    let service = ctx.service()?;
    let actor = ctx.actor(args.by.as_deref());
    let record_path = args
        .path
        .clone()
        .unwrap_or_else(|| args.file.to_string_lossy().into_owned());
    // An unresolvable explicit revision is kept verbatim; an unresolvable HEAD is dropped.
    let commit = resolve_revision(&ctx.cwd, &args.commit)?
        .or_else(|| (args.commit != "HEAD").then(|| args.commit.clone()));
    let bytes = std::fs::read(&args.file).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(format!("file not found: {}", args.file.display()))
        } else {
            ArchiveError::Io(err)
        }
    })?;
    let mime = args
        .mime
        .clone()
        .or_else(|| guess_mime(Path::new(&record_path)));
    let lang = args
        .lang
        .clone()
        .or_else(|| detect_lang(Path::new(&record_path)));

    let receipt = service.store(&crate::archive::StoreRequest {
        repo: &args.repo,
        path: &record_path,
        by: &actor,
        reason: &args.reason,
        commit_sha: commit.as_deref(),
        bytes: &bytes,
        mime: mime.as_deref(),
        lang: lang.as_deref(),
    })?;

    if ctx.json {
        return emit_json(&receipt);
    }
    println!("{} {}", "Archived".green().bold(), record_path.cyan());
    field("tombstone", &receipt.tombstone);
    field("sha256", &receipt.sha256);
    field("size", format_size(receipt.size_bytes));
    Ok(())
}

fn run_restore(ctx: &AppContext, args: &RestoreArgs) -> Result<()> {
    let service = ctx.service()?;
    let actor = ctx.actor(args.by.as_deref());
    let output = match &args.out {
        Some(out) => out.clone(),
        None => {
            let stored = service
                .dal()
                .get_tombstone(&args.tombstone)?
                .ok_or_else(|| ArchiveError::TombstoneNotFound(args.tombstone.clone()))?;
            ctx.cwd.join(safe_relative_path(&stored.record.path)?)
        }
    };

    let receipt = retry_with_backoff_when(&ctx.config.retry, ArchiveError::is_retryable, || {
        service.restore_to_path(&args.tombstone, &output, &actor)
    })?;

    if ctx.json {
        return emit_json(&receipt);
    }
    println!(
        "{} {} -> {}",
        "Restored".green().bold(),
        receipt.tombstone,
        receipt.output.display().to_string().cyan()
    );
    field("sha256", &receipt.sha256);
    field("size", format_size(receipt.size_bytes));
    Ok(())
}

fn run_show(ctx: &AppContext, args: &ShowArgs) -> Result<()> {
    let service = ctx.service()?;
    let stored = service
        .dal()
        .get_tombstone(&args.tombstone)?
        .ok_or_else(|| ArchiveError::TombstoneNotFound(args.tombstone.clone()))?;
    let links = service.links_for(&args.tombstone)?;

    if ctx.json {
        return emit_json(&json!({ "tombstone": stored.record, "links": links }));
    }
    let record = &stored.record;
    heading(&record.id);
    field("repo", &record.repo);
    field("path", record.path.cyan());
    field("sha256", &record.sha256);
    field("size", format_size(record.size_bytes));
    field("actor", &record.actor);
    field("reason", &record.reason);
    field("commit", record.commit_sha.as_deref().unwrap_or("-"));
    field("mime", record.mime.as_deref().unwrap_or("-"));
    field("lang", record.lang.as_deref().unwrap_or("-"));
    field("archived", &record.created_at);
    for link in &links {
        field("link", format!("{} -> {}", link.duplicate, link.canonical));
    }
    Ok(())
}

fn run_list(ctx: &AppContext, args: &ListArgs) -> Result<()> {
    let service = ctx.service()?;
    let records = service.list_recent(args.limit)?;

    if ctx.json {
        return emit_json(&json!({ "tombstones": records, "count": records.len() }));
    }
    if records.is_empty() {
        println!("No tombstones found.");
        return Ok(());
    }
    heading("Archived items");
    println!("{}", "─".repeat(60));
    for record in &records {
        println!(
            "{}  {}  {} ({})",
            record.id.dimmed(),
            record.repo,
            record.path.cyan(),
            format_size(record.size_bytes).dimmed()
        );
    }
    Ok(())
}

fn run_summary(ctx: &AppContext) -> Result<()> {
    let service = ctx.service()?;
    let summary = service.summary()?;

    if ctx.json {
        return emit_json(&summary);
    }
    heading("Archive summary");
    field("backend", service.dal().kind());
    field("tombstones", summary.tombstones);
    field("total size", format_size(summary.total_bytes));
    field("links", summary.links);
    field("releases", summary.releases);
    field("components", summary.components);
    Ok(())
}

fn run_schema(ctx: &AppContext, args: &SchemaArgs) -> Result<()> {
    let kind = match &args.dialect {
        Some(dialect) => dialect.parse::<BackendKind>()?,
        None => ctx.config.backend.kind()?,
    };
    let statements = schema_statements(kind);

    if ctx.json {
        return emit_json(&json!({ "dialect": kind.as_str(), "statements": statements }));
    }
    for statement in statements {
        println!("{};", statement.trim().trim_end_matches(';'));
    }
    Ok(())
}

fn run_init(ctx: &AppContext) -> Result<()> {
    // Opening the backend applies any pending schema.
    let dal = ctx.open_dal()?;

    if ctx.json {
        return emit_json(&json!({ "backend": dal.kind().as_str(), "schema": "ok" }));
    }
    println!(
        "{} archive schema ensured for backend={}",
        "✓".green(),
        dal.kind()
    );
    Ok(())
}
