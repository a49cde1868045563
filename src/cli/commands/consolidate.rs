//! codex archive plan / apply-plan / consolidate-plan / consolidate-apply

use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::AppContext;
use crate::cli::output::{emit_json, field, heading};
use crate::consolidate::{
    ApplyReport, ConsolidationApplyOptions, ConsolidationPlan, Plan, PlanApplyOptions,
    apply_consolidation, apply_plan, build_consolidation_plan, build_plan,
};
use crate::error::{ArchiveError, Result};
use crate::utils::fs::write_atomic;
use crate::utils::git::head_commit;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Tree to scan
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Where to write the plan
    #[arg(long, default_value = ".codex/archive/plan.json")]
    pub out: PathBuf,

    /// Revision the analysis refers to (recorded in the plan)
    #[arg(long)]
    pub sha: Option<String>,

    /// Minimum age in days for the age signal (default: plan.age_days)
    #[arg(long)]
    pub age: Option<u64>,

    /// Extra glob patterns to skip
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ApplyPlanArgs {
    /// Plan written by `archive plan`
    pub plan: PathBuf,

    /// Root the plan's paths are relative to (default: the plan's root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Repository recorded on each tombstone
    #[arg(long, default_value = "local")]
    pub repo: String,

    /// Actor performing the archive
    #[arg(long)]
    pub by: Option<String>,

    /// Keep the original files instead of replacing them with stubs
    #[arg(long)]
    pub no_write_stubs: bool,
}

#[derive(Args, Debug)]
pub struct ConsolidatePlanArgs {
    /// Tree to scan
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Where to write the plan
    #[arg(long, default_value = ".codex/archive/consolidation.json")]
    pub out: PathBuf,

    /// Extra glob patterns to skip
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ConsolidateApplyArgs {
    /// Plan written by `archive consolidate-plan`
    pub plan: PathBuf,

    /// Root the plan's paths are relative to (default: the plan's root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Repository recorded on each tombstone
    #[arg(long, default_value = "local")]
    pub repo: String,

    /// Actor performing the consolidation
    #[arg(long)]
    pub by: Option<String>,

    /// Skip archiving canonicals and linking duplicates to them
    #[arg(long)]
    pub no_link: bool,
}

fn excludes(ctx: &AppContext, extra: &[String]) -> Vec<String> {
    let mut patterns = ctx.config.plan.excludes.clone();
    patterns.extend(extra.iter().cloned());
    patterns
}

fn write_plan<T: Serialize>(out: &Path, plan: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(plan)?;
    bytes.push(b'\n');
    write_atomic(out, &bytes)
}

fn read_plan<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(format!("plan not found: {}", path.display()))
        } else {
            ArchiveError::Io(err)
        }
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| ArchiveError::Validation(format!("invalid plan {}: {err}", path.display())))
}

fn plan_root(explicit: Option<&PathBuf>, recorded: &str) -> PathBuf {
    match explicit {
        Some(root) => root.clone(),
        None if recorded.is_empty() => PathBuf::from("."),
        None => PathBuf::from(recorded),
    }
}

fn print_report(ctx: &AppContext, title: &str, report: &ApplyReport) -> Result<()> {
    if ctx.json {
        return emit_json(report);
    }
    heading(title);
    for entry in &report.applied {
        println!(
            "  {} {} {}",
            "✓".green(),
            entry.path.cyan(),
            entry.tombstone.as_deref().unwrap_or("").dimmed()
        );
    }
    for entry in &report.skipped {
        println!(
            "  {} {} ({})",
            "-".yellow(),
            entry.path,
            entry.skipped.as_deref().unwrap_or("skipped")
        );
    }
    field("applied", report.applied.len());
    field("skipped", report.skipped.len());
    Ok(())
}

pub fn run_plan(ctx: &AppContext, args: &PlanArgs) -> Result<()> {
    let age = args.age.unwrap_or(ctx.config.plan.age_days);
    let plan = build_plan(
        &args.root,
        args.sha.as_deref(),
        &excludes(ctx, &args.exclude),
        age,
        &ctx.config.plan.staleness,
    )?;
    write_plan(&args.out, &plan)?;

    if ctx.json {
        return emit_json(&plan);
    }
    heading("Staleness plan");
    for entry in &plan.entries {
        println!("  {:>5.2}  {}  {}", entry.score, entry.path.cyan(), entry.reason.dimmed());
    }
    field("candidates", plan.entries.len());
    field("written", args.out.display());
    Ok(())
}

pub fn run_apply_plan(ctx: &AppContext, args: &ApplyPlanArgs) -> Result<()> {
    let plan: Plan = read_plan(&args.plan)?;
    let root = plan_root(args.root.as_ref(), &plan.root);
    let service = ctx.service()?;
    let report = apply_plan(
        &service,
        &plan,
        &root,
        &PlanApplyOptions {
            repo: args.repo.clone(),
            actor: ctx.actor(args.by.as_deref()),
            write_stubs: !args.no_write_stubs,
        },
    )?;
    print_report(ctx, "Plan applied", &report)
}

pub fn run_consolidate_plan(ctx: &AppContext, args: &ConsolidatePlanArgs) -> Result<()> {
    let plan = build_consolidation_plan(
        &args.root,
        &excludes(ctx, &args.exclude),
        &ctx.config.plan.similarity,
        &ctx.config.plan.canon,
    )?;
    write_plan(&args.out, &plan)?;

    if ctx.json {
        return emit_json(&plan);
    }
    heading("Consolidation plan");
    for cluster in &plan.clusters {
        println!(
            "  {} {} ({:.2})",
            "●".green(),
            cluster.canonical.path.cyan(),
            cluster.canonical.score
        );
        for duplicate in &cluster.duplicates {
            println!(
                "    {} {} [{}]",
                "↳".dimmed(),
                duplicate.path,
                duplicate.reason.dimmed()
            );
        }
    }
    field("clusters", plan.clusters.len());
    field("written", args.out.display());
    Ok(())
}

pub fn run_consolidate_apply(ctx: &AppContext, args: &ConsolidateApplyArgs) -> Result<()> {
    let plan: ConsolidationPlan = read_plan(&args.plan)?;
    let root = plan_root(args.root.as_ref(), &plan.root);
    let service = ctx.service()?;
    let report = apply_consolidation(
        &service,
        &plan,
        &root,
        &ConsolidationApplyOptions {
            repo: args.repo.clone(),
            actor: ctx.actor(args.by.as_deref()),
            commit_sha: head_commit(&root)?,
            link_canonical: !args.no_link,
        },
    )?;
    print_report(ctx, "Consolidation applied", &report)
}
