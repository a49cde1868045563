//! codex release - init-manifest / pack / verify / unpack

use std::path::PathBuf;

use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;

use crate::app::AppContext;
use crate::cli::output::{emit_json, field, heading};
use crate::error::{ArchiveError, Result};
use crate::release::{init_manifest, pack_release, unpack_bundle, verify_bundle};
use crate::utils::fs::write_atomic;

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    #[command(subcommand)]
    pub command: ReleaseCommand,
}

#[derive(Subcommand, Debug)]
pub enum ReleaseCommand {
    /// Write a starter release manifest
    #[command(disable_version_flag = true)]
    InitManifest(InitManifestArgs),

    /// Build a bundle from a manifest
    Pack(PackArgs),

    /// Check a bundle's locked manifest hash
    Verify(VerifyArgs),

    /// Verify and extract a bundle
    Unpack(UnpackArgs),
}

#[derive(Args, Debug)]
pub struct InitManifestArgs {
    #[arg(long)]
    pub release_id: String,

    /// Release version
    #[arg(long)]
    pub version: String,

    /// Actor recorded in the manifest
    #[arg(long)]
    pub by: Option<String>,

    /// Output path
    #[arg(long, default_value = "release.manifest.json")]
    pub out: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    pub manifest: PathBuf,

    /// Scratch directory for staged files (emptied first)
    #[arg(long, default_value = ".codex/release/staging")]
    pub staging: PathBuf,

    /// Bundle path (default: dist/<release_id>-<version>.tar.gz)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub bundle: PathBuf,

    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    pub bundle: PathBuf,

    pub dest: PathBuf,

    /// Run the manifest's post_unpack_commands
    #[arg(long)]
    pub allow_scripts: bool,

    #[arg(long)]
    pub by: Option<String>,
}

pub fn run(ctx: &AppContext, args: &ReleaseArgs) -> Result<()> {
    match &args.command {
        ReleaseCommand::InitManifest(args) => run_init_manifest(ctx, args),
        ReleaseCommand::Pack(args) => run_pack(ctx, args),
        ReleaseCommand::Verify(args) => run_verify(ctx, args),
        ReleaseCommand::Unpack(args) => run_unpack(ctx, args),
    }
}

fn run_init_manifest(ctx: &AppContext, args: &InitManifestArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        return Err(ArchiveError::Validation(format!(
            "{} already exists (use --force to overwrite)",
            args.out.display()
        )));
    }
    let manifest = init_manifest(&args.release_id, &args.version, &ctx.actor(args.by.as_deref()))?;
    let mut bytes = serde_json::to_vec_pretty(&manifest)?;
    bytes.push(b'\n');
    write_atomic(&args.out, &bytes)?;

    if ctx.json {
        return emit_json(&json!({ "path": args.out, "manifest": manifest }));
    }
    println!("{} {}", "Wrote".green().bold(), args.out.display());
    Ok(())
}

fn default_bundle_path(manifest: &std::path::Path) -> Result<PathBuf> {
    let parsed = crate::release::load_manifest(manifest)?;
    Ok(PathBuf::from("dist").join(format!(
        "{}-{}.tar.gz",
        parsed.release_id, parsed.version
    )))
}

fn run_pack(ctx: &AppContext, args: &PackArgs) -> Result<()> {
    let out = match &args.out {
        Some(out) => out.clone(),
        None => default_bundle_path(&args.manifest)?,
    };
    let service = ctx.service()?;
    let report = pack_release(&service, &args.manifest, &args.staging, &out)?;

    if ctx.json {
        return emit_json(&json!({
            "bundle": report.bundle,
            "lock": report.lock_path,
            "sha256_manifest": report.sha256_manifest,
            "manifest": report.locked,
        }));
    }
    println!("{} {}", "Packed".green().bold(), report.bundle.display());
    field("manifest", &report.sha256_manifest);
    field("lock", report.lock_path.display());
    Ok(())
}

fn run_verify(ctx: &AppContext, args: &VerifyArgs) -> Result<()> {
    let report = verify_bundle(&ctx.evidence(), &ctx.actor(args.by.as_deref()), &args.bundle)?;

    if !report.ok {
        if !ctx.json {
            heading(&format!("{} {}", "✗ mismatch".red().bold(), args.bundle.display()));
            field("recorded", report.sha256_manifest.as_deref().unwrap_or("-"));
            field("computed", &report.computed);
        }
        return Err(ArchiveError::Integrity(format!(
            "manifest hash mismatch in {}",
            args.bundle.display()
        )));
    }

    if ctx.json {
        return emit_json(&report);
    }
    println!("{} {}", "✓ verified".green().bold(), args.bundle.display());
    field("manifest", report.sha256_manifest.as_deref().unwrap_or("-"));
    Ok(())
}

fn run_unpack(ctx: &AppContext, args: &UnpackArgs) -> Result<()> {
    let report = unpack_bundle(
        &ctx.evidence(),
        &ctx.actor(args.by.as_deref()),
        &args.bundle,
        &args.dest,
        args.allow_scripts,
    )?;

    if ctx.json {
        return emit_json(&report);
    }
    println!("{} {}", "Unpacked".green().bold(), report.dest.display());
    field("files", report.files);
    field("symlinks", report.symlinks);
    if report.scripts_skipped > 0 {
        println!(
            "  {} {} post-unpack command(s) skipped; pass --allow-scripts to run them",
            "!".yellow(),
            report.scripts_skipped
        );
    }
    if report.scripts_run > 0 {
        field("scripts run", report.scripts_run);
    }
    Ok(())
}
