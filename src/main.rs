//! codex - content-addressed archive and release packaging CLI

use std::process::ExitCode;

use clap::Parser;

use codex_archive::Result;
use codex_archive::app::AppContext;
use codex_archive::cli::Cli;
use codex_archive::cli::output::emit_error;
use codex_archive::config::ArchiveAppConfig;
use codex_archive::env::EnvSnapshot;
use codex_archive::logging::init_tracing;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            emit_error(&e, cli.json);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let env = EnvSnapshot::from_process();
    let config = ArchiveAppConfig::load(cli.config_file.as_deref(), &env)?;
    init_tracing(&config.logging, cli.verbose, cli.quiet, &env)?;

    let ctx = AppContext::new(config, env, cli.json, cli.quiet);
    codex_archive::cli::commands::run(&ctx, &cli.command)
}
