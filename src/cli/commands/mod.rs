//! Command handlers, one module per command family.

pub mod archive;
pub mod batch;
pub mod config;
pub mod consolidate;
pub mod release;

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Archive(args) => archive::run(ctx, args),
        Commands::Release(args) => release::run(ctx, args),
    }
}
