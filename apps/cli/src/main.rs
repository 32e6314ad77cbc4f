//! FactFinder CLI: reconciled company facts from public sources.
//!
//! Resolves country, headcount, turnover, assets, website and activity code
//! for companies, falling back to their annual report for what the sources
//! leave open.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
