//! TenderScope CLI: procurement opportunity collection and ranking.
//!
//! Crawls the public listing and the open-data search API, scores matching
//! opportunities for relevance, keeps a historical store, and writes a
//! ranked report.

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
