//! BattleCard CLI — competitive battle-card generator.
//!
//! Turns a company name into a structured Markdown battle card through a
//! research → pricing → news → writing pipeline.

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
