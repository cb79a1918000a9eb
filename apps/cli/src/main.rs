//! AutoFormatter CLI — AI-assisted document builds.
//!
//! Reformats a source document through an AI model (or a person pasting a
//! web chat reply), then merges the result with pre-built pages into one
//! styled document.

mod build;
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
