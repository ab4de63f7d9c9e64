//! geonote CLI: tag newly created notes with the current location.
//!
//! Watches note directories, resolves the location through an external
//! command and writes it into each new note's metadata block.

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
