//! Headway CLI: builds the data bundle a self-hosted regional map serves.
//!
//! Produces vector tiles, routing tiles, a geocoding index, terrain assets,
//! and per-zone transit graphs for one named area.

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
