// This is the entry point of the sheetsync CLI.
//
// **Architecture Overview:**
// - `core/` = Business logic (the section model, diffing, sync orchestration)
// - `infra/` = Implementations of core traits (state files, spreadsheet APIs)
// - `cli/` = Command-line adapters (argument parsing, output rendering)
//
// This file's job is to:
// 1. Load configuration
// 2. Parse the command line
// 3. Dispatch into the CLI layer

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "cli/cli_layer.rs"]
mod cli;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let args = cli::Cli::parse();
    cli::run(args).await
}
