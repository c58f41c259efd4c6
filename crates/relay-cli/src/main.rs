mod bootstrap;
mod cli_args;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap::{init_tracing, run};
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}
