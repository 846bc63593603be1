//! `tapline` binary running one polling metrics adapter per process.

use clap::Parser as _;
use tapline_adapters::cli::{init_logging, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.log_format);
    cli.run().await
}
