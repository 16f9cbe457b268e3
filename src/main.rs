mod cli;
mod commands;
mod error;
mod logging;
mod services;

use clap::Parser;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = cli::Cli::parse();
    // The full error tree, with locations, is more useful than the top frame.
    commands::run(cli).await.map_err(|e| miette::miette!("{e:?}"))
}
