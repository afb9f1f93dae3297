//! Brood CLI entry point.

use clap::Parser;

use brood::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = brood::cli::run(cli).await {
        brood::cli::handle_error(err, json);
    }
}
