//! framepin - checksum-pinned binary framework resolver

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use framepin_cli::cmd;
use framepin_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest = cli.manifest.as_path();

    match cli.command {
        Commands::Check => cmd::check::check(manifest).await,
        Commands::Resolve { product, json } => cmd::resolve::resolve(manifest, &product, json).await,
        Commands::Fetch {
            products,
            unpack,
            store,
            cache,
            no_cache,
        } => {
            let options = cmd::fetch::FetchOptions {
                unpack,
                store,
                cache,
                no_cache,
                quiet: cli.quiet,
            };
            cmd::fetch::fetch(manifest, &products, options).await
        }
        Commands::List => cmd::list::list(manifest).await,
        Commands::Checksum { files } => cmd::checksum::checksum(&files),
    }
}
