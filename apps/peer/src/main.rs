//! CapyStream headless peer entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,capystream=debug")),
        )
        .init();

    let cli = cli::Cli::parse();

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.name,
        "starting CapyStream peer"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli, config))
}
