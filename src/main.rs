mod app;
mod cli;
mod config;
mod models;
mod providers;
mod services;
mod ui;
mod voice;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::CliArgs;
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_args(CliArgs::parse())?;
    tracing::debug!("Starting with {:?}", config);
    app::run(config).await
}
