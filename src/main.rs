#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use anyhow::Result;
use clap::Parser;
use semblance::Config;
use semblance::cli::Cli;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_or_init_at(path)?,
        None => Config::load_or_init()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let level = config.observability.tracing_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: Failed to install tracing subscriber: {e}");
    }

    semblance::app::dispatch::dispatch(cli, config).await
}
