use anyhow::Result;
use clap::Parser;

use touchline_cli::cli::{dispatch, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Structured JSON logging on stderr; stdout carries command output.
    // Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("touchline=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cfg = touchline_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let today = chrono::Local::now().date_naive();

    dispatch(cli, cfg, today).await
}
