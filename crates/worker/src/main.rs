mod bootstrap;
mod cli;
mod commands;
mod config;
mod pipeline_config;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bootstrap::Worker;
use crate::cli::Cli;
use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskline_worker=debug,taskline_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;
    tracing::debug!(?config, "Loaded worker configuration");

    let worker = Worker::build(config).await?;
    commands::execute(cli.command, worker).await
}
