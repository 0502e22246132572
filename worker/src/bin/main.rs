use accounting::EngineConfig;
use anyhow::Result;
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = EngineConfig::from_env()?;
    info!(
        "Starting worker with snapshot {:?}, refreshing every {}s",
        config.snapshot_file, config.refresh_interval_secs
    );
    let worker = Arc::new(Worker::from_config(config)?);

    // Refresh once before the first tick
    if let Err(e) = worker.refresh_market().await {
        error!("Initial market refresh failed: {}", e);
    }

    let mut scheduler = worker.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutting down refresh scheduler");
    scheduler.shutdown().await?;

    Ok(())
}
