use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use allotment::config::EngineConfig;
use allotment::engine::Engine;
use allotment::notify::NotifyHub;
use allotment::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();
    allotment::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::with_options(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        config.options.clone(),
    )?);

    info!("allotment engine ready");
    info!("  wal: {}", config.wal_path().display());
    info!("  items: {}", engine.item_count());
    info!("  sweep: every {:?}, grace {:?}", config.sweep_interval, config.ephemeral_grace);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        config.ephemeral_grace,
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.sweep_interval,
        config.compact_threshold,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");

    sweeper_task.abort();
    compactor_task.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("allotment stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
