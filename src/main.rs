use std::io::IsTerminal;
use std::sync::Arc;

use broker_consumer::consumer::ConsumerWorkerManager;
use broker_consumer::store::{PgAckStore, PgHeartbeater, PgMessageStore};
use broker_consumer::{ServerConfig, StoreConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokio_postgres=warn".into()),
        )
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "consumer server failed");
        std::process::exit(1);
    }
}

async fn run() -> broker_consumer::Result<()> {
    let config = ServerConfig::from_env()?;
    let store_config = StoreConfig::from_env()?;
    let pool = store_config.build_pool()?;
    let schema = store_config.schema_name.as_str();

    let manager = ConsumerWorkerManager::new(
        config.clone(),
        Arc::new(PgAckStore::new(pool.clone(), schema)?),
        Arc::new(PgMessageStore::new(pool.clone(), schema)?),
        Arc::new(PgHeartbeater::new(pool, schema)?),
    );
    manager.init(config.is_replica);

    info!(
        host = %store_config.host,
        database = %store_config.database,
        is_replica = config.is_replica,
        "consumer server running"
    );

    if let Err(err) = wait_for_shutdown_signal().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }

    manager.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
