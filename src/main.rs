use mtrack_ingest::{
    config::Config, db, ingest::Ingestor, server::Listener, storage::Storage, MemoryStorage,
    PgStorage, ThresholdEvaluator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(path = %cfg_path, "loaded config");

    let storage: Arc<dyn Storage> = match &cfg.database {
        Some(db_cfg) => {
            let pool = db::connect(&db_cfg.url, db_cfg.max_connections).await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            info!("connected to database");
            if db_cfg.ensure_schema {
                db::ensure_schema(&pool).await?;
                info!("database schema ready");
            }
            Arc::new(PgStorage::new(pool))
        }
        None => {
            warn!("no database configured; readings are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };

    let ingestor = Ingestor::spawn(
        storage,
        ThresholdEvaluator::new(cfg.thresholds.clone()),
        cfg.pipeline.queue_size,
    );

    let listener = Listener::bind(&cfg.server, ingestor).await?;
    info!(
        address = %listener.local_addr(),
        idle_timeout_secs = cfg.server.idle_timeout_secs,
        "tcp receiver started"
    );
    let server = listener.spawn();

    shutdown_signal().await;
    server.stop().await?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
