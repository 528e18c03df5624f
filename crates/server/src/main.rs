use std::sync::Arc;

use db::{DBService, SqliteUsageSink, UsageStoreError};
use pipeline::{ConfigError, PipelineConfig, PipelineService, StageError, UsageAggregator};
use server::{AppState, routes};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] StageError),
    #[error(transparent)]
    Store(#[from] UsageStoreError),
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    dotenv::dotenv().ok();
    utils::logging::init_tracing();

    let config = PipelineConfig::load()?;
    let sample_capacity = config.usage.sample_capacity;

    let store = if env_flag("DISABLE_USAGE_STORE") {
        tracing::info!("Usage store disabled, statistics are kept in memory only");
        None
    } else {
        Some(DBService::new().await?)
    };

    let mut aggregator = UsageAggregator::from_config(&config.usage);
    if let Some(store) = &store {
        aggregator = aggregator.with_sink(Arc::new(SqliteUsageSink::new(store.pool.clone())));
    }

    let service = Arc::new(PipelineService::from_config(&config, Arc::new(aggregator))?);

    // Close live sessions that were never exited
    let sweeper = service.clone();
    let idle_timeout = config.sessions.idle_timeout();
    let sweep_interval = config.sessions.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let expired = sweeper.expire_idle_sessions(idle_timeout);
            if expired > 0 {
                tracing::info!(
                    "Expired {} idle session(s), {} still live",
                    expired,
                    sweeper.live_session_count()
                );
            }
        }
    });

    let state = AppState::new(service, store, sample_capacity);
    let app_router = routes::router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or_else(|| {
            tracing::info!("No PORT environment variable set, using port 0 for auto-assignment");
            0
        });
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!("Server running on http://{host}:{actual_port}");

    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
    tracing::info!("Shutting down");
}
