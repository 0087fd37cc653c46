use anyhow::{Context, Result};
use interactive_service::background::BackgroundTasks;
use interactive_service::config::Config;
use interactive_service::consumers::{start_read_event_consumer, ReadEventConsumerConfig};
use interactive_service::metrics::ConsumerMetrics;
use interactive_service::repository::{
    CachedInteractiveRepository, InteractiveRepository, PgInteractiveStore, RedisInteractiveCache,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,interactive_service=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!(env = %config.app.env, "Starting interactive-service");

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database pool ready, migrations applied");

    let redis_client =
        redis::Client::open(config.redis.url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connection established");

    let background = BackgroundTasks::new(config.cache.write_timeout());
    let repo: Arc<dyn InteractiveRepository> = Arc::new(CachedInteractiveRepository::new(
        Arc::new(PgInteractiveStore::new(pg_pool.clone())),
        Arc::new(RedisInteractiveCache::new(redis_conn)),
        background.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = match ReadEventConsumerConfig::from_env() {
        Some(consumer_config) => {
            let registry = prometheus::Registry::new();
            let metrics = ConsumerMetrics::new(&registry)
                .context("Failed to register consumer metrics")?;

            start_read_event_consumer(repo.clone(), metrics, consumer_config, shutdown_rx.clone())
        }
        None => {
            info!("Read event consumer disabled: KAFKA_BROKERS not configured");
            None
        }
    };

    info!("interactive-service is running");
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = consumer_task {
        if let Err(e) = handle.await {
            error!(error = %e, "Read event consumer task panicked");
        }
    }

    background.shutdown().await;
    pg_pool.close().await;

    info!("interactive-service shut down");
    Ok(())
}
