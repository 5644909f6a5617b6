use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sponsornet_placement::engine::position_cache_from_config;
use sponsornet_placement::store::PgNodeStore;
use sponsornet_placement::{EngineConfig, PlacementEngine};
use sponsornet_worker::config::WorkerConfig;
use sponsornet_worker::warmer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sponsornet_worker=debug,sponsornet_placement=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let worker_config = WorkerConfig::from_env().expect("Invalid worker configuration");
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        max_attempts = engine_config.max_attempts,
        redis = engine_config.redis_url.is_some(),
        warm_interval_secs = worker_config.warm_interval.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = sponsornet_db::create_pool(&worker_config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    sponsornet_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    sponsornet_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let store = Arc::new(PgNodeStore::new(pool, engine_config.store_timeout));
    let cache = position_cache_from_config(&engine_config).expect("Invalid REDIS_URL");
    let engine = PlacementEngine::new(store.clone(), cache, engine_config);

    let roots = warmer::resolve_roots(store.as_ref(), &worker_config.warm_root_codes)
        .await
        .expect("Failed to resolve warm-up sponsors");
    if roots.is_empty() {
        tracing::warn!("No sponsor roots to warm; the network has no root yet");
    }

    // Queues persisted by Redis may predate placements made while this
    // worker was down.
    let rebuilt = engine.warm_position_caches(&roots, true).await;
    tracing::info!(rebuilt, "Initial position cache rebuild complete");

    // --- Warm-up loop ---
    let cancel = tokio_util::sync::CancellationToken::new();
    let warmer_handle = tokio::spawn(warmer::run(
        engine,
        roots,
        worker_config.warm_interval,
        cancel.clone(),
    ));

    shutdown_signal().await;
    cancel.cancel();
    let _ = warmer_handle.await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
