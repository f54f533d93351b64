//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use allocator::{
    Allocator, AllocatorConfig, ExpirySweeper, PromotionWorker, RetryPolicy, TracingNotifier,
};
use api::config::Config;
use api::routes::events::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{AllocatorStore, InMemoryStore, PostgresStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Builds the allocator and workers over the given store, then serves
/// until a shutdown signal arrives.
async fn run_server<S: AllocatorStore + 'static>(
    store: Arc<S>,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    let allocator = Arc::new(Allocator::new(
        store,
        Arc::new(TracingNotifier),
        AllocatorConfig {
            pending_ttl_secs: config.pending_ttl_secs,
            retry: RetryPolicy::default(),
        },
    ));
    let state = Arc::new(AppState {
        allocator: Arc::clone(&allocator),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        Arc::clone(&allocator),
        Duration::from_secs(config.sweep_interval_secs),
        shutdown_rx.clone(),
    );
    let promoter = PromotionWorker::new(
        Arc::clone(&allocator),
        Duration::from_secs(config.promotion_poll_secs),
        shutdown_rx,
    );
    let sweeper_handle = tokio::spawn(sweeper.run());
    let promoter_handle = tokio::spawn(promoter.run());

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    let _ = promoter_handle.await;

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and serve
    let config = Config::from_env();
    match config.database_url.clone() {
        Some(database_url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("failed to connect to database");
            let store = PostgresStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            run_server(Arc::new(store), config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running with the in-memory store");
            run_server(Arc::new(InMemoryStore::new()), config, metrics_handle).await;
        }
    }
}
