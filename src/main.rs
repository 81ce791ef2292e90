use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bookdesk::config::AppConfig;
use bookdesk::dashboard::Dashboard;
use bookdesk::db::{DocumentStore, SqliteStore};
use bookdesk::handlers;
use bookdesk::services::clock::SystemClock;
use bookdesk::services::network::NetworkMonitor;
use bookdesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = SqliteStore::open(&config.database_url)?;
    let shared_store: Arc<dyn DocumentStore> = Arc::new(store.clone());

    let network = NetworkMonitor::new(true);
    network.start_probe(
        Arc::clone(&shared_store),
        Duration::from_secs(config.network_probe_interval_secs.max(1)),
    );

    let dashboard = Dashboard::start(
        shared_store,
        Arc::new(SystemClock),
        config.dashboard(),
        Some(&network),
    )
    .await;
    tracing::info!(
        liveness = ?config.stream_liveness_secs,
        "dashboard started"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        dashboard,
        network,
    });

    let app = handlers::router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    state.dashboard.shutdown().await;
    state.network.shutdown();

    Ok(())
}
