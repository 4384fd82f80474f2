mod auth;
mod cloud;
mod config;
mod error;
mod hub;
mod rate_limit;
mod rooms;
mod routes;
mod ws;

use std::sync::Arc;

use config::AppConfig;
use hub::NotificationHub;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seisami_api=info".parse()?)
                .add_directive("seisami_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting seisami-api with config: {:?}", config);

    if let Some(dir) = config.data_dir.as_deref() {
        std::fs::create_dir_all(dir)?;
    }

    let state = AppState::from_config(config, NotificationHub::spawn());
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("seisami-api listening on {}", bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("seisami-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
