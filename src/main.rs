use anyhow::Context;
use nest_map::api::{self, AppState};
use nest_map::config::{AppConfig, DEV_JWT_SECRET};
use nest_map::store;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🏠 Nest Map - viewport API");
    info!("==========================");

    let config = AppConfig::load().context("Failed to load configuration")?;
    if config.jwt_secret == DEV_JWT_SECRET {
        warn!("Using the development JWT secret; set NEST_JWT_SECRET in production");
    }
    if config.tile_upstream_url.is_none() {
        info!("No tile upstream configured, /tiles will serve empty tiles");
    }

    let store = store::connect(&config).await?;
    let state = AppState::new(store, &config)?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🚀 Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
