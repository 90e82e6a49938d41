use boardsync::config::{SyncConfig, env_parse};
use boardsync::{db, routes, services, state};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum HubError {
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), HubError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = env_parse("PORT", 3000);
    let config = SyncConfig::from_env();

    // The durable store is optional: without it the hub only relays channels.
    let pool = match std::env::var("DATABASE_URL") {
        Ok(url) => Some(db::init_pool(&url).await?),
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; retention task disabled");
            None
        }
    };

    let state = state::HubState::new(pool);
    let _retention = state
        .durable_store()
        .map(|store| services::retention::spawn_retention_task(store, config.retention, config.cleanup_interval));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    tracing::info!(%port, "boardsync hub listening");
    axum::serve(listener, app).await?;
    Ok(())
}
