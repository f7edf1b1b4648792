use std::sync::Arc;

use anyhow::Context;
use chatrelay::{AppState, Config, SqliteStore, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatrelay=info")),
        )
        .init();

    let store = SqliteStore::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    info!(url = %config.database_url, "store connected");

    let app = router(AppState::new(Arc::new(store)));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(addr = %listener.local_addr()?, "server running");
    axum::serve(listener, app).await?;

    Ok(())
}
