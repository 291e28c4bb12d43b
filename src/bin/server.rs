//! Fieldsync Sync Server
//!
//! Reference server that applies operations delivered by fieldsync clients,
//! deduplicating replays by idempotency key.
//!
//! # Configuration
//!
//! Environment variables:
//! - `FIELDSYNC_PORT`: Port to listen on (default: 8080)
//! - `FIELDSYNC_CONFIG`: Path to config file (default: ~/.config/fieldsync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     client_id: "tablet-1"
//! ```

use fieldsync::server::{router, ApiKeyStore, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=info,fieldsync_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Config file: {}", config.config_path.display());

    let state = AppState::new(ApiKeyStore::load(&config.config_path));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
