//! docsync server binary.
//!
//! Configuration comes from `DOCSYNC_*` environment variables (see
//! [`docsync_axum::server::config`]); log filtering from `RUST_LOG`.

use anyhow::Context;
use docsync_axum::server::{router, AppState, RoomRegistry, ServerConfig};
use docsync_axum::store::FsStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docsync_axum=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let store = FsStore::open(&config.data_dir)
        .await
        .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?;
    let store = Arc::new(store);
    let bind_addr = config.bind_addr;

    let state = AppState::new(RoomRegistry::new(store.clone(), store, config));
    let registry = Arc::clone(&state.registry);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutting down, flushing open documents");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
