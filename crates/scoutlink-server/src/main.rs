//! Scoutlink server binary: configuration, background purges, and the HTTP
//! listener.  The routes themselves live in the library.

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use scoutlink_server::{serve, AppState, AttachmentStore, ServerConfig};
use scoutlink_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scoutlink_server=debug")),
        )
        .init();

    info!("Starting Scoutlink server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");

    let attachments = AttachmentStore::new(&config).await?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(config, db, attachments);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict per-IP buckets idle for more than 10 minutes
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_idle(Duration::from_secs(600)).await;
        }
    });

    // Drop elapsed quota windows and realtime channels nobody listens to
    let quota = app_state.quota.clone();
    let hub = app_state.hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            quota.purge_expired().await;
            let pruned = hub.prune();
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned idle realtime channels");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
