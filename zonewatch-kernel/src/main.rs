/**
 * ZONEWATCH KERNEL - Entry point of the dashboard data service
 *
 * ROLE : Wires config, backend client, key-value stores, dashboard caches and
 * the REST API together, then serves until interrupted.
 *
 * ARCHITECTURE : Polling (background refresh per dashboard) + cached backend
 * client + REST API. State is rebuilt from the persisted snapshots on start.
 */

mod api_client;
mod config;
mod context;
mod dashboard;
mod export;
mod filters;
mod health;
mod http;
mod models;
mod preferences;
mod state;
mod storage;
mod transform;

use crate::api_client::ApiClient;
use crate::config::{load_config, KernelConfig};
use crate::context::AppContext;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::storage::KeyValueStore;

use anyhow::Context as _;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Builds the shared context from a loaded config. Nothing is fetched yet.
fn bootstrap(cfg: &KernelConfig) -> anyhow::Result<Arc<AppContext>> {
    std::fs::create_dir_all(&cfg.storage.data_dir)
        .with_context(|| format!("creating data dir {:?}", cfg.storage.data_dir))?;
    let store = KeyValueStore::persistent(cfg.storage.data_dir.join("store.json"))
        .context("opening the persistent store")?;
    let client = ApiClient::new(&cfg.backend, cfg.cache.ttl()).context("building the backend client")?;

    let ctx = AppContext::new(
        Arc::new(client),
        Arc::new(store),
        &cfg.dashboards.variants,
        HealthTracker::new(),
    );
    info!(
        "[kernel] {} dashboards against {} (ttl {:?})",
        cfg.dashboards.variants.len(),
        cfg.backend.base_url,
        cfg.cache.ttl()
    );
    Ok(Arc::new(ctx))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zonewatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    if cfg.server.api_key.as_deref().unwrap_or_default().is_empty() {
        warn!("SECURITY: ZONEWATCH_API_KEY not set, only /health will answer");
    }
    let ctx = bootstrap(&cfg)?;

    // initial load + background refresh, the API answers meanwhile
    let starter = Arc::clone(&ctx);
    let refresh_every = cfg.cache.refresh_interval();
    tokio::spawn(async move { starter.start(refresh_every).await });

    let app = http::build_router(AppState {
        ctx: Arc::clone(&ctx),
        api_key: cfg.server.api_key.as_deref().map(Arc::from),
    });

    let listener = TcpListener::bind(cfg.server.listen)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen))?;
    info!("[kernel] listening on http://{}", cfg.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    ctx.shutdown();
    info!("[kernel] stopped");
    Ok(())
}
