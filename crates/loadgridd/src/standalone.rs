//! Standalone mode: every subsystem in one process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use loadgrid_api::ApiState;
use loadgrid_autoscale::{Autoscaler, LeastPopulatedRegion};
use loadgrid_cache::MetricsCache;
use loadgrid_ratelimit::RateLimiter;
use loadgrid_state::{Clock, StateStore, SystemClock};

use crate::config::DaemonConfig;

/// Wire the store, cache, limiter and autoscaler together.
pub fn assemble(config: &DaemonConfig, store: StateStore) -> anyhow::Result<ApiState> {
    config.validate()?;
    let autoscale_config = config.autoscale_config()?;
    let store = store.with_sample_max_age(config.host_sample_max_age()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let cache = Arc::new(MetricsCache::new(autoscale_config.metrics_ttl, clock.clone())?);

    let mut limiter = RateLimiter::new(clock);
    if let Some(policy) = config.default_policy()? {
        limiter = limiter.with_default(policy);
    }
    for (key, policy) in config.key_policies()? {
        limiter.set_config(&key, policy);
    }
    info!(
        keyed_policies = config.rate_limit.keys.len(),
        default_policy = limiter.default_policy().is_some(),
        "rate limiter initialized"
    );

    let region_selector = LeastPopulatedRegion::new(config.regions()?)?;
    let registry = Arc::new(store.clone());
    let autoscaler = Autoscaler::new(registry.clone(), registry, cache, autoscale_config)?
        .with_region_selector(Box::new(region_selector));
    info!(
        min = autoscaler.config().min_instances,
        max = autoscaler.config().max_instances,
        "autoscaler initialized"
    );

    Ok(ApiState {
        store,
        autoscaler: Arc::new(autoscaler),
        limiter: Arc::new(limiter),
    })
}

pub async fn run(config: DaemonConfig, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("LoadGrid daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("loadgrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let state = assemble(&config, store)?;
    let autoscaler = state.autoscaler.clone();

    match autoscaler.ensure_minimum().await {
        Ok(0) => {}
        Ok(added) => info!(added, "pool grown to minimum size"),
        Err(e) => warn!(error = %e, "could not reach minimum pool size at startup"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = loadgrid_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c; shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = autoscale_handle.await;

    info!("LoadGrid daemon stopped");
    Ok(())
}
