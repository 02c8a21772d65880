//! loadgrid-api — REST API for LoadGrid.
//!
//! Exposes the instance pool and the autoscaler to external collaborators
//! (health reporters, routers) and enforces per-client admission control on
//! every `/api/v1` request.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/instances` | List all instances |
//! | PUT | `/api/v1/instances/{id}/health` | Report instance status and load |
//! | POST | `/api/v1/host-metrics` | Report host utilization |
//! | GET | `/api/v1/metrics` | Current system metrics (cached) |
//! | POST | `/api/v1/distribution` | Distribute a load map over the pool |
//! | GET | `/healthz` | Liveness (not rate limited) |

pub mod admission;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use loadgrid_autoscale::Autoscaler;
use loadgrid_ratelimit::RateLimiter;
use loadgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub autoscaler: Arc<Autoscaler>,
    /// Clients without a policy of their own fall back to the limiter's
    /// default, or are unlimited without one.
    pub limiter: Arc<RateLimiter>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/instances", get(handlers::list_instances))
        .route("/instances/{id}/health", put(handlers::report_health))
        .route("/host-metrics", post(handlers::report_host_metrics))
        .route("/metrics", get(handlers::get_metrics))
        .route("/distribution", post(handlers::distribute_load))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission::admit,
        ))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
