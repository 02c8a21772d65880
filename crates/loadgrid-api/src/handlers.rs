//! REST API handlers.
//!
//! Reads and writes go through `StateStore` or the `Autoscaler`; every
//! response uses the `ApiResponse` JSON envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, warn};

use loadgrid_autoscale::LoadMap;
use loadgrid_state::store::epoch_millis;
use loadgrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn store_unavailable(e: StateError) -> impl IntoResponse {
    warn!(error = %e, "state store request failed");
    error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse + use<> {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_instances() {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => store_unavailable(e).into_response(),
    }
}

/// Health report body.
#[derive(Debug, Deserialize)]
pub struct HealthReport {
    pub status: InstanceStatus,
    pub load: f64,
}

/// PUT /api/v1/instances/:id/health
pub async fn report_health(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<HealthReport>,
) -> impl IntoResponse {
    match state.store.report_health(&id, report.status, report.load) {
        Ok(Some(instance)) => {
            debug!(%id, status = ?instance.status, load = instance.load, "health reported");
            state.autoscaler.invalidate_metrics();
            ApiResponse::ok(instance).into_response()
        }
        Ok(None) => error_response("instance not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_unavailable(e).into_response(),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// Host utilization report body.
#[derive(Debug, Deserialize)]
pub struct HostMetricsReport {
    pub cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub network: f64,
}

impl HostMetricsReport {
    fn validate(&self) -> Result<(), String> {
        let percent = |v: f64| (0.0..=100.0).contains(&v);
        if !percent(self.cpu) {
            return Err(format!("cpu must be within 0-100, got {}", self.cpu));
        }
        if !percent(self.memory) {
            return Err(format!("memory must be within 0-100, got {}", self.memory));
        }
        if !(self.network >= 0.0 && self.network.is_finite()) {
            return Err(format!("network must be non-negative, got {}", self.network));
        }
        Ok(())
    }
}

/// POST /api/v1/host-metrics
pub async fn report_host_metrics(
    State(state): State<ApiState>,
    Json(report): Json<HostMetricsReport>,
) -> impl IntoResponse {
    if let Err(msg) = report.validate() {
        return error_response(&msg, StatusCode::UNPROCESSABLE_ENTITY).into_response();
    }
    let sample = HostSample {
        cpu: report.cpu,
        memory: report.memory,
        network: report.network,
        reported_at: epoch_millis(),
    };
    match state.store.put_host_sample(&sample) {
        Ok(()) => {
            state.autoscaler.invalidate_metrics();
            (StatusCode::ACCEPTED, ApiResponse::ok(sample)).into_response()
        }
        Err(e) => store_unavailable(e).into_response(),
    }
}

/// GET /api/v1/metrics
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match state.autoscaler.current_metrics().await {
        Ok(metrics) => ApiResponse::ok(metrics).into_response(),
        Err(e) => {
            warn!(error = %e, "metrics read failed");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

// ── Distribution ───────────────────────────────────────────────

/// POST /api/v1/distribution
pub async fn distribute_load(
    State(state): State<ApiState>,
    Json(load): Json<LoadMap>,
) -> impl IntoResponse {
    match state.autoscaler.distribute_load(&load).await {
        Ok(distribution) => ApiResponse::ok(distribution).into_response(),
        Err(e) => {
            warn!(error = %e, "load distribution failed");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
