//! Standalone regression tests.
//!
//! Drives the assembled router the way external collaborators do: health
//! reporters, host metric feeds, and clients behind admission control.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use loadgrid_api::admission::{CLIENT_ID_HEADER, REMAINING_HEADER};
use loadgrid_api::{ApiState, build_router};
use loadgrid_autoscale::{AutoscaleConfig, Autoscaler, ScaleOutcome};
use loadgrid_cache::MetricsCache;
use loadgrid_ratelimit::{RateLimiter, RatePolicy};
use loadgrid_state::*;

fn test_state(default_policy: Option<RatePolicy>) -> ApiState {
    test_state_with_clock(default_policy, Arc::new(ManualClock::new(0)))
}

fn test_state_with_clock(default_policy: Option<RatePolicy>, clock: Arc<dyn Clock>) -> ApiState {
    let store = StateStore::open_in_memory().unwrap();
    let cache = Arc::new(MetricsCache::new(Duration::from_secs(5), clock.clone()).unwrap());
    let autoscaler = Autoscaler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cache,
        AutoscaleConfig::default(),
    )
    .unwrap();
    let mut limiter = RateLimiter::new(clock);
    if let Some(policy) = default_policy {
        limiter = limiter.with_default(policy);
    }
    ApiState {
        store,
        autoscaler: Arc::new(autoscaler),
        limiter: Arc::new(limiter),
    }
}

fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(CLIENT_ID_HEADER, client)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(req).await.unwrap()
}

#[tokio::test]
async fn standalone_api_list_instances_empty() {
    let router = build_router(test_state(None));

    let resp = send(&router, get("/api/v1/instances", "ops")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn standalone_rejects_client_over_limit() {
    let policy = RatePolicy::new(3, Duration::from_secs(60)).unwrap();
    let router = build_router(test_state(Some(policy)));

    for expected_remaining in ["2", "1", "0"] {
        let resp = send(&router, get("/api/v1/instances", "client-a")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[REMAINING_HEADER], expected_remaining);
    }

    let resp = send(&router, get("/api/v1/instances", "client-a")).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(resp).await;
    assert_eq!(json["success"], false);

    // Other clients have their own window.
    let resp = send(&router, get("/api/v1/instances", "client-b")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_healthz_bypasses_admission() {
    let policy = RatePolicy::new(1, Duration::from_secs(60)).unwrap();
    let router = build_router(test_state(Some(policy)));

    let resp = send(&router, get("/api/v1/instances", "client-a")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&router, get("/api/v1/instances", "client-a")).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..5 {
        let resp = send(&router, get("/healthz", "client-a")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn standalone_rotating_client_ids_do_not_accumulate() {
    let clock = Arc::new(ManualClock::new(0));
    let policy = RatePolicy::new(1, Duration::from_secs(1)).unwrap();
    let state = test_state_with_clock(Some(policy), clock.clone());
    let limiter = state.limiter.clone();
    let router = build_router(state);

    for i in 0..2000 {
        let resp = send(&router, get("/api/v1/instances", &format!("client-{i}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert!(!limiter.has_policy("client-0"));
    assert!(limiter.tracked_keys() <= 2000);

    clock.set(1000);
    limiter.sweep_idle();
    assert_eq!(limiter.tracked_keys(), 0);
}

#[tokio::test]
async fn standalone_unconfigured_clients_are_unlimited() {
    let router = build_router(test_state(None));

    for _ in 0..20 {
        let resp = send(&router, get("/api/v1/instances", "anyone")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(REMAINING_HEADER).is_none());
    }
}

#[tokio::test]
async fn standalone_unhealthy_instances_get_no_work() {
    let state = test_state(None);
    let first = state.store.create_instance(Region::UsEast).unwrap();
    let second = state.store.create_instance(Region::UsWest).unwrap();
    let router = build_router(state);

    let resp = send(
        &router,
        json_request(
            "PUT",
            &format!("/api/v1/instances/{}/health", first.id),
            serde_json::json!({ "status": "unhealthy", "load": 0.0 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(
        &router,
        json_request(
            "POST",
            "/api/v1/distribution",
            serde_json::json!({ "a": 1.0, "b": 2.0, "c": 3.0, "d": 4.0 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    let assignments = json["data"]["assignments"].as_array().unwrap();
    assert_eq!(assignments.len(), 4);
    for a in assignments {
        assert_eq!(a["instance_id"], second.id.as_str());
    }
}

#[tokio::test]
async fn standalone_health_report_for_unknown_instance() {
    let router = build_router(test_state(None));

    let resp = send(
        &router,
        json_request(
            "PUT",
            "/api/v1/instances/i-99999999/health",
            serde_json::json!({ "status": "healthy", "load": 1.0 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_host_pressure_scales_up_one() {
    let state = test_state(None);
    state.store.create_instance(Region::UsEast).unwrap();
    state.store.create_instance(Region::UsWest).unwrap();
    let autoscaler = state.autoscaler.clone();
    let store = state.store.clone();
    let router = build_router(state);

    let resp = send(
        &router,
        json_request(
            "POST",
            "/api/v1/host-metrics",
            serde_json::json!({ "cpu": 85.0, "memory": 40.0 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = send(&router, get("/api/v1/metrics", "ops")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["cpu"], 85.0);

    let outcome = autoscaler.poll().await.unwrap();
    let ScaleOutcome::Added(added) = outcome else {
        panic!("expected a scale-up, got {outcome:?}");
    };
    assert_eq!(added.region, Region::EuWest);
    assert_eq!(store.list_instances().unwrap().len(), 3);
}

#[tokio::test]
async fn standalone_idle_pool_stays_at_minimum() {
    let state = test_state(None);
    state.store.create_instance(Region::UsEast).unwrap();
    state.store.create_instance(Region::UsWest).unwrap();

    state
        .store
        .put_host_sample(&HostSample {
            cpu: 5.0,
            memory: 5.0,
            network: 0.0,
            reported_at: 0,
        })
        .unwrap();

    let outcome = state.autoscaler.poll().await.unwrap();
    assert!(!outcome.changed_pool());
    assert_eq!(state.store.list_instances().unwrap().len(), 2);
}
