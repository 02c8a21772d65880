//! Admission middleware.
//!
//! Keys each request by its `x-client-id` header and asks the rate limiter
//! whether to let it through. Rejected requests get `429` and never reach a
//! handler.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::ApiState;
use crate::handlers::error_response;

/// Header identifying the calling client.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Header reporting admissions left in the client's window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Key used for requests without a client id.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Extract the admission key for a request.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

/// `route_layer` middleware applying the rate limiter.
pub async fn admit(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let key = client_key(req.headers());

    if !state.limiter.check_rate_limit(&key) {
        debug!(client = %key, path = %req.uri().path(), "request rejected by rate limiter");
        return error_response("rate limit exceeded", StatusCode::TOO_MANY_REQUESTS).into_response();
    }

    let remaining = state.limiter.remaining(&key);
    let mut resp = next.run(req).await;
    if let Some(remaining) = remaining {
        resp.headers_mut()
            .insert(REMAINING_HEADER, HeaderValue::from(remaining));
    }
    resp
}
