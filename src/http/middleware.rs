//! Rate limiting middleware for axum.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

use super::client::extract_client_key;
use crate::ratelimit::{Decision, RateLimiterBackend};

/// Requests allowed per window by the resolved policy.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Length of the policy window in seconds.
pub const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");
/// Whole tokens left in the caller's bucket.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix time (seconds) by which the bucket is full again.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared state for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    /// The limiter making admission decisions
    backend: Arc<dyn RateLimiterBackend>,
    /// Paths that bypass rate limiting entirely (exact match)
    exempt_paths: Arc<HashSet<String>>,
}

impl RateLimitState {
    /// Create middleware state around `backend`.
    pub fn new<I, S>(backend: Arc<dyn RateLimiterBackend>, exempt_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend,
            exempt_paths: Arc::new(exempt_paths.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether requests to `path` skip rate limiting.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.contains(path)
    }
}

/// Throttle each non-exempt request by client and path.
///
/// Allowed requests run the inner service and get `X-RateLimit-*` headers on
/// the way out. Rejected requests get a 429 with the same headers and a JSON
/// body; the inner service is never called for them.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if state.is_exempt(&path) {
        trace!(path = %path, "Exempt from rate limiting");
        return next.run(request).await;
    }

    let client_key = extract_client_key(&request);
    let decision = state.backend.check_rate_limit(&client_key, &path);

    if decision.allowed {
        let mut response = next.run(request).await;
        add_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    warn!(
        client = %client_key,
        path = %path,
        limit = decision.limit,
        window = decision.window,
        retry_after = decision.retry_after(),
        "Rate limit exceeded"
    );

    too_many_requests(&decision)
}

/// Build the 429 response for a rejected decision.
pub fn too_many_requests(decision: &Decision) -> Response {
    let body = Json(json!({
        "error": "Rate limit exceeded",
        "message": format!("Too many requests. Please retry after {}", decision.reset_at),
        "retry_after": decision.retry_after(),
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    add_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Attach the `X-RateLimit-*` headers describing `decision`.
pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_WINDOW, HeaderValue::from(decision.window));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}
