//! Rate limiter trait used by the HTTP middleware.

use super::limiter::{Decision, RateLimiter};

/// Anything that can make an admission decision for a client and resource.
///
/// Implementations must not block on I/O: the middleware calls this inline on
/// every request.
pub trait RateLimiterBackend: Send + Sync {
    /// Check and consume one unit of allowance at the backend's current time.
    fn check_rate_limit(&self, client_key: &str, resource_key: &str) -> Decision;
}

impl RateLimiterBackend for RateLimiter {
    fn check_rate_limit(&self, client_key: &str, resource_key: &str) -> Decision {
        self.check_now(client_key, resource_key)
    }
}
