//! HTTP surface: client identification, rate limiting middleware and the
//! gateway server.

mod client;
mod middleware;
mod routes;
mod server;

pub use client::{extract_client_key, FORWARDED_FOR, UNKNOWN_CLIENT};
pub use middleware::{
    add_rate_limit_headers, rate_limit_middleware, too_many_requests, RateLimitState,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_RATELIMIT_WINDOW,
};
pub use routes::create_router;
pub use server::HttpServer;
