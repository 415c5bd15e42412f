//! Turnstile - In-process Rate Limiting for HTTP Gateways
//!
//! This crate implements a continuous token-bucket rate limiter keyed by
//! client and request path, an axum middleware that enforces it, and a
//! background janitor that evicts idle buckets. It also provides a
//! sliding-window throttle for pacing outbound calls to third-party APIs.
//!
//! All state is in memory and local to one process.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
