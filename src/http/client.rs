//! Client identification.

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Header set by reverse proxies listing the original client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Best-effort identifier for the request's origin.
///
/// Prefers the first entry of `X-Forwarded-For`, then the transport peer
/// address, then `"unknown"`. This is a heuristic, not authentication: any
/// client can send its own `X-Forwarded-For`, so keys are only trustworthy
/// when a trusted edge proxy terminates the connection and sets the header.
pub fn extract_client_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
