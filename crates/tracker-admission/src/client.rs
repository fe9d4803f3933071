//! Client address resolution for anonymous rate-limit keys.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use http::HeaderMap;
use http::request::Parts;

/// Address used when neither the socket peer nor a trusted header is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the caller's network address.
///
/// With `trust_forwarded_headers`, the first hop of `X-Forwarded-For` and
/// then `X-Real-IP` are consulted before the socket peer. Only the IP is
/// used; the peer's port changes per connection.
pub fn client_address(parts: &Parts, trust_forwarded_headers: bool) -> String {
    if trust_forwarded_headers && let Some(addr) = forwarded_address(&parts.headers) {
        return addr.to_owned();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
}

fn forwarded_address(headers: &HeaderMap) -> Option<&str> {
    let non_empty = |s: &&str| !s.is_empty();

    // Take only the first IP in the chain (client IP)
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(non_empty)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(non_empty)
        })
}
