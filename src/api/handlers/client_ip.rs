//! Client address resolution.

use super::state::ANY_PROXY;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const REAL_IP_HEADER: &str = "x-real-ip";

/// The peer address, or `X-Real-IP` when the peer is a trusted proxy.
#[must_use]
pub fn client_ip(peer: SocketAddr, headers: &HeaderMap, trusted_proxies: &[String]) -> String {
    let peer_ip = peer.ip().to_canonical().to_string();

    let forwarded = headers
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match forwarded {
        Some(real_ip)
            if trusted_proxies
                .iter()
                .any(|proxy| proxy == &peer_ip || proxy == ANY_PROXY) =>
        {
            real_ip.to_string()
        }
        _ => peer_ip,
    }
}

/// Loopback or private network.
#[must_use]
pub fn is_internal(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[must_use]
pub fn is_loopback(ip: IpAddr) -> bool {
    ip.to_canonical().is_loopback()
}
