//! Determines the network address a user's request originated from.

use http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    #[error("request carries no usable source address")]
    Missing,

    #[error("source address {0} is not IPv4")]
    NotIpv4(IpAddr),
}

/// Request metadata the gateway needs to locate the caller.
#[derive(Clone, Debug, Default)]
pub struct RequestOrigin {
    pub headers: HeaderMap,
    pub peer: Option<SocketAddr>,
}

// === impl RequestOrigin ===

impl RequestOrigin {
    pub fn new(headers: HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self { headers, peer }
    }

    pub fn from_peer(peer: SocketAddr) -> Self {
        Self {
            headers: HeaderMap::new(),
            peer: Some(peer),
        }
    }

    /// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
    /// transport peer. Header values that do not parse as an IP are skipped.
    pub fn source_ip(&self) -> Option<IpAddr> {
        let forwarded = header_str(&self.headers, X_FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real = header_str(&self.headers, X_REAL_IP).and_then(|v| v.trim().parse().ok());
        if real.is_some() {
            return real;
        }

        self.peer.map(|p| p.ip())
    }

    /// The Agent only tracks IPv4 sources. IPv4-mapped IPv6 addresses are
    /// unwrapped.
    pub fn source_ipv4(&self) -> Result<Ipv4Addr, OriginError> {
        match self.source_ip().ok_or(OriginError::Missing)? {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => ip
                .to_ipv4_mapped()
                .ok_or(OriginError::NotIpv4(IpAddr::V6(ip))),
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
