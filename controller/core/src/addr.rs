//! IPv4 addressing helpers.
//!
//! The Agent identifies endpoints by IPv4 address and port only. Addresses
//! cross the wire as the big-endian integer value of the four octets, so
//! `192.168.1.1` travels as `0xC0A8_0101`.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
    num::NonZeroU16,
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),

    #[error("too many colons in address {0:?}")]
    TooManyColons(String),

    #[error("missing host in address {0:?}")]
    MissingHost(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid IPv4 address {0:?}")]
    InvalidIpv4(String),
}

/// The resolved network location of a protected service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAddr {
    pub ip: Ipv4Addr,
    pub port: NonZeroU16,
}

/// Converts an address to its wire representation.
#[inline]
pub fn ipv4_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

/// Converts a wire representation back to an address.
#[inline]
pub fn u32_to_ipv4(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw)
}

/// Parses a dotted-quad string into its wire representation.
pub fn parse_ipv4(s: &str) -> Result<u32, AddrError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map(ipv4_to_u32)
        .map_err(|_| AddrError::InvalidIpv4(s.to_string()))
}

/// TCP service names accepted in place of a numeric port.
const SERVICE_PORTS: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
    ("submissions", 465),
    ("imaps", 993),
    ("pop3s", 995),
    ("mysql", 3306),
    ("postgresql", 5432),
    ("redis", 6379),
];

/// Splits a configured `host:port` (or `[v6]:port`) string.
///
/// The port is numeric or a well-known TCP service name such as
/// `postgresql`. Port zero is rejected.
pub fn split_host_port(s: &str) -> Result<(&str, NonZeroU16), AddrError> {
    let (host, port) = match s.strip_prefix('[') {
        Some(rest) => {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| AddrError::MissingPort(s.to_string()))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| AddrError::MissingPort(s.to_string()))?;
            (host, port)
        }
        None => {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| AddrError::MissingPort(s.to_string()))?;
            if host.contains(':') {
                return Err(AddrError::TooManyColons(s.to_string()));
            }
            (host, port)
        }
    };

    if host.is_empty() {
        return Err(AddrError::MissingHost(s.to_string()));
    }

    let port = parse_port(port).ok_or_else(|| AddrError::InvalidPort(port.to_string()))?;
    Ok((host, port))
}

fn parse_port(port: &str) -> Option<NonZeroU16> {
    port.parse::<u16>()
        .ok()
        .or_else(|| {
            SERVICE_PORTS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(port))
                .map(|&(_, number)| number)
        })
        .and_then(NonZeroU16::new)
}

// === impl ServiceAddr ===

impl ServiceAddr {
    pub fn new(ip: Ipv4Addr, port: NonZeroU16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port.get())
    }
}

impl fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<ServiceAddr> for SocketAddrV4 {
    fn from(addr: ServiceAddr) -> Self {
        addr.socket_addr()
    }
}
