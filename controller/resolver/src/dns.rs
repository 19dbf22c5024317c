use crate::BoxError;
use hickory_resolver::TokioAsyncResolver;
use std::{fmt, net::IpAddr};

/// Name resolution for configured service hosts.
#[async_trait::async_trait]
pub trait HostLookup: Send + Sync {
    /// Returns every address the name resolves to, in answer order.
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, BoxError>;
}

/// Resolves through the system's configured nameservers.
#[derive(Clone)]
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
}

// === impl DnsLookup ===

impl DnsLookup {
    pub fn from_system_conf() -> Result<Self, BoxError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }
}

#[async_trait::async_trait]
impl HostLookup for DnsLookup {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, BoxError> {
        let ips = self.resolver.lookup_ip(host).await?;
        tracing::trace!(%host, ips = ips.iter().count(), "Resolved");
        Ok(ips.iter().collect())
    }
}

/// `TokioAsyncResolver` does not implement `Debug`.
impl fmt::Debug for DnsLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsLookup")
            .field("resolver", &"...")
            .finish()
    }
}
