//! The Address Resolver: keeps each service's resolved address current and
//! tells the agent when a service's IP moves.

use crate::{
    container::{ContainerRuntime, ContainerStart},
    dns::HostLookup,
    metrics::ResolverMetrics,
    BoxError,
};
use aegis_controller_core::{
    split_host_port, AddrError, AddressChange, AddressStore, AgentApi, ServiceAddr, StoreResult,
};
use std::{net::IpAddr, time::Duration};
use tokio::time;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Address(#[from] AddrError),

    #[error("{0} is not an IPv4 address")]
    NotIpv4(IpAddr),

    #[error("no IPv4 address found for {0}")]
    NoIpv4(String),

    #[error("failed to resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: BoxError,
    },
}

#[derive(Clone, Debug)]
pub struct Resolver<S, A, L> {
    store: S,
    agent: A,
    lookup: L,
    metrics: ResolverMetrics,
}

// === impl Resolver ===

impl<S, A, L> Resolver<S, A, L>
where
    S: AddressStore,
    A: AgentApi,
    L: HostLookup,
{
    pub fn new(store: S, agent: A, lookup: L, metrics: ResolverMetrics) -> Self {
        Self {
            store,
            agent,
            lookup,
            metrics,
        }
    }

    /// Resolves a configured `host:port`. A literal IPv4 host is used as-is;
    /// otherwise the first IPv4 answer wins.
    pub async fn resolve_hostname(&self, hostname: &str) -> Result<ServiceAddr, ResolveError> {
        let (host, port) = split_host_port(hostname)?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return match ip {
                IpAddr::V4(ip) => Ok(ServiceAddr::new(ip, port)),
                IpAddr::V6(_) => Err(ResolveError::NotIpv4(ip)),
            };
        }

        let ips = self
            .lookup
            .lookup_ip(host)
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?;
        let ip = ips
            .into_iter()
            .find_map(|ip| match ip {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| ResolveError::NoIpv4(host.to_string()))?;
        Ok(ServiceAddr::new(ip, port))
    }

    /// Re-resolves every service, stores all changed addresses in one
    /// transaction and pushes the IP changes to the agent.
    ///
    /// A service that fails to resolve keeps its stored address.
    pub async fn sweep(&self) -> StoreResult<Vec<AddressChange>> {
        let targets = self.store.service_targets().await?;

        let mut updates = Vec::new();
        let mut changes = Vec::new();
        for target in &targets {
            let addr = match self.resolve_hostname(&target.hostname).await {
                Ok(addr) => addr,
                Err(error) => {
                    self.metrics.failure();
                    warn!(
                        service = %target.id,
                        hostname = %target.hostname,
                        %error,
                        "Failed to resolve service; keeping last known address"
                    );
                    continue;
                }
            };

            if let Some((update, change)) = target.transition_to(addr) {
                info!(
                    service = %target.id,
                    hostname = %target.hostname,
                    from = %target.addr,
                    to = %addr,
                    "Service address changed"
                );
                updates.push(update);
                changes.extend(change);
            }
        }

        self.store.update_addresses(&updates).await?;
        self.metrics.sweep();
        self.propagate(&changes).await;
        Ok(changes)
    }

    /// Sweeps immediately and then on every `interval`. Runs forever.
    pub async fn run_sweep(&self, interval: Duration) {
        let mut ticks = time::interval(interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            match self.sweep().await {
                Ok(changes) => debug!(changes = changes.len(), "Address sweep complete"),
                Err(error) => warn!(%error, "Address sweep failed"),
            }
        }
    }

    /// Applies container start events until the event stream ends.
    ///
    /// Returns immediately when the runtime is unreachable, leaving the
    /// periodic sweep as the only source of updates.
    pub async fn watch_containers<R: ContainerRuntime>(&self, runtime: R) {
        if let Err(error) = runtime.ping().await {
            info!(%error, "Container runtime unavailable; relying on DNS sweeps");
            return;
        }
        let mut starts = match runtime.starts().await {
            Ok(starts) => starts,
            Err(error) => {
                warn!(%error, "Failed to subscribe to container events");
                return;
            }
        };

        info!("Watching container starts");
        while let Some(next) = starts.next().await {
            match next {
                Ok(start) => {
                    if let Err(error) = self.container_started(&runtime, start).await {
                        warn!(%error, "Failed to apply container address");
                    }
                }
                Err(error) => {
                    warn!(%error, "Container event stream failed");
                    return;
                }
            }
        }
        info!("Container event stream ended");
    }

    /// Updates the service whose configured host is the container's name and
    /// pushes an IP change immediately.
    pub async fn container_started<R: ContainerRuntime>(
        &self,
        runtime: &R,
        start: ContainerStart,
    ) -> StoreResult<Option<AddressChange>> {
        self.metrics.container_event();
        let targets = self.store.service_targets().await?;
        let Some((target, port)) = targets.iter().find_map(|t| match split_host_port(&t.hostname) {
            Ok((host, port)) if host == start.name => Some((t, port)),
            _ => None,
        }) else {
            debug!(container = %start.name, "Container matches no service");
            return Ok(None);
        };

        let ip = match runtime.inspect_ipv4(&start.id).await {
            Ok(Some(ip)) => ip,
            Ok(None) => {
                warn!(container = %start.name, "Container started without an IPv4 address");
                return Ok(None);
            }
            Err(error) => {
                warn!(container = %start.name, %error, "Failed to inspect container");
                return Ok(None);
            }
        };

        let addr = ServiceAddr::new(ip, port);
        let Some((update, change)) = target.transition_to(addr) else {
            return Ok(None);
        };
        info!(
            service = %target.id,
            container = %start.name,
            from = %target.addr,
            to = %addr,
            "Container address changed"
        );
        self.store.update_addresses(&[update]).await?;
        if let Some(change) = change {
            self.propagate(&[change]).await;
        }
        Ok(change)
    }

    async fn propagate(&self, changes: &[AddressChange]) {
        if changes.is_empty() {
            return;
        }
        self.metrics.changes(changes.len());
        match self.agent.push_address_changes(changes).await {
            Ok(()) => info!(changes = changes.len(), "Pushed address changes to agent"),
            Err(error) => {
                warn!(%error, changes = changes.len(), "Failed to push address changes to agent")
            }
        }
    }
}

#[cfg(test)]
mod tests;
