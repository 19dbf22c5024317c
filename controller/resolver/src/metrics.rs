use prometheus_client::{metrics::counter::Counter, registry::Registry};

#[derive(Clone, Debug, Default)]
pub struct ResolverMetrics {
    sweeps: Counter,
    failures: Counter,
    changes: Counter,
    container_events: Counter,
}

// === impl ResolverMetrics ===

impl ResolverMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "sweeps",
            "Total number of completed address sweeps",
            metrics.sweeps.clone(),
        );
        reg.register(
            "resolution_failures",
            "Total number of service hostnames that failed to resolve",
            metrics.failures.clone(),
        );
        reg.register(
            "address_changes",
            "Total number of service IP changes detected",
            metrics.changes.clone(),
        );
        reg.register(
            "container_events",
            "Total number of container start events handled",
            metrics.container_events.clone(),
        );
        metrics
    }

    pub(crate) fn sweep(&self) {
        self.sweeps.inc();
    }

    pub(crate) fn failure(&self) {
        self.failures.inc();
    }

    pub(crate) fn changes(&self, n: usize) {
        self.changes.inc_by(n as u64);
    }

    pub(crate) fn container_event(&self) {
        self.container_events.inc();
    }
}
