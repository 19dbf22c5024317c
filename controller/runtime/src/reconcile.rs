use crate::{
    core::{reconcile::Reconciler, SessionStore, TelemetryBatch},
    grpc::MonitorMetrics,
};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Clone, Debug, Default)]
pub struct ReconcilerMetrics {
    applied: Counter,
    skipped: Counter,
    inserted: Counter,
    updated: Counter,
    evicted: Counter,
    unmatched: Counter,
}

/// Drains the telemetry queue into the session table, one batch at a time.
pub struct ReconcilerTask<S> {
    reconciler: Reconciler<S>,
    batches: broadcast::Receiver<TelemetryBatch>,
    metrics: ReconcilerMetrics,
    monitor: MonitorMetrics,
}

// === impl ReconcilerMetrics ===

impl ReconcilerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "batches_applied",
            "Total number of telemetry batches reconciled into the session table",
            metrics.applied.clone(),
        );
        reg.register(
            "batches_skipped",
            "Total number of telemetry batches abandoned on a storage failure",
            metrics.skipped.clone(),
        );
        reg.register(
            "sessions_inserted",
            "Total number of sessions created from telemetry",
            metrics.inserted.clone(),
        );
        reg.register(
            "sessions_updated",
            "Total number of session TTLs refreshed from telemetry",
            metrics.updated.clone(),
        );
        reg.register(
            "sessions_evicted",
            "Total number of sessions removed because the agent stopped reporting them",
            metrics.evicted.clone(),
        );
        reg.register(
            "unmatched_flows",
            "Total number of reported flows to no known service",
            metrics.unmatched.clone(),
        );
        metrics
    }
}

// === impl ReconcilerTask ===

impl<S: SessionStore> ReconcilerTask<S> {
    pub fn new(
        store: S,
        batches: broadcast::Receiver<TelemetryBatch>,
        metrics: ReconcilerMetrics,
        monitor: MonitorMetrics,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            batches,
            metrics,
            monitor,
        }
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) {
        loop {
            let batch = match self.batches.recv().await {
                Ok(batch) => batch,
                Err(RecvError::Lagged(dropped)) => {
                    self.monitor.batches_dropped(dropped);
                    warn!(dropped, "Reconciler fell behind; oldest telemetry batches discarded");
                    continue;
                }
                Err(RecvError::Closed) => {
                    info!("Telemetry queue closed");
                    return;
                }
            };

            match self.reconciler.reconcile(&batch).await {
                Ok(done) => {
                    self.metrics.applied.inc();
                    self.metrics.inserted.inc_by(done.outcome.inserted);
                    self.metrics.updated.inc_by(done.outcome.updated);
                    self.metrics.evicted.inc_by(done.outcome.evicted);
                    self.metrics.unmatched.inc_by(done.unmatched as u64);
                }
                Err(error) => {
                    self.metrics.skipped.inc();
                    warn!(%error, flows = batch.flows.len(), "Failed to reconcile telemetry batch");
                }
            }
        }
    }
}
