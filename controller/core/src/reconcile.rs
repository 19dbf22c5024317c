//! Session reconciliation: turns an Agent telemetry batch into the
//! authoritative ActiveSession set.

use crate::{
    service::ServiceId,
    session::{Flow, SessionKey, SessionTarget, SyncOutcome, TelemetryBatch, UserId},
    store::{SessionStore, StoreResult},
    HashMap,
};
use chrono::Utc;
use std::net::SocketAddrV4;
use tracing::{debug, info};

/// The result of matching one batch's flows against the current tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub target: SessionTarget,
    pub matched: usize,
    pub unmatched: Vec<SocketAddrV4>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub flows: usize,
    pub unmatched: usize,
    pub outcome: SyncOutcome,
}

#[derive(Clone, Debug)]
pub struct Reconciler<S> {
    store: S,
}

/// Matches flows to services by destination and proposes a TTL for every
/// user currently active on a matched service.
///
/// When a pair is seen in several flows the largest TTL wins.
pub fn plan(
    flows: &[Flow],
    services: &HashMap<SocketAddrV4, ServiceId>,
    active: &HashMap<ServiceId, Vec<UserId>>,
) -> Plan {
    let mut plan = Plan::default();
    for flow in flows {
        let Some(&service) = services.get(&flow.dst) else {
            plan.unmatched.push(flow.dst);
            continue;
        };
        plan.matched += 1;

        let Some(users) = active.get(&service) else {
            continue;
        };
        for &user in users {
            plan.target
                .entry(SessionKey::new(user, service))
                .and_modify(|ttl| *ttl = (*ttl).max(flow.time_left))
                .or_insert(flow.time_left);
        }
    }
    plan
}

// === impl Reconciler ===

impl<S: SessionStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Applies one batch. A lookup failure aborts before anything is written;
    /// the next batch retries from scratch.
    pub async fn reconcile(&self, batch: &TelemetryBatch) -> StoreResult<Reconciled> {
        let snapshot_at = Utc::now();
        let services = self.store.service_index().await?;
        let active = self.store.active_users().await?;

        let Plan {
            target,
            matched,
            unmatched,
        } = plan(&batch.flows, &services, &active);
        for dst in &unmatched {
            debug!(%dst, "Traffic to unknown service");
        }

        let outcome = self.store.sync_sessions(&target, snapshot_at).await?;
        if outcome.is_noop() {
            debug!(flows = batch.flows.len(), matched, "Sessions unchanged");
        } else {
            info!(
                flows = batch.flows.len(),
                unmatched = unmatched.len(),
                inserted = outcome.inserted,
                updated = outcome.updated,
                evicted = outcome.evicted,
                "Synced active sessions"
            );
        }

        Ok(Reconciled {
            flows: batch.flows.len(),
            unmatched: unmatched.len(),
            outcome,
        })
    }
}
