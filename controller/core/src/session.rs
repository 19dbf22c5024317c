use crate::service::ServiceId;
use chrono::{DateTime, Utc};
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Identifies an ActiveSession: one user's open path to one service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user: UserId,
    pub service: ServiceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSession {
    pub key: SessionKey,

    /// Remaining lifetime in seconds, as last reported by the Agent.
    pub time_left: i32,

    pub updated_at: DateTime<Utc>,
}

/// The authoritative set of sessions computed from one telemetry batch.
pub type SessionTarget = crate::HashMap<SessionKey, i32>;

/// One connection observed by the Agent.
///
/// The Agent knows nothing about users; only the destination identifies which
/// service the traffic belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Flow {
    pub src: Ipv4Addr,
    pub dst: SocketAddrV4,
    pub time_left: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryBatch {
    pub flows: Vec<Flow>,
}

/// Row counts written by a single session sync.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub evicted: u64,
}

// === impl UserId ===

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl SessionKey ===

impl SessionKey {
    pub fn new(user: UserId, service: ServiceId) -> Self {
        Self { user, service }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={} service={}", self.user, self.service)
    }
}

// === impl SyncOutcome ===

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.evicted == 0
    }
}
