//! Messages and client for the agent's `session.SessionManager` service,
//! generated from `proto/session.proto`, plus conversions to domain types.

use aegis_controller_core::{
    addr::{ipv4_to_u32, u32_to_ipv4},
    AddressChange, Flow, PathIntent, TelemetryBatch,
};
use std::net::SocketAddrV4;

tonic::include_proto!("session");

pub const SERVICE: &str = "session.SessionManager";

// === impl LoginEvent ===

impl From<PathIntent> for LoginEvent {
    fn from(intent: PathIntent) -> Self {
        Self {
            src_ip: ipv4_to_u32(intent.source),
            dst_ip: ipv4_to_u32(intent.destination.ip),
            dst_port: intent.destination.port.get().into(),
            activate: intent.activate,
        }
    }
}

// === impl Session ===

impl Session {
    /// Returns `None` when the reported port is not a valid TCP/UDP port.
    pub fn to_flow(&self) -> Option<Flow> {
        let port = u16::try_from(self.dst_port).ok().filter(|p| *p != 0)?;
        Some(Flow {
            src: u32_to_ipv4(self.src_ip),
            dst: SocketAddrV4::new(u32_to_ipv4(self.dst_ip), port),
            time_left: self.time_left,
        })
    }
}

// === impl SessionList ===

impl SessionList {
    pub fn into_batch(self) -> TelemetryBatch {
        let flows = self
            .sessions
            .iter()
            .filter_map(|s| {
                let flow = s.to_flow();
                if flow.is_none() {
                    tracing::debug!(port = s.dst_port, "Ignoring flow with invalid port");
                }
                flow
            })
            .collect();
        TelemetryBatch { flows }
    }
}

// === impl IpChangeList ===

impl<'a> FromIterator<&'a AddressChange> for IpChangeList {
    fn from_iter<I: IntoIterator<Item = &'a AddressChange>>(iter: I) -> Self {
        let ip_changes = iter
            .into_iter()
            .map(|c| IpChangeEvent {
                old_ip: ipv4_to_u32(c.old_ip),
                new_ip: ipv4_to_u32(c.new_ip),
            })
            .collect();
        Self { ip_changes }
    }
}
