use crate::addr::ServiceAddr;
use chrono::{DateTime, Utc};
use std::{fmt, net::Ipv4Addr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub i64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(pub i64);

/// A protected backend service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,

    /// The `host:port` string as configured by an administrator.
    pub hostname: String,

    /// The most recent successful resolution of `hostname`.
    pub addr: ServiceAddr,

    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewService {
    pub name: String,
    pub hostname: String,
    pub description: Option<String>,
}

/// The subset of a service the address resolver works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTarget {
    pub id: ServiceId,
    pub hostname: String,
    pub addr: ServiceAddr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressUpdate {
    pub service: ServiceId,
    pub addr: ServiceAddr,
}

/// A detected IP transition for a service, pending propagation to the Agent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressChange {
    pub service: ServiceId,
    pub old_ip: Ipv4Addr,
    pub new_ip: Ipv4Addr,
}

// === impl ServiceId ===

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl RoleId ===

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl ServiceTarget ===

impl ServiceTarget {
    /// Computes the storage update and, when the IP itself moved, the change
    /// record to propagate. Returns `None` when nothing changed.
    pub fn transition_to(
        &self,
        addr: ServiceAddr,
    ) -> Option<(AddressUpdate, Option<AddressChange>)> {
        if self.addr == addr {
            return None;
        }

        let update = AddressUpdate {
            service: self.id,
            addr,
        };
        let change = (self.addr.ip != addr.ip).then_some(AddressChange {
            service: self.id,
            old_ip: self.addr.ip,
            new_ip: addr.ip,
        });
        Some((update, change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU16;

    fn addr(ip: [u8; 4], port: u16) -> ServiceAddr {
        ServiceAddr::new(Ipv4Addr::from(ip), NonZeroU16::new(port).unwrap())
    }

    fn target(ip: [u8; 4], port: u16) -> ServiceTarget {
        ServiceTarget {
            id: ServiceId(7),
            hostname: "postgres:5432".to_string(),
            addr: addr(ip, port),
        }
    }

    #[test]
    fn unchanged_address_is_a_noop() {
        assert_eq!(target([10, 0, 0, 5], 5432).transition_to(addr([10, 0, 0, 5], 5432)), None);
    }

    #[test]
    fn ip_change_produces_change_record() {
        let (update, change) = target([10, 0, 0, 5], 5432)
            .transition_to(addr([10, 0, 0, 9], 5432))
            .expect("address moved");
        assert_eq!(update.addr, addr([10, 0, 0, 9], 5432));
        assert_eq!(
            change,
            Some(AddressChange {
                service: ServiceId(7),
                old_ip: Ipv4Addr::new(10, 0, 0, 5),
                new_ip: Ipv4Addr::new(10, 0, 0, 9),
            })
        );
    }

    #[test]
    fn port_only_change_is_stored_but_not_propagated() {
        let (update, change) = target([10, 0, 0, 5], 5432)
            .transition_to(addr([10, 0, 0, 5], 5433))
            .expect("port moved");
        assert_eq!(update.addr.port.get(), 5433);
        assert_eq!(change, None);
    }
}
