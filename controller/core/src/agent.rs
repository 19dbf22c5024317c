use crate::{addr::ServiceAddr, service::AddressChange};
use std::{net::Ipv4Addr, sync::Arc, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent rejected the request")]
    Rejected,

    #[error("agent transport failure: {0}")]
    Transport(String),
}

/// A request to open or close the path from `source` to `destination`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PathIntent {
    pub source: Ipv4Addr,
    pub destination: ServiceAddr,
    pub activate: bool,
}

/// The unary half of the Agent link.
#[async_trait::async_trait]
pub trait AgentApi: Send + Sync {
    /// Must resolve within `timeout`.
    async fn submit(&self, intent: PathIntent, timeout: Duration) -> Result<(), AgentError>;

    /// Best-effort notification of resolved-address changes.
    async fn push_address_changes(&self, changes: &[AddressChange]) -> Result<(), AgentError>;
}

#[async_trait::async_trait]
impl<T: AgentApi + ?Sized> AgentApi for Arc<T> {
    async fn submit(&self, intent: PathIntent, timeout: Duration) -> Result<(), AgentError> {
        (**self).submit(intent, timeout).await
    }

    async fn push_address_changes(&self, changes: &[AddressChange]) -> Result<(), AgentError> {
        (**self).push_address_changes(changes).await
    }
}
