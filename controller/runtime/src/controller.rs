use crate::{
    core::{
        gateway::{Gateway, GatewayConfig, GatewayError},
        origin::RequestOrigin,
        ActiveSession, AgentApi, NewService, Service, ServiceId, SessionKey, SessionStore,
        StoreError, UserId,
    },
    resolver::{HostLookup, ResolveError, Resolver},
    store::SqliteStore,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CreateServiceError {
    #[error("cannot resolve service hostname: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The handle an embedding HTTP layer drives: user activation requests and
/// service creation.
#[derive(Debug)]
pub struct Controller<A, L> {
    store: SqliteStore,
    gateway: Gateway<SqliteStore, A>,
    resolver: Arc<Resolver<SqliteStore, A, L>>,
}

// === impl Controller ===

impl<A, L> Controller<A, L>
where
    A: AgentApi,
    L: HostLookup,
{
    pub fn new(
        store: SqliteStore,
        agent: A,
        config: GatewayConfig,
        resolver: Arc<Resolver<SqliteStore, A, L>>,
    ) -> Self {
        Self {
            gateway: Gateway::new(store.clone(), agent, config),
            store,
            resolver,
        }
    }

    pub async fn select(
        &self,
        username: &str,
        service: ServiceId,
        origin: &RequestOrigin,
    ) -> Result<SessionKey, GatewayError> {
        self.gateway.select(username, service, origin).await
    }

    pub async fn deselect(
        &self,
        username: &str,
        service: ServiceId,
        origin: &RequestOrigin,
    ) -> Result<SessionKey, GatewayError> {
        self.gateway.deselect(username, service, origin).await
    }

    /// Most recently refreshed first.
    pub async fn active_sessions(&self, user: UserId) -> Result<Vec<ActiveSession>, StoreError> {
        self.store.active_sessions_for_user(user).await
    }

    /// Creates a service only once its hostname resolves to an IPv4 address.
    pub async fn create_service(&self, new: NewService) -> Result<Service, CreateServiceError> {
        let addr = self.resolver.resolve_hostname(&new.hostname).await?;
        let service = self.store.create_service(new, addr).await?;
        Ok(service)
    }
}
