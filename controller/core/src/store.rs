//! Storage interfaces consumed by the gateway, the reconciler and the
//! address resolver.
//!
//! All three traits are normally implemented by the same single-writer store,
//! which serializes write transactions.

use crate::{
    addr::ServiceAddr,
    service::{AddressUpdate, RoleId, ServiceId, ServiceTarget},
    session::{ActiveSession, SessionKey, SessionTarget, SyncOutcome, UserId},
    HashMap,
};
use chrono::{DateTime, Utc};
use std::{net::SocketAddrV4, sync::Arc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The attributes of a user this core consumes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub role: RoleId,
    pub active: bool,
}

/// Read-only entitlement and addressing lookups.
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    async fn lookup_user(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    /// True when the role grants the service or the user holds an extra grant
    /// for it.
    async fn is_entitled(
        &self,
        user: UserId,
        role: RoleId,
        service: ServiceId,
    ) -> StoreResult<bool>;

    async fn service_addr(&self, service: ServiceId) -> StoreResult<Option<ServiceAddr>>;
}

/// The active-session table.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Maps each service's resolved `ip:port` to its id.
    async fn service_index(&self) -> StoreResult<HashMap<SocketAddrV4, ServiceId>>;

    /// Maps each service to the users currently recorded as active for it.
    async fn active_users(&self) -> StoreResult<HashMap<ServiceId, Vec<UserId>>>;

    /// Inserts or replaces the session row with a fresh timestamp.
    async fn upsert_session(&self, key: SessionKey, time_left: i32) -> StoreResult<()>;

    /// Returns whether a row was removed.
    async fn remove_session(&self, key: SessionKey) -> StoreResult<bool>;

    /// Atomically makes the table match `target`.
    ///
    /// Rows absent from `target` are deleted unless they were written after
    /// `snapshot_at`; rows present in both take the target TTL when it
    /// differs; rows only in `target` are inserted. An empty target clears
    /// every row not written after `snapshot_at`.
    async fn sync_sessions(
        &self,
        target: &SessionTarget,
        snapshot_at: DateTime<Utc>,
    ) -> StoreResult<SyncOutcome>;

    /// Most recently updated first.
    async fn active_sessions_for_user(&self, user: UserId) -> StoreResult<Vec<ActiveSession>>;
}

#[async_trait::async_trait]
pub trait AddressStore: Send + Sync {
    async fn service_targets(&self) -> StoreResult<Vec<ServiceTarget>>;

    /// Applies all updates in one transaction.
    async fn update_addresses(&self, updates: &[AddressUpdate]) -> StoreResult<()>;
}

// === impl StoreError ===

impl StoreError {
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Backend(error.into())
    }
}

// === impl Arc<T> ===

#[async_trait::async_trait]
impl<T: AccessStore + ?Sized> AccessStore for Arc<T> {
    async fn lookup_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        (**self).lookup_user(username).await
    }

    async fn is_entitled(
        &self,
        user: UserId,
        role: RoleId,
        service: ServiceId,
    ) -> StoreResult<bool> {
        (**self).is_entitled(user, role, service).await
    }

    async fn service_addr(&self, service: ServiceId) -> StoreResult<Option<ServiceAddr>> {
        (**self).service_addr(service).await
    }
}

#[async_trait::async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn service_index(&self) -> StoreResult<HashMap<SocketAddrV4, ServiceId>> {
        (**self).service_index().await
    }

    async fn active_users(&self) -> StoreResult<HashMap<ServiceId, Vec<UserId>>> {
        (**self).active_users().await
    }

    async fn upsert_session(&self, key: SessionKey, time_left: i32) -> StoreResult<()> {
        (**self).upsert_session(key, time_left).await
    }

    async fn remove_session(&self, key: SessionKey) -> StoreResult<bool> {
        (**self).remove_session(key).await
    }

    async fn sync_sessions(
        &self,
        target: &SessionTarget,
        snapshot_at: DateTime<Utc>,
    ) -> StoreResult<SyncOutcome> {
        (**self).sync_sessions(target, snapshot_at).await
    }

    async fn active_sessions_for_user(&self, user: UserId) -> StoreResult<Vec<ActiveSession>> {
        (**self).active_sessions_for_user(user).await
    }
}

#[async_trait::async_trait]
impl<T: AddressStore + ?Sized> AddressStore for Arc<T> {
    async fn service_targets(&self) -> StoreResult<Vec<ServiceTarget>> {
        (**self).service_targets().await
    }

    async fn update_addresses(&self, updates: &[AddressUpdate]) -> StoreResult<()> {
        (**self).update_addresses(updates).await
    }
}
