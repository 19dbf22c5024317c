//! The Activation Gateway: the synchronous path for a user's explicit
//! select/deselect of a service.

use crate::{
    agent::{AgentApi, AgentError, PathIntent},
    origin::{OriginError, RequestOrigin},
    service::ServiceId,
    session::SessionKey,
    store::{AccessStore, SessionStore, StoreError},
};
use http::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SESSION_TTL: i32 = 60;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bounds every Agent call made on behalf of a request.
    pub agent_timeout: Duration,

    /// TTL written for a freshly selected session, until telemetry replaces it.
    pub initial_ttl: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown user {0:?}")]
    Unauthorized(String),

    #[error("user {user:?} may not access service {service}")]
    Forbidden { user: String, service: ServiceId },

    #[error("service {0} has no resolved address")]
    ServiceUnavailable(ServiceId),

    #[error(transparent)]
    InvalidOrigin(#[from] OriginError),

    #[error("agent failed to open the path: {0}")]
    Agent(#[source] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct Gateway<S, A> {
    store: S,
    agent: A,
    config: GatewayConfig,
}

// === impl GatewayConfig ===

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(1),
            initial_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

// === impl GatewayError ===

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::InvalidOrigin(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) | Self::Agent(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// === impl Gateway ===

impl<S, A> Gateway<S, A>
where
    S: AccessStore + SessionStore,
    A: AgentApi,
{
    pub fn new(store: S, agent: A, config: GatewayConfig) -> Self {
        Self {
            store,
            agent,
            config,
        }
    }

    /// Opens a path for `username` to `service` and records the session.
    ///
    /// Nothing is written unless the Agent confirms the path. If the session
    /// cannot be recorded afterwards, the path is closed again on a best-effort
    /// basis.
    pub async fn select(
        &self,
        username: &str,
        service: ServiceId,
        origin: &RequestOrigin,
    ) -> Result<SessionKey, GatewayError> {
        let user = self
            .store
            .lookup_user(username)
            .await?
            .ok_or_else(|| GatewayError::Unauthorized(username.to_string()))?;

        let forbidden = || GatewayError::Forbidden {
            user: username.to_string(),
            service,
        };
        if !user.active {
            debug!(%username, "Inactive user");
            return Err(forbidden());
        }
        if !self.store.is_entitled(user.id, user.role, service).await? {
            debug!(%username, %service, role = %user.role, "No grant");
            return Err(forbidden());
        }

        let destination = self
            .store
            .service_addr(service)
            .await?
            .ok_or(GatewayError::ServiceUnavailable(service))?;
        let source = origin.source_ipv4()?;

        info!(%username, %service, %source, %destination, "Activating service");
        let intent = PathIntent {
            source,
            destination,
            activate: true,
        };
        self.agent
            .submit(intent, self.config.agent_timeout)
            .await
            .map_err(GatewayError::Agent)?;

        let key = SessionKey::new(user.id, service);
        if let Err(error) = self.store.upsert_session(key, self.config.initial_ttl).await {
            // The path is open but unrecorded; close it before failing.
            warn!(%error, %username, %service, "Failed to record session; closing path");
            let intent = PathIntent {
                activate: false,
                ..intent
            };
            if let Err(error) = self.agent.submit(intent, self.config.agent_timeout).await {
                warn!(%error, %username, %service, "Failed to close path at agent");
            }
            return Err(error.into());
        }
        Ok(key)
    }

    /// Closes the path and always removes the local session row, even when the
    /// Agent cannot be told.
    pub async fn deselect(
        &self,
        username: &str,
        service: ServiceId,
        origin: &RequestOrigin,
    ) -> Result<SessionKey, GatewayError> {
        let user = self
            .store
            .lookup_user(username)
            .await?
            .ok_or_else(|| GatewayError::Unauthorized(username.to_string()))?;
        let key = SessionKey::new(user.id, service);

        match (self.store.service_addr(service).await?, origin.source_ipv4()) {
            (Some(destination), Ok(source)) => {
                info!(%username, %service, %source, %destination, "Deactivating service");
                let intent = PathIntent {
                    source,
                    destination,
                    activate: false,
                };
                if let Err(error) = self.agent.submit(intent, self.config.agent_timeout).await {
                    warn!(%error, %username, %service, "Failed to close path at agent");
                }
            }
            (None, _) => {
                warn!(%username, %service, "Service has no resolved address; skipping agent");
            }
            (_, Err(error)) => {
                warn!(%error, %username, %service, "Cannot locate caller; skipping agent");
            }
        }

        if !self.store.remove_session(key).await? {
            debug!(%key, "No active session to remove");
        }
        Ok(key)
    }
}
