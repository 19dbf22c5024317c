//! The Agent Link: unary calls and the telemetry stream over one lazily
//! connected, mutually authenticated channel.

use crate::{
    metrics::GrpcClientMetricsFamily,
    monitor::{BatchStream, MonitorSource},
    proto::{self, session_manager_client::SessionManagerClient},
    tls::TlsError,
};
use aegis_controller_core::{AddressChange, AgentApi, AgentError, PathIntent};
use std::{future::Future, time::Duration};
use tokio::time;
use tokio_stream::StreamExt;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct AgentLink {
    client: SessionManagerClient<Channel>,

    /// Bounds the best-effort calls that carry no caller-supplied timeout.
    call_timeout: Duration,

    metrics: GrpcClientMetricsFamily,
}

// === impl AgentLink ===

impl AgentLink {
    /// Builds a channel to `addr` (`host:port`) that connects on first use.
    ///
    /// Every reconnect performs a fresh TLS handshake with the configured
    /// identity.
    pub fn connect_lazy(
        addr: &str,
        tls: ClientTlsConfig,
        call_timeout: Duration,
        metrics: GrpcClientMetricsFamily,
    ) -> Result<Self, TlsError> {
        let channel = Endpoint::from_shared(format!("https://{addr}"))?
            .connect_timeout(call_timeout)
            .tls_config(tls)?
            .connect_lazy();
        Ok(Self::from_channel(channel, call_timeout, metrics))
    }

    pub fn from_channel(
        channel: Channel,
        call_timeout: Duration,
        metrics: GrpcClientMetricsFamily,
    ) -> Self {
        Self {
            client: SessionManagerClient::new(channel),
            call_timeout,
            metrics,
        }
    }

    async fn unary<F>(
        &self,
        method: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<proto::Ack, AgentError>
    where
        F: Future<Output = Result<tonic::Response<proto::Ack>, tonic::Status>>,
    {
        let observer = self.metrics.unary_rpc(proto::SERVICE, method).start();
        match time::timeout(timeout, call).await {
            Ok(Ok(rsp)) => {
                observer.end(tonic::Code::Ok);
                Ok(rsp.into_inner())
            }
            Ok(Err(status)) => {
                observer.end(status.code());
                Err(transport(status))
            }
            Err(_) => {
                observer.end(tonic::Code::DeadlineExceeded);
                Err(AgentError::Timeout(timeout))
            }
        }
    }
}

#[async_trait::async_trait]
impl AgentApi for AgentLink {
    async fn submit(&self, intent: PathIntent, timeout: Duration) -> Result<(), AgentError> {
        let mut client = self.client.clone();
        let ack = self
            .unary(
                "SubmitSession",
                timeout,
                client.submit_session(proto::LoginEvent::from(intent)),
            )
            .await?;
        if !ack.success {
            return Err(AgentError::Rejected);
        }
        Ok(())
    }

    async fn push_address_changes(&self, changes: &[AddressChange]) -> Result<(), AgentError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut client = self.client.clone();
        let list = changes.iter().collect::<proto::IpChangeList>();
        debug!(changes = list.ip_changes.len(), "Pushing address changes");
        let ack = self
            .unary("IpChange", self.call_timeout, client.ip_change(list))
            .await?;
        if !ack.success {
            return Err(AgentError::Rejected);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MonitorSource for AgentLink {
    async fn open(&self) -> Result<BatchStream, AgentError> {
        let mut client = self.client.clone();
        let observer = self
            .metrics
            .server_stream_rpc(proto::SERVICE, "MonitorSessions")
            .start();
        let rsp = match client.monitor_sessions(proto::Empty {}).await {
            Ok(rsp) => {
                observer.end(tonic::Code::Ok);
                rsp
            }
            Err(status) => {
                observer.end(status.code());
                return Err(transport(status));
            }
        };

        let batches = rsp.into_inner().map(|res| match res {
            Ok(list) => Ok(list.into_batch()),
            Err(status) => Err(transport(status)),
        });
        Ok(Box::pin(batches))
    }
}

fn transport(status: tonic::Status) -> AgentError {
    AgentError::Transport(format!("{}: {}", status.code(), status.message()))
}
