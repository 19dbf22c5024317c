//! Container-runtime notifications, used to pick up a restarted container's
//! new address without waiting for the next DNS sweep.

use crate::BoxError;
use bollard::{container::InspectContainerOptions, system::EventsOptions, Docker};
use std::{collections::HashMap, net::Ipv4Addr, pin::Pin};
use tokio_stream::{Stream, StreamExt};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerStart {
    pub id: String,
    pub name: String,
}

pub type ContainerStarts = Pin<Box<dyn Stream<Item = Result<ContainerStart, BoxError>> + Send>>;

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), BoxError>;

    /// Subscribes to container start events.
    async fn starts(&self) -> Result<ContainerStarts, BoxError>;

    /// The container's IPv4 address on its first attached network, if any.
    async fn inspect_ipv4(&self, id: &str) -> Result<Option<Ipv4Addr>, BoxError>;
}

/// The local Docker daemon.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

// === impl DockerRuntime ===

impl DockerRuntime {
    pub fn connect_local() -> Result<Self, BoxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), BoxError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn starts(&self) -> Result<ContainerStarts, BoxError> {
        let filters = HashMap::from([
            ("type".to_string(), vec!["container".to_string()]),
            ("event".to_string(), vec!["start".to_string()]),
        ]);
        let events = self.docker.events(Some(EventsOptions::<String> {
            filters,
            ..Default::default()
        }));

        let starts = events.filter_map(|res| match res {
            Ok(msg) => {
                let actor = msg.actor?;
                let id = actor.id?;
                let name = actor.attributes?.remove("name")?;
                Some(Ok(ContainerStart { id, name }))
            }
            Err(error) => Some(Err(error.into())),
        });
        Ok(Box::pin(starts))
    }

    async fn inspect_ipv4(&self, id: &str) -> Result<Option<Ipv4Addr>, BoxError> {
        let container = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let networks = container
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();

        let mut names = networks.keys().collect::<Vec<_>>();
        names.sort();
        let ip = names.into_iter().find_map(|name| {
            networks[name]
                .ip_address
                .as_deref()
                .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
        });
        Ok(ip)
    }
}
