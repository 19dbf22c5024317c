#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod container;
mod dns;
mod metrics;
mod resolve;

pub use self::{
    container::{ContainerRuntime, ContainerStart, ContainerStarts, DockerRuntime},
    dns::{DnsLookup, HostLookup},
    metrics::ResolverMetrics,
    resolve::{ResolveError, Resolver},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
