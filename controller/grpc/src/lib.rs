#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
pub mod link;
pub mod metrics;
pub mod monitor;
pub mod proto;
mod tls;

pub use self::{
    backoff::{Backoff, BackoffConfig},
    link::AgentLink,
    metrics::{GrpcClientMetricsFamily, MonitorMetrics},
    monitor::{BatchStream, Monitor, MonitorSource},
    tls::{ClientMtlsConfig, TlsError},
};
