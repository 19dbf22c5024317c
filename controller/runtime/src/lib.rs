#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use aegis_controller_core as core;
pub use aegis_controller_grpc as grpc;
pub use aegis_controller_resolver as resolver;
pub use aegis_controller_store as store;

mod admin;
mod args;
mod controller;
mod log;
mod reconcile;

pub use self::{
    admin::{Admin, Readiness},
    args::Args,
    controller::{Controller, CreateServiceError},
    log::LogFormat,
    reconcile::{ReconcilerMetrics, ReconcilerTask},
};
