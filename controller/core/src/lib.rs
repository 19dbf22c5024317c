#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod agent;
#[cfg(test)]
mod fake;
pub mod gateway;
pub mod origin;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod store;

pub use self::{
    addr::{split_host_port, AddrError, ServiceAddr},
    agent::{AgentApi, AgentError, PathIntent},
    service::{
        AddressChange, AddressUpdate, NewService, RoleId, Service, ServiceId, ServiceTarget,
    },
    session::{
        ActiveSession, Flow, SessionKey, SessionTarget, SyncOutcome, TelemetryBatch, UserId,
    },
    store::{AccessStore, AddressStore, SessionStore, StoreError, StoreResult, UserRecord},
};
pub use ahash::AHashMap as HashMap;
