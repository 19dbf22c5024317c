use crate::{
    admin::Admin,
    core::gateway::{GatewayConfig, DEFAULT_SESSION_TTL},
    grpc::{
        AgentLink, BackoffConfig, ClientMtlsConfig, GrpcClientMetricsFamily, Monitor,
        MonitorMetrics,
    },
    log::{self, LogFormat},
    reconcile::{ReconcilerMetrics, ReconcilerTask},
    resolver::{DnsLookup, DockerRuntime, Resolver, ResolverMetrics},
    store::SqliteStore,
    Controller,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{sync::broadcast, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "aegis", about = "Live-access control plane for the aegis agent")]
pub struct Args {
    #[clap(long, default_value = "aegis=info,warn", env = "AEGIS_CONTROLLER_LOG")]
    log_level: String,

    #[clap(long, value_enum, default_value = "plain", env = "AEGIS_LOG_FORMAT")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:9990", env = "AEGIS_ADMIN_ADDR")]
    admin_addr: SocketAddr,

    #[clap(long, default_value = "./data/aegis.db", env = "AEGIS_DB_PATH")]
    db_path: PathBuf,

    /// The agent's `host:port`.
    #[clap(long, default_value = "172.21.0.10:50001", env = "AGENT_ADDRESS")]
    agent_addr: String,

    /// The name the agent's certificate must be valid for.
    #[clap(long, default_value = "aegis-agent", env = "AGENT_SERVER_NAME")]
    agent_server_name: String,

    #[clap(long, default_value = "certs/controller.pem", env = "AGENT_CERT_FILE")]
    agent_cert: PathBuf,

    #[clap(long, default_value = "certs/controller.key", env = "AGENT_KEY_FILE")]
    agent_key: PathBuf,

    #[clap(long, default_value = "certs/ca.pem", env = "AGENT_CA_FILE")]
    agent_ca: PathBuf,

    #[clap(long, default_value = "1000", env = "AGENT_CALL_TIMEOUT_MS")]
    agent_call_timeout_ms: u64,

    #[clap(long, default_value = "1000", env = "AEGIS_RECONNECT_BASE_MS")]
    reconnect_base_ms: u64,

    #[clap(long, default_value = "60000", env = "AEGIS_RECONNECT_MAX_MS")]
    reconnect_max_ms: u64,

    /// A telemetry stream that lasted longer than this resets the reconnect
    /// delay.
    #[clap(long, default_value = "10000", env = "AEGIS_RECONNECT_STABLE_MS")]
    reconnect_stable_ms: u64,

    #[clap(long, default_value = "60", env = "IP_UPDATE_INTERVAL_SECS")]
    ip_update_interval_secs: u64,

    /// Telemetry batches buffered ahead of the reconciler. Must be a power of
    /// two. When full, the oldest is discarded.
    #[clap(long, default_value = "4", env = "AEGIS_TELEMETRY_QUEUE_CAPACITY")]
    telemetry_queue_capacity: usize,

    /// TTL, in seconds, recorded for a session until telemetry reports one.
    #[clap(long, default_value_t = DEFAULT_SESSION_TTL, env = "AEGIS_SESSION_TTL")]
    session_ttl: i32,

    /// Disables updating service addresses on container start events.
    #[clap(long, env = "AEGIS_CONTAINER_WATCH_DISABLED")]
    container_watch_disabled: bool,
}

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        log::init(&self.log_level, self.log_format)?;
        let _controller = self.spawn().await?;

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for the shutdown signal")?;
        info!("Received shutdown signal");
        Ok(())
    }

    /// Opens the store, starts every background task and returns the handle
    /// through which user requests are served.
    ///
    /// Expects a tracing subscriber to already be installed.
    pub async fn spawn(self) -> Result<Controller<AgentLink, DnsLookup>> {
        self.validate()?;
        let Self {
            log_level: _,
            log_format: _,
            admin_addr,
            db_path,
            agent_addr,
            agent_server_name,
            agent_cert,
            agent_key,
            agent_ca,
            agent_call_timeout_ms,
            reconnect_base_ms,
            reconnect_max_ms,
            reconnect_stable_ms,
            ip_update_interval_secs,
            telemetry_queue_capacity,
            session_ttl,
            container_watch_disabled,
        } = self;

        let mut prom = Registry::default();
        let client_metrics =
            GrpcClientMetricsFamily::register(prom.sub_registry_with_prefix("agent_client"));
        let monitor_metrics =
            MonitorMetrics::register(prom.sub_registry_with_prefix("agent_monitor"));
        let reconciler_metrics =
            ReconcilerMetrics::register(prom.sub_registry_with_prefix("reconciler"));
        let resolver_metrics = ResolverMetrics::register(prom.sub_registry_with_prefix("resolver"));

        let admin = Admin::new(prom);
        let ready = admin.readiness();
        tokio::spawn(
            async move {
                if let Err(error) = admin.serve(admin_addr).await {
                    warn!(%error, "Admin server failed");
                }
            }
            .instrument(info_span!("admin")),
        );

        let store = SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        info!(path = %db_path.display(), "Opened database");

        let call_timeout = Duration::from_millis(agent_call_timeout_ms);
        let tls = ClientMtlsConfig {
            cert: agent_cert,
            key: agent_key,
            ca: agent_ca,
            server_name: agent_server_name,
        }
        .load()?;
        let agent = AgentLink::connect_lazy(&agent_addr, tls, call_timeout, client_metrics)
            .with_context(|| format!("invalid agent address {agent_addr:?}"))?;

        let (batches_tx, batches_rx) = broadcast::channel(telemetry_queue_capacity);
        let monitor = Monitor::new(
            agent.clone(),
            BackoffConfig {
                base: Duration::from_millis(reconnect_base_ms),
                max: Duration::from_millis(reconnect_max_ms),
                stable: Duration::from_millis(reconnect_stable_ms),
            },
            batches_tx,
            monitor_metrics.clone(),
        );
        tokio::spawn(monitor.run().instrument(info_span!("agent_monitor", addr = %agent_addr)));

        tokio::spawn(
            ReconcilerTask::new(store.clone(), batches_rx, reconciler_metrics, monitor_metrics)
                .run()
                .instrument(info_span!("reconciler")),
        );

        let lookup = DnsLookup::from_system_conf()
            .map_err(|error| anyhow!("failed to read system resolver configuration: {error}"))?;
        let resolver = Arc::new(Resolver::new(
            store.clone(),
            agent.clone(),
            lookup,
            resolver_metrics,
        ));
        let interval = Duration::from_secs(ip_update_interval_secs);
        tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.run_sweep(interval).await }
                .instrument(info_span!("address_sweep"))
        });

        if container_watch_disabled {
            info!("Container watch disabled");
        } else {
            match DockerRuntime::connect_local() {
                Ok(runtime) => {
                    let resolver = resolver.clone();
                    tokio::spawn(
                        async move { resolver.watch_containers(runtime).await }
                            .instrument(info_span!("container_watch")),
                    );
                }
                Err(error) => {
                    warn!(%error, "Container runtime unavailable; container watch disabled")
                }
            }
        }

        let controller = Controller::new(
            store,
            agent,
            GatewayConfig {
                agent_timeout: call_timeout,
                initial_ttl: session_ttl,
            },
            resolver,
        );
        ready.set(true);
        info!("Controller ready");
        Ok(controller)
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect_base_ms == 0 {
            bail!("--reconnect-base-ms must be non-zero");
        }
        if self.reconnect_base_ms > self.reconnect_max_ms {
            bail!(
                "--reconnect-base-ms ({}) must not exceed --reconnect-max-ms ({})",
                self.reconnect_base_ms,
                self.reconnect_max_ms
            );
        }
        if !self.telemetry_queue_capacity.is_power_of_two() {
            bail!(
                "--telemetry-queue-capacity ({}) must be a non-zero power of two",
                self.telemetry_queue_capacity
            );
        }
        if self.ip_update_interval_secs == 0 {
            bail!("--ip-update-interval-secs must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("aegis").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.log_format, LogFormat::Plain);
        assert_eq!(args.admin_addr, "0.0.0.0:9990".parse().unwrap());
        assert_eq!(args.agent_addr, "172.21.0.10:50001");
        assert_eq!(args.reconnect_base_ms, 1000);
        assert_eq!(args.reconnect_max_ms, 60000);
        assert_eq!(args.telemetry_queue_capacity, 4);
        assert_eq!(args.session_ttl, 60);
        assert!(!args.container_watch_disabled);
        args.validate().unwrap();
    }

    #[test]
    fn rejects_inverted_backoff() {
        let args = parse(&["--reconnect-base-ms", "5000", "--reconnect-max-ms", "1000"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_zero_capacity_and_interval() {
        assert!(parse(&["--telemetry-queue-capacity", "0"]).validate().is_err());
        assert!(parse(&["--telemetry-queue-capacity", "8"]).validate().is_ok());
        assert!(parse(&["--ip-update-interval-secs", "0"]).validate().is_err());
        assert!(parse(&["--reconnect-base-ms", "0"]).validate().is_err());
    }

    #[test]
    fn queue_capacity_is_exact() {
        assert!(parse(&["--telemetry-queue-capacity", "3"]).validate().is_err());
        assert!(parse(&["--telemetry-queue-capacity", "6"]).validate().is_err());
    }

    #[test]
    fn json_logs() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
    }
}
