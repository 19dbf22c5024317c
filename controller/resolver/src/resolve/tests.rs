use super::*;
use crate::ContainerStarts;
use aegis_controller_core::{AgentError, NewService, PathIntent, ServiceId};
use aegis_controller_store::SqliteStore;
use maplit::hashmap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    net::Ipv4Addr,
    num::NonZeroU16,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Clone, Default)]
struct FakeLookup {
    answers: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
    calls: Arc<AtomicUsize>,
}

#[derive(Default)]
struct RecordingAgent {
    pushes: Mutex<Vec<Vec<AddressChange>>>,
}

#[derive(Default)]
struct FakeRuntime {
    reachable: bool,
    starts: Mutex<Vec<ContainerStart>>,
    ips: HashMap<String, Ipv4Addr>,
}

type TestResolver = Resolver<SqliteStore, Arc<RecordingAgent>, FakeLookup>;

impl FakeLookup {
    fn answer(&self, host: &str, ips: &[&str]) {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.answers.lock().insert(host.to_string(), ips);
    }

    fn forget(&self, host: &str) {
        self.answers.lock().remove(host);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HostLookup for FakeLookup {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| format!("NXDOMAIN {host}").into())
    }
}

impl RecordingAgent {
    fn pushes(&self) -> Vec<Vec<AddressChange>> {
        self.pushes.lock().clone()
    }
}

#[async_trait::async_trait]
impl AgentApi for RecordingAgent {
    async fn submit(&self, _: PathIntent, timeout: Duration) -> Result<(), AgentError> {
        Err(AgentError::Timeout(timeout))
    }

    async fn push_address_changes(&self, changes: &[AddressChange]) -> Result<(), AgentError> {
        self.pushes.lock().push(changes.to_vec());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), BoxError> {
        if self.reachable {
            Ok(())
        } else {
            Err("connection refused".into())
        }
    }

    async fn starts(&self) -> Result<ContainerStarts, BoxError> {
        let starts = std::mem::take(&mut *self.starts.lock());
        Ok(Box::pin(tokio_stream::iter(starts.into_iter().map(Ok))))
    }

    async fn inspect_ipv4(&self, id: &str) -> Result<Option<Ipv4Addr>, BoxError> {
        Ok(self.ips.get(id).copied())
    }
}

fn addr(s: &str) -> ServiceAddr {
    let addr: std::net::SocketAddrV4 = s.parse().unwrap();
    ServiceAddr::new(*addr.ip(), NonZeroU16::new(addr.port()).unwrap())
}

async fn resolver() -> (TestResolver, SqliteStore, Arc<RecordingAgent>, FakeLookup) {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let agent = Arc::new(RecordingAgent::default());
    let lookup = FakeLookup::default();
    let resolver = Resolver::new(
        store.clone(),
        agent.clone(),
        lookup.clone(),
        ResolverMetrics::default(),
    );
    (resolver, store, agent, lookup)
}

async fn create(store: &SqliteStore, name: &str, hostname: &str, resolved: &str) -> ServiceId {
    let new = NewService {
        name: name.to_string(),
        hostname: hostname.to_string(),
        description: None,
    };
    store.create_service(new, addr(resolved)).await.unwrap().id
}

#[tokio::test]
async fn literal_ipv4_skips_lookup() {
    let (resolver, _, _, lookup) = resolver().await;
    assert_eq!(
        resolver.resolve_hostname("10.1.2.3:8080").await.unwrap(),
        addr("10.1.2.3:8080")
    );
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn named_port_resolves() {
    let (resolver, _, _, lookup) = resolver().await;
    lookup.answer("db.internal", &["10.0.0.5"]);
    assert_eq!(
        resolver.resolve_hostname("db.internal:postgresql").await.unwrap(),
        addr("10.0.0.5:5432")
    );
}

#[tokio::test]
async fn first_ipv4_answer_wins() {
    let (resolver, _, _, lookup) = resolver().await;
    lookup.answer("postgres", &["2001:db8::5", "10.0.0.5", "10.0.0.6"]);
    assert_eq!(
        resolver.resolve_hostname("postgres:5432").await.unwrap(),
        addr("10.0.0.5:5432")
    );
}

#[tokio::test]
async fn unusable_hostnames_fail() {
    let (resolver, _, _, lookup) = resolver().await;
    lookup.answer("v6only", &["2001:db8::5"]);

    assert!(matches!(
        resolver.resolve_hostname("v6only:80").await,
        Err(ResolveError::NoIpv4(host)) if host == "v6only"
    ));
    assert!(matches!(
        resolver.resolve_hostname("[2001:db8::1]:80").await,
        Err(ResolveError::NotIpv4(_))
    ));
    assert!(matches!(
        resolver.resolve_hostname("postgres").await,
        Err(ResolveError::Address(AddrError::MissingPort(_)))
    ));
    assert!(matches!(
        resolver.resolve_hostname("missing:80").await,
        Err(ResolveError::Lookup { .. })
    ));
}

#[tokio::test]
async fn ip_change_is_stored_and_pushed_once() {
    let (resolver, store, agent, lookup) = resolver().await;
    let pg = create(&store, "pg", "postgres:5432", "10.0.0.5:5432").await;
    lookup.answer("postgres", &["10.0.0.9"]);

    let changes = resolver.sweep().await.unwrap();
    let expected = vec![AddressChange {
        service: pg,
        old_ip: Ipv4Addr::new(10, 0, 0, 5),
        new_ip: Ipv4Addr::new(10, 0, 0, 9),
    }];
    assert_eq!(changes, expected);
    assert_eq!(agent.pushes(), vec![expected]);
    assert_eq!(
        store.service_targets().await.unwrap()[0].addr,
        addr("10.0.0.9:5432")
    );

    // Nothing moved since.
    assert_eq!(resolver.sweep().await.unwrap(), vec![]);
    assert_eq!(agent.pushes().len(), 1);
}

#[tokio::test]
async fn port_only_change_is_stored_but_not_pushed() {
    let (resolver, store, agent, _) = resolver().await;
    create(&store, "pg", "10.0.0.5:5433", "10.0.0.5:5432").await;

    let changes = resolver.sweep().await.unwrap();
    assert!(changes.is_empty());
    assert!(agent.pushes().is_empty());
    assert_eq!(
        store.service_targets().await.unwrap()[0].addr,
        addr("10.0.0.5:5433")
    );
}

#[tokio::test]
async fn failed_lookup_keeps_last_known_address() {
    let (resolver, store, agent, lookup) = resolver().await;
    create(&store, "pg", "postgres:5432", "10.0.0.5:5432").await;
    let cache = create(&store, "cache", "redis:6379", "10.0.0.6:6379").await;
    lookup.answer("redis", &["10.0.0.7"]);
    lookup.forget("postgres");

    let changes = resolver.sweep().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].service, cache);
    assert_eq!(agent.pushes().len(), 1);

    let addrs = store
        .service_targets()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.addr)
        .collect::<Vec<_>>();
    assert_eq!(addrs, vec![addr("10.0.0.5:5432"), addr("10.0.0.7:6379")]);
}

#[tokio::test]
async fn run_sweep_starts_immediately_and_repeats() {
    let (resolver, store, _, lookup) = resolver().await;
    create(&store, "pg", "postgres:5432", "10.0.0.5:5432").await;
    lookup.answer("postgres", &["10.0.0.5"]);

    let task = tokio::spawn(async move { resolver.run_sweep(Duration::from_millis(20)).await });
    time::timeout(Duration::from_secs(5), async {
        while lookup.calls() < 2 {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sweep should repeat");
    task.abort();
}

#[tokio::test]
async fn unreachable_container_runtime_disables_watch() {
    let (resolver, _, _, _) = resolver().await;
    time::timeout(
        Duration::from_secs(1),
        resolver.watch_containers(FakeRuntime::default()),
    )
    .await
    .expect("watch must return when the runtime is unreachable");
}

#[tokio::test]
async fn container_start_updates_matching_service() {
    let (resolver, store, agent, _) = resolver().await;
    let pg = create(&store, "pg", "postgres:5432", "10.0.0.5:5432").await;
    let runtime = FakeRuntime {
        reachable: true,
        starts: Mutex::new(vec![
            ContainerStart {
                id: "c1".to_string(),
                name: "grafana".to_string(),
            },
            ContainerStart {
                id: "c2".to_string(),
                name: "postgres".to_string(),
            },
        ]),
        ips: hashmap! {
            "c1".to_string() => Ipv4Addr::new(10, 0, 0, 20),
            "c2".to_string() => Ipv4Addr::new(10, 0, 0, 9),
        },
    };

    resolver.watch_containers(runtime).await;
    assert_eq!(
        store.service_targets().await.unwrap()[0].addr,
        addr("10.0.0.9:5432")
    );
    assert_eq!(
        agent.pushes(),
        vec![vec![AddressChange {
            service: pg,
            old_ip: Ipv4Addr::new(10, 0, 0, 5),
            new_ip: Ipv4Addr::new(10, 0, 0, 9),
        }]]
    );
}

#[tokio::test]
async fn container_without_address_is_ignored() {
    let (resolver, store, agent, _) = resolver().await;
    create(&store, "pg", "postgres:5432", "10.0.0.5:5432").await;
    let runtime = FakeRuntime {
        reachable: true,
        ..Default::default()
    };

    let change = resolver
        .container_started(
            &runtime,
            ContainerStart {
                id: "c9".to_string(),
                name: "postgres".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(change, None);
    assert!(agent.pushes().is_empty());
}
