use crate::{
    addr::ServiceAddr,
    agent::{AgentApi, AgentError, PathIntent},
    service::{AddressChange, RoleId, ServiceId},
    session::{ActiveSession, SessionKey, SessionTarget, SyncOutcome, UserId},
    store::{AccessStore, SessionStore, StoreError, StoreResult, UserRecord},
    HashMap,
};
use ahash::AHashSet as HashSet;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    net::SocketAddrV4,
    num::NonZeroU16,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
    fail: AtomicBool,
    pub fail_session_writes: AtomicBool,
}

#[derive(Default)]
struct State {
    users: HashMap<String, UserRecord>,
    role_grants: HashSet<(RoleId, ServiceId)>,
    user_grants: HashSet<(UserId, ServiceId)>,
    services: HashMap<ServiceId, ServiceAddr>,
    sessions: BTreeMap<SessionKey, (i32, DateTime<Utc>)>,
    writes: usize,
}

#[derive(Default)]
pub(crate) struct FakeAgent {
    pub submitted: Mutex<Vec<PathIntent>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn add_user(&self, name: &str, user: UserRecord) {
        self.state.lock().users.insert(name.to_string(), user);
    }

    pub fn grant_role(&self, role: RoleId, service: ServiceId) {
        self.state.lock().role_grants.insert((role, service));
    }

    pub fn grant_user(&self, user: UserId, service: ServiceId) {
        self.state.lock().user_grants.insert((user, service));
    }

    pub fn add_service(&self, id: ServiceId, addr: &str) {
        let addr: SocketAddrV4 = addr.parse().expect("valid address");
        let addr = ServiceAddr::new(*addr.ip(), NonZeroU16::new(addr.port()).expect("port"));
        self.state.lock().services.insert(id, addr);
    }

    pub fn put_session(&self, key: SessionKey, time_left: i32) {
        self.state
            .lock()
            .sessions
            .insert(key, (time_left, Utc::now()));
    }

    pub fn sessions(&self) -> Vec<(SessionKey, i32)> {
        self.state
            .lock()
            .sessions
            .iter()
            .map(|(k, (ttl, _))| (*k, *ttl))
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(StoreError::backend("injected failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AccessStore for MemoryStore {
    async fn lookup_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.check()?;
        Ok(self.state.lock().users.get(username).copied())
    }

    async fn is_entitled(
        &self,
        user: UserId,
        role: RoleId,
        service: ServiceId,
    ) -> StoreResult<bool> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.role_grants.contains(&(role, service))
            || state.user_grants.contains(&(user, service)))
    }

    async fn service_addr(&self, service: ServiceId) -> StoreResult<Option<ServiceAddr>> {
        self.check()?;
        Ok(self.state.lock().services.get(&service).copied())
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn service_index(&self) -> StoreResult<HashMap<SocketAddrV4, ServiceId>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .services
            .iter()
            .map(|(id, addr)| (addr.socket_addr(), *id))
            .collect())
    }

    async fn active_users(&self) -> StoreResult<HashMap<ServiceId, Vec<UserId>>> {
        self.check()?;
        let mut users = HashMap::<ServiceId, Vec<UserId>>::new();
        for key in self.state.lock().sessions.keys() {
            users.entry(key.service).or_default().push(key.user);
        }
        Ok(users)
    }

    async fn upsert_session(&self, key: SessionKey, time_left: i32) -> StoreResult<()> {
        self.check()?;
        if self.fail_session_writes.load(Ordering::SeqCst) {
            return Err(StoreError::backend("session write failed"));
        }
        let mut state = self.state.lock();
        state.sessions.insert(key, (time_left, Utc::now()));
        state.writes += 1;
        Ok(())
    }

    async fn remove_session(&self, key: SessionKey) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock();
        let removed = state.sessions.remove(&key).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn sync_sessions(
        &self,
        target: &SessionTarget,
        snapshot_at: DateTime<Utc>,
    ) -> StoreResult<SyncOutcome> {
        self.check()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        let State {
            sessions, writes, ..
        } = &mut *state;
        let mut outcome = SyncOutcome::default();

        let before = sessions.len();
        sessions.retain(|k, (_, at)| target.contains_key(k) || *at > snapshot_at);
        outcome.evicted = (before - sessions.len()) as u64;

        for (key, ttl) in target {
            match sessions.get_mut(key) {
                Some((current, at)) => {
                    if *current != *ttl {
                        *current = *ttl;
                        *at = now;
                        outcome.updated += 1;
                    }
                }
                None => {
                    sessions.insert(*key, (*ttl, now));
                    outcome.inserted += 1;
                }
            }
        }

        *writes += (outcome.inserted + outcome.updated + outcome.evicted) as usize;
        Ok(outcome)
    }

    async fn active_sessions_for_user(&self, user: UserId) -> StoreResult<Vec<ActiveSession>> {
        self.check()?;
        let mut sessions = self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|(k, _)| k.user == user)
            .map(|(key, (time_left, updated_at))| ActiveSession {
                key: *key,
                time_left: *time_left,
                updated_at: *updated_at,
            })
            .collect::<Vec<_>>();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

impl FakeAgent {
    pub fn submitted(&self) -> Vec<PathIntent> {
        self.submitted.lock().clone()
    }
}

#[async_trait::async_trait]
impl AgentApi for FakeAgent {
    async fn submit(&self, intent: PathIntent, timeout: Duration) -> Result<(), AgentError> {
        self.submitted.lock().push(intent);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::Timeout(timeout));
        }
        Ok(())
    }

    async fn push_address_changes(&self, _: &[AddressChange]) -> Result<(), AgentError> {
        Ok(())
    }
}
