use crate::schema;
use aegis_controller_core::{
    addr::{ipv4_to_u32, u32_to_ipv4},
    AccessStore, ActiveSession, AddressStore, AddressUpdate, HashMap, NewService, RoleId,
    Service, ServiceAddr, ServiceId, ServiceTarget, SessionKey, SessionStore, SessionTarget,
    StoreError, StoreResult, SyncOutcome, UserId, UserRecord,
};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{
    net::SocketAddrV4,
    num::NonZeroU16,
    path::Path,
    str::FromStr,
    time::Duration,
};
use tracing::{info, warn};

/// The SQLite-backed authorization and session store.
///
/// The pool holds a single connection: SQLite admits one writer at a time, so
/// every transaction is serialized through it.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

// === impl SqliteStore ===

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and its parent
    /// directory, enables WAL and foreign keys, and applies the schema.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(StoreError::backend)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let store = Self::connect(options).await?;
        info!(path = %path.display(), "Database initialized");
        Ok(store)
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::backend)?
            .foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // An in-memory database lives only as long as its connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;
        schema::bootstrap(&pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(Self { pool })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Records a new service. The address must already be resolved; a service
    /// without one is never created.
    pub async fn create_service(&self, new: NewService, addr: ServiceAddr) -> StoreResult<Service> {
        let created_at = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO services (name, hostname, ip, port, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&new.name)
        .bind(&new.hostname)
        .bind(i64::from(ipv4_to_u32(addr.ip)))
        .bind(i64::from(addr.port.get()))
        .bind(&new.description)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        let id = match res {
            Ok(done) => ServiceId(done.last_insert_rowid()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                return Err(StoreError::Conflict(format!("service {:?} exists", new.name)));
            }
            Err(error) => return Err(StoreError::backend(error)),
        };

        info!(service = %id, name = %new.name, %addr, "Created service");
        Ok(Service {
            id,
            name: new.name,
            hostname: new.hostname,
            addr,
            description: new.description,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl AccessStore for SqliteStore {
    async fn lookup_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, (i64, i64, bool)>(
            "SELECT id, role_id, is_active FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(|(id, role, active)| UserRecord {
            id: UserId(id),
            role: RoleId(role),
            active,
        }))
    }

    async fn is_entitled(
        &self,
        user: UserId,
        role: RoleId,
        service: ServiceId,
    ) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM role_services WHERE role_id = ?1 AND service_id = ?3
            ) OR EXISTS (
                SELECT 1 FROM user_extra_services WHERE user_id = ?2 AND service_id = ?3
            )
            "#,
        )
        .bind(role.0)
        .bind(user.0)
        .bind(service.0)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)
    }

    async fn service_addr(&self, service: ServiceId) -> StoreResult<Option<ServiceAddr>> {
        let row = sqlx::query_as::<_, (i64, i64)>("SELECT ip, port FROM services WHERE id = ?1")
            .bind(service.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.map(|(ip, port)| decode_addr(ip, port)).transpose()
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteStore {
    async fn service_index(&self) -> StoreResult<HashMap<SocketAddrV4, ServiceId>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64)>("SELECT id, ip, port FROM services")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut index = HashMap::with_capacity(rows.len());
        for (id, ip, port) in rows {
            match decode_addr(ip, port) {
                Ok(addr) => {
                    index.insert(addr.socket_addr(), ServiceId(id));
                }
                Err(error) => warn!(service = id, %error, "Skipping service"),
            }
        }
        Ok(index)
    }

    async fn active_users(&self) -> StoreResult<HashMap<ServiceId, Vec<UserId>>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT service_id, user_id FROM user_active_services",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut users = HashMap::<ServiceId, Vec<UserId>>::new();
        for (service, user) in rows {
            users.entry(ServiceId(service)).or_default().push(UserId(user));
        }
        Ok(users)
    }

    async fn upsert_session(&self, key: SessionKey, time_left: i32) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_active_services (user_id, service_id, time_left, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, service_id)
            DO UPDATE SET time_left = excluded.time_left, updated_at = excluded.updated_at
            "#,
        )
        .bind(key.user.0)
        .bind(key.service.0)
        .bind(time_left)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn remove_session(&self, key: SessionKey) -> StoreResult<bool> {
        let done = sqlx::query(
            "DELETE FROM user_active_services WHERE user_id = ?1 AND service_id = ?2",
        )
        .bind(key.user.0)
        .bind(key.service.0)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(done.rows_affected() > 0)
    }

    async fn sync_sessions(
        &self,
        target: &SessionTarget,
        snapshot_at: DateTime<Utc>,
    ) -> StoreResult<SyncOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        sqlx::query(schema::CREATE_SESSION_SYNC)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        sqlx::query("DELETE FROM session_sync")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        for (key, time_left) in target {
            sqlx::query(
                "INSERT INTO session_sync (user_id, service_id, time_left) VALUES (?1, ?2, ?3)",
            )
            .bind(key.user.0)
            .bind(key.service.0)
            .bind(*time_left)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        let evicted = sqlx::query(
            r#"
            DELETE FROM user_active_services
            WHERE updated_at <= ?1
              AND NOT EXISTS (
                SELECT 1 FROM session_sync s
                WHERE s.user_id = user_active_services.user_id
                  AND s.service_id = user_active_services.service_id
              )
            "#,
        )
        .bind(snapshot_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?
        .rows_affected();

        let updated = sqlx::query(
            r#"
            UPDATE user_active_services
            SET time_left = (
                    SELECT s.time_left FROM session_sync s
                    WHERE s.user_id = user_active_services.user_id
                      AND s.service_id = user_active_services.service_id
                ),
                updated_at = ?1
            WHERE EXISTS (
                SELECT 1 FROM session_sync s
                WHERE s.user_id = user_active_services.user_id
                  AND s.service_id = user_active_services.service_id
                  AND s.time_left <> user_active_services.time_left
            )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?
        .rows_affected();

        let inserted = sqlx::query(
            r#"
            INSERT INTO user_active_services (user_id, service_id, time_left, updated_at)
            SELECT s.user_id, s.service_id, s.time_left, ?1 FROM session_sync s
            WHERE NOT EXISTS (
                SELECT 1 FROM user_active_services a
                WHERE a.user_id = s.user_id AND a.service_id = s.service_id
            )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?
        .rows_affected();

        sqlx::query("DELETE FROM session_sync")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;

        Ok(SyncOutcome {
            inserted,
            updated,
            evicted,
        })
    }

    async fn active_sessions_for_user(&self, user: UserId) -> StoreResult<Vec<ActiveSession>> {
        let rows = sqlx::query_as::<_, (i64, i32, DateTime<Utc>)>(
            r#"
            SELECT service_id, time_left, updated_at
            FROM user_active_services
            WHERE user_id = ?1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows
            .into_iter()
            .map(|(service, time_left, updated_at)| ActiveSession {
                key: SessionKey::new(user, ServiceId(service)),
                time_left,
                updated_at,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl AddressStore for SqliteStore {
    async fn service_targets(&self) -> StoreResult<Vec<ServiceTarget>> {
        let rows = sqlx::query_as::<_, (i64, String, i64, i64)>(
            "SELECT id, hostname, ip, port FROM services ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter()
            .map(|(id, hostname, ip, port)| {
                Ok(ServiceTarget {
                    id: ServiceId(id),
                    hostname,
                    addr: decode_addr(ip, port)?,
                })
            })
            .collect()
    }

    async fn update_addresses(&self, updates: &[AddressUpdate]) -> StoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for AddressUpdate { service, addr } in updates {
            let done = sqlx::query("UPDATE services SET ip = ?1, port = ?2 WHERE id = ?3")
                .bind(i64::from(ipv4_to_u32(addr.ip)))
                .bind(i64::from(addr.port.get()))
                .bind(service.0)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
            if done.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("service {service}")));
            }
        }
        tx.commit().await.map_err(StoreError::backend)
    }
}

fn decode_addr(ip: i64, port: i64) -> StoreResult<ServiceAddr> {
    let ip = u32::try_from(ip)
        .map_err(|_| StoreError::backend(format!("stored IP {ip} is out of range")))?;
    let port = u16::try_from(port)
        .ok()
        .and_then(NonZeroU16::new)
        .ok_or_else(|| StoreError::backend(format!("stored port {port} is out of range")))?;
    Ok(ServiceAddr::new(u32_to_ipv4(ip), port))
}
