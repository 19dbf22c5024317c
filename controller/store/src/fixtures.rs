//! Seeding helpers for tests. Users, roles and grants are managed by the
//! admin surface in production.

use crate::SqliteStore;
use aegis_controller_core::{RoleId, ServiceId, StoreError, StoreResult, UserId};

impl SqliteStore {
    pub async fn create_role(&self, name: &str) -> StoreResult<RoleId> {
        let done = sqlx::query("INSERT INTO roles (name) VALUES (?1)")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(StoreError::backend)?;
        Ok(RoleId(done.last_insert_rowid()))
    }

    pub async fn role_id(&self, name: &str) -> StoreResult<RoleId> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(StoreError::backend)?
            .map(RoleId)
            .ok_or_else(|| StoreError::NotFound(format!("role {name:?}")))
    }

    pub async fn create_user(
        &self,
        username: &str,
        role: RoleId,
        active: bool,
    ) -> StoreResult<UserId> {
        let done = sqlx::query(
            "INSERT INTO users (username, password, role_id, is_active) VALUES (?1, '!', ?2, ?3)",
        )
        .bind(username)
        .bind(role.0)
        .bind(active)
        .execute(self.pool())
        .await
        .map_err(StoreError::backend)?;
        Ok(UserId(done.last_insert_rowid()))
    }

    pub async fn grant_role(&self, role: RoleId, service: ServiceId) -> StoreResult<()> {
        sqlx::query("INSERT INTO role_services (role_id, service_id) VALUES (?1, ?2)")
            .bind(role.0)
            .bind(service.0)
            .execute(self.pool())
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    pub async fn grant_user(&self, user: UserId, service: ServiceId) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_extra_services (user_id, service_id) VALUES (?1, ?2)")
            .bind(user.0)
            .bind(service.0)
            .execute(self.pool())
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    pub async fn revoke_role(&self, role: RoleId, service: ServiceId) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_services WHERE role_id = ?1 AND service_id = ?2")
            .bind(role.0)
            .bind(service.0)
            .execute(self.pool())
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
