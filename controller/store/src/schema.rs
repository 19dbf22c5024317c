use sqlx::SqlitePool;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            description TEXT
        )
        "#,
    ),
    (
        "seed roles",
        r#"
        INSERT OR IGNORE INTO roles (name, description) VALUES
            ('admin', 'Administrator with full access'),
            ('user', 'Standard user access')
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id        INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            username  TEXT NOT NULL UNIQUE,
            password  TEXT NOT NULL,
            role_id   INTEGER NOT NULL DEFAULT 2 REFERENCES roles(id),
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "services",
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            hostname    TEXT NOT NULL,
            ip          INTEGER NOT NULL,
            port        INTEGER NOT NULL,
            description TEXT,
            created_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "role_services",
        r#"
        CREATE TABLE IF NOT EXISTS role_services (
            role_id    INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
            PRIMARY KEY (role_id, service_id)
        )
        "#,
    ),
    (
        "user_extra_services",
        r#"
        CREATE TABLE IF NOT EXISTS user_extra_services (
            user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, service_id)
        )
        "#,
    ),
    (
        "user_active_services",
        r#"
        CREATE TABLE IF NOT EXISTS user_active_services (
            user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
            time_left  INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, service_id)
        )
        "#,
    ),
];

/// Per-connection staging table for the reconciler's session sync.
pub(crate) const CREATE_SESSION_SYNC: &str = r#"
    CREATE TEMP TABLE IF NOT EXISTS session_sync (
        user_id    INTEGER NOT NULL,
        service_id INTEGER NOT NULL,
        time_left  INTEGER NOT NULL,
        PRIMARY KEY (user_id, service_id)
    )
"#;

/// Creates any missing tables and seeds the built-in roles.
pub(crate) async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, sql) in STATEMENTS {
        tracing::trace!(%name, "Applying schema");
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}
