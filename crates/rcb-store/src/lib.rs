//! SQLite credential store.
//!
//! Implements the `rcb-core` [`CredentialStore`] port over an `sqlx` pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Row};
use tracing::info;

use rcb_core::{
    domain::{UserId, UserRecord},
    store::{CredentialStore, StoreError, StoreResult},
};

pub type DbPool = sqlx::SqlitePool;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    session TEXT,
    app_id INTEGER,
    app_hash TEXT,
    created_at TEXT NOT NULL
)";

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 5).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    sqlx::query(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

fn map_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn decode(e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("decode error: {e}"))
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> StoreResult<UserRecord> {
    let id: i64 = row.try_get("id").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let session: Option<String> = row.try_get("session").map_err(decode)?;
    let app_id: Option<i32> = row.try_get("app_id").map_err(decode)?;
    let app_hash: Option<String> = row.try_get("app_hash").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid created_at {created_at_str:?}: {e}")))?;

    Ok(UserRecord {
        id: UserId(id),
        name,
        session,
        app_id,
        app_hash,
        created_at,
    })
}

/// One row per user in the `users` table.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = connect(database_url).await?;
        info!("credential store ready");
        Ok(Self::new(pool))
    }

    async fn get_column<T>(&self, id: UserId, sql: &str) -> StoreResult<Option<T>>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin,
    {
        let value: Option<Option<T>> = sqlx::query_scalar(sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(value.flatten())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn add_user(&self, id: UserId, name: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id.0)
        .bind(name)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn record_exists(&self, id: UserId) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(found.is_some())
    }

    async fn count_all(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, session, app_id, app_hash, created_at FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(row_to_user).collect()
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(res.rows_affected())
    }

    async fn get_session(&self, id: UserId) -> StoreResult<Option<String>> {
        self.get_column(id, "SELECT session FROM users WHERE id = ?")
            .await
    }

    async fn set_session(&self, id: UserId, session: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, session, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET session = excluded.session",
        )
        .bind(id.0)
        .bind(session)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_app_id(&self, id: UserId) -> StoreResult<Option<i32>> {
        self.get_column(id, "SELECT app_id FROM users WHERE id = ?")
            .await
    }

    async fn set_app_id(&self, id: UserId, app_id: Option<i32>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, app_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET app_id = excluded.app_id",
        )
        .bind(id.0)
        .bind(app_id)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_app_hash(&self, id: UserId) -> StoreResult<Option<String>> {
        self.get_column(id, "SELECT app_hash FROM users WHERE id = ?")
            .await
    }

    async fn set_app_hash(&self, id: UserId, app_hash: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, app_hash, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET app_hash = excluded.app_hash",
        )
        .bind(id.0)
        .bind(app_hash)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn clear_credentials(&self, id: UserId) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET session = NULL, app_id = NULL, app_hash = NULL WHERE id = ?",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }
}
