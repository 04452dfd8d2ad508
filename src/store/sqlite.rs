use async_trait::async_trait;
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, SqlitePool};
use tracing::info;

use super::{SessionBackend, StoreError};
use crate::session::ActorId;

/// Sessions in a single SQLite table, one row per actor.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actor_sessions (
                actor_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn decode(actor: &ActorId, raw: &str) -> Result<Value, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            actor: actor.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SessionBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT record FROM actor_sessions WHERE actor_id = ?1")
            .bind(actor.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("record");
                Self::decode(actor, &raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, actor: &ActorId, record: &Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO actor_sessions (actor_id, record, updated_at)
            VALUES (?1, ?2, datetime('now'))
            "#,
        )
        .bind(actor.as_str())
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, actor: &ActorId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM actor_sessions WHERE actor_id = ?1")
            .bind(actor.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(ActorId, Value)>, StoreError> {
        let rows = sqlx::query("SELECT actor_id, record FROM actor_sessions")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let actor = ActorId::new(row.get::<String, _>("actor_id"));
                let raw: String = row.get("record");
                Self::decode(&actor, &raw).ok().map(|record| (actor, record))
            })
            .collect())
    }
}
