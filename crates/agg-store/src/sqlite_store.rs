//! SQLite-backed durable store
//!
//! Holds plugins, targets, aggregation sources, connection methods and
//! aggregates. Uses SQLx for async database operations.

use crate::error::{Result, StoreError};
use crate::kv_store::{index_terms, KvStore};
use crate::metrics::{record_store_error, OperationTimer};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// URL format: `sqlite:///path/to/db.sqlite?mode=rwc` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Initializing SQLite store: {}", url);

        // Every connection to `:memory:` opens a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        info!("SQLite store initialized successfully");
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_index (
                field TEXT NOT NULL,
                term TEXT NOT NULL,
                key TEXT NOT NULL,
                PRIMARY KEY (field, term, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_key ON search_index(key)")
            .execute(&self.pool)
            .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn track<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !e.is_not_found() && !e.is_duplicate() {
                record_store_error(operation, self.store_type(), e.kind());
            }
        }
        result
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    fn store_type(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("create", self.store_type());
        let result = sqlx::query(
            "INSERT INTO records (tbl, key, value) VALUES (?, ?, ?) ON CONFLICT(tbl, key) DO NOTHING",
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)
        .and_then(|done| {
            if done.rows_affected() == 0 {
                Err(StoreError::already_exists(table, key))
            } else {
                Ok(())
            }
        });
        self.track("create", result)
    }

    async fn upsert(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("upsert", self.store_type());
        let result = sqlx::query(
            r#"
            INSERT INTO records (tbl, key, value) VALUES (?, ?, ?)
            ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(StoreError::from);
        self.track("upsert", result)
    }

    async fn read(&self, table: &str, key: &str) -> Result<String> {
        let _timer = OperationTimer::new("read", self.store_type());
        let row = sqlx::query("SELECT value FROM records WHERE tbl = ? AND key = ?")
            .bind(table)
            .bind(key)
            .fetch_optional(&self.pool)
            .await;
        let result = match row {
            Ok(Some(row)) => Ok(row.get::<String, _>("value")),
            Ok(None) => Err(StoreError::not_found(table, key)),
            Err(e) => Err(e.into()),
        };
        self.track("read", result)
    }

    async fn update(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("update", self.store_type());
        let result = sqlx::query("UPDATE records SET value = ? WHERE tbl = ? AND key = ?")
            .bind(value)
            .bind(table)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)
            .and_then(|done| {
                if done.rows_affected() == 0 {
                    Err(StoreError::not_found(table, key))
                } else {
                    Ok(())
                }
            });
        self.track("update", result)
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let _timer = OperationTimer::new("delete", self.store_type());
        let result = sqlx::query("DELETE FROM records WHERE tbl = ? AND key = ?")
            .bind(table)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)
            .and_then(|done| {
                if done.rows_affected() == 0 {
                    Err(StoreError::not_found(table, key))
                } else {
                    Ok(())
                }
            });
        self.track("delete", result)
    }

    async fn get_all_keys(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM records WHERE tbl = ? ORDER BY key")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn get_all_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM records WHERE tbl = ? AND instr(key, ?) > 0 ORDER BY key")
            .bind(table)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT tbl, key FROM records WHERE instr(key, ?) > 0")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("tbl"), r.get::<String, _>("key")))
            .collect())
    }

    async fn create_index(&self, fields: &Map<String, Value>, key: &str) -> Result<()> {
        for (field, value) in fields {
            for term in index_terms(value) {
                sqlx::query(
                    "INSERT INTO search_index (field, term, key) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(field)
                .bind(&term)
                .bind(key)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn get_index(&self, field: &str, value: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM search_index WHERE field = ? AND term = ?")
            .bind(field)
            .bind(value.to_lowercase())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn delete_index(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM search_index WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_round() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create("Target", "u1", "{\"a\":1}").await.unwrap();
        assert!(store.create("Target", "u1", "{}").await.unwrap_err().is_duplicate());
        assert_eq!(store.read("Target", "u1").await.unwrap(), "{\"a\":1}");

        store.update("Target", "u1", "{\"a\":2}").await.unwrap();
        assert_eq!(store.read("Target", "u1").await.unwrap(), "{\"a\":2}");

        store.delete("Target", "u1").await.unwrap();
        assert!(store.read("Target", "u1").await.unwrap_err().is_not_found());
        assert!(store.delete("Target", "u1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_matching_uses_literal_substring() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert("AggregationSource", "/x/a_b", "{}").await.unwrap();
        store.upsert("AggregationSource", "/x/aXb", "{}").await.unwrap();
        let keys = store.get_all_matching("AggregationSource", "a_b").await.unwrap();
        assert_eq!(keys, vec!["/x/a_b".to_string()]);
    }

    #[tokio::test]
    async fn test_index() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut fields = Map::new();
        fields.insert("BMCAddress".into(), json!("10.0.0.1"));
        store.create_index(&fields, "u1").await.unwrap();
        assert_eq!(store.get_index("BMCAddress", "10.0.0.1").await.unwrap(), vec!["u1".to_string()]);
        store.delete_index("u1").await.unwrap();
        assert!(store.get_index("BMCAddress", "10.0.0.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_on_disk_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let store = SqliteStore::new(&url).await.unwrap();
        store.upsert("Plugin", "GRF", "{}").await.unwrap();
        assert_eq!(store.get_all_keys("Plugin").await.unwrap(), vec!["GRF".to_string()]);
    }
}
