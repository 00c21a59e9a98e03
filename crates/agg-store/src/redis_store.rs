//! Redis-backed store
//!
//! Rows live at `<table>:<key>`. The index keeps one set per
//! `(field, term)` plus a reverse set per key so entries can be removed
//! without scanning.

use crate::error::{Result, StoreError};
use crate::kv_store::{index_terms, KvStore};
use crate::metrics::{update_redis_status, OperationTimer};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::{Map, Value};
use tracing::info;

const INDEX_PREFIX: &str = "index";
const REVERSE_PREFIX: &str = "index-keys";

pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn new(url: &str) -> Result<Self> {
        info!("Connecting Redis store");
        let client = redis::Client::open(url)?;
        let conn = match client.get_multiplexed_tokio_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                update_redis_status(false);
                return Err(e.into());
            }
        };
        update_redis_status(true);
        Ok(Self { conn })
    }

    fn row_key(table: &str, key: &str) -> String {
        format!("{}:{}", table, key)
    }

    fn index_key(field: &str, term: &str) -> String {
        format!("{}:{}:{}", INDEX_PREFIX, field, term)
    }

    fn reverse_key(key: &str) -> String {
        format!("{}:{}", REVERSE_PREFIX, key)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found)
    }
}

/// Escape glob metacharacters so user data matches literally in SCAN
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl KvStore for RedisStore {
    fn store_type(&self) -> &'static str {
        "redis"
    }

    async fn create(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("create", self.store_type());
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::row_key(table, key))
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        match set {
            Some(_) => Ok(()),
            None => Err(StoreError::already_exists(table, key)),
        }
    }

    async fn upsert(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("upsert", self.store_type());
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(Self::row_key(table, key))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn read(&self, table: &str, key: &str) -> Result<String> {
        let _timer = OperationTimer::new("read", self.store_type());
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::row_key(table, key))
            .query_async(&mut conn)
            .await?;
        value.ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn update(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("update", self.store_type());
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::row_key(table, key))
            .arg(value)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        match set {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(table, key)),
        }
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let _timer = OperationTimer::new("delete", self.store_type());
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(Self::row_key(table, key))
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(StoreError::not_found(table, key));
        }
        Ok(())
    }

    async fn get_all_keys(&self, table: &str) -> Result<Vec<String>> {
        let prefix = format!("{}:", table);
        let keys = self.scan(&format!("{}*", escape_glob(&prefix))).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn get_all_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>> {
        let prefix = format!("{}:", table);
        let keys = self
            .scan(&format!("{}*{}*", escape_glob(&prefix), escape_glob(pattern)))
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .filter(|k| k.contains(pattern))
            .collect())
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let keys = self.scan(&format!("*{}*", escape_glob(pattern))).await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.starts_with(INDEX_PREFIX))
            .filter_map(|k| {
                let (table, key) = k.split_once(':')?;
                key.contains(pattern)
                    .then(|| (table.to_string(), key.to_string()))
            })
            .collect())
    }

    async fn create_index(&self, fields: &Map<String, Value>, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (field, value) in fields {
            for term in index_terms(value) {
                pipe.cmd("SADD").arg(Self::index_key(field, &term)).arg(key).ignore();
                pipe.cmd("SADD")
                    .arg(Self::reverse_key(key))
                    .arg(Self::index_key(field, &term))
                    .ignore();
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get_index(&self, field: &str, value: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("SMEMBERS")
            .arg(Self::index_key(field, &value.to_lowercase()))
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }

    async fn delete_index(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = redis::cmd("SMEMBERS")
            .arg(Self::reverse_key(key))
            .query_async(&mut conn)
            .await?;
        let mut pipe = redis::pipe();
        for entry in entries {
            pipe.cmd("SREM").arg(entry).arg(key).ignore();
        }
        pipe.cmd("DEL").arg(Self::reverse_key(key)).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
        assert_eq!(escape_glob("/redfish/v1/Systems/u1:1"), "/redfish/v1/Systems/u1:1");
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(RedisStore::row_key("Plugin", "GRF"), "Plugin:GRF");
        assert_eq!(RedisStore::index_key("UUID", "abc"), "index:UUID:abc");
        assert_eq!(RedisStore::reverse_key("/k"), "index-keys:/k");
    }
}
