use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Table/key/value store with a secondary search index.
///
/// Values are opaque JSON text. Index fields are matched case-insensitively;
/// array values are indexed once per element.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend label used in logs and metrics
    fn store_type(&self) -> &'static str;

    /// Insert a new row; fails with `AlreadyExists` when the key is taken
    async fn create(&self, table: &str, key: &str, value: &str) -> Result<()>;

    /// Insert or overwrite
    async fn upsert(&self, table: &str, key: &str, value: &str) -> Result<()>;

    async fn read(&self, table: &str, key: &str) -> Result<String>;

    /// Overwrite an existing row; fails with `NotFound` when absent
    async fn update(&self, table: &str, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, table: &str, key: &str) -> Result<()>;

    async fn get_all_keys(&self, table: &str) -> Result<Vec<String>>;

    /// Keys of `table` containing `pattern`
    async fn get_all_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>>;

    /// `(table, key)` pairs across every table whose key contains `pattern`
    async fn scan_all(&self, pattern: &str) -> Result<Vec<(String, String)>>;

    async fn create_index(&self, fields: &Map<String, Value>, key: &str) -> Result<()>;

    /// Replace every index entry of `key` with `fields`
    async fn update_index(&self, fields: &Map<String, Value>, key: &str) -> Result<()> {
        self.delete_index(key).await?;
        self.create_index(fields, key).await
    }

    /// Keys whose `field` holds `value`
    async fn get_index(&self, field: &str, value: &str) -> Result<Vec<String>>;

    async fn delete_index(&self, key: &str) -> Result<()>;
}

/// Normalized index terms for one field value
pub fn index_terms(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.to_lowercase()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items.iter().flat_map(index_terms).collect(),
        Value::Null | Value::Object(_) => vec![],
    }
}

pub async fn read_json<T: DeserializeOwned>(store: &dyn KvStore, table: &str, key: &str) -> Result<T> {
    let raw = store.read(table, key).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn create_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    table: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.create(table, key, &raw).await
}

pub async fn update_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    table: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.update(table, key, &raw).await
}

pub async fn upsert_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    table: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.upsert(table, key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_terms() {
        assert_eq!(index_terms(&json!("On")), vec!["on"]);
        assert_eq!(index_terms(&json!(2)), vec!["2"]);
        assert_eq!(index_terms(&json!([1.2, "SSD"])), vec!["1.2", "ssd"]);
        assert!(index_terms(&json!(null)).is_empty());
    }
}
