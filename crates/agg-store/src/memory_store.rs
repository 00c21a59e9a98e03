//! Volatile in-process store
//!
//! Backs the discovered-resource store when no Redis is configured and
//! serves as the collaborator in tests.

use crate::error::{Result, StoreError};
use crate::kv_store::{index_terms, KvStore};
use crate::metrics::OperationTimer;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<String, String>>>,
    /// field -> term -> keys
    index: RwLock<HashMap<String, BTreeMap<String, Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("create", self.store_type());
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(key) {
            return Err(StoreError::already_exists(table, key));
        }
        rows.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn upsert(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("upsert", self.store_type());
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn read(&self, table: &str, key: &str) -> Result<String> {
        let _timer = OperationTimer::new("read", self.store_type());
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn update(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let _timer = OperationTimer::new("update", self.store_type());
        let mut tables = self.tables.write().await;
        match tables.get_mut(table).and_then(|rows| rows.get_mut(key)) {
            Some(slot) => {
                *slot = value.to_string();
                Ok(())
            }
            None => Err(StoreError::not_found(table, key)),
        }
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let _timer = OperationTimer::new("delete", self.store_type());
        let mut tables = self.tables.write().await;
        tables
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn get_all_keys(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_all_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .map(|rows| {
                rows.keys()
                    .filter(|k| k.contains(pattern))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let tables = self.tables.read().await;
        let mut found = Vec::new();
        for (table, rows) in tables.iter() {
            for key in rows.keys().filter(|k| k.contains(pattern)) {
                found.push((table.clone(), key.clone()));
            }
        }
        Ok(found)
    }

    async fn create_index(&self, fields: &Map<String, Value>, key: &str) -> Result<()> {
        let mut index = self.index.write().await;
        for (field, value) in fields {
            let terms = index.entry(field.clone()).or_default();
            for term in index_terms(value) {
                let keys = terms.entry(term).or_default();
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(())
    }

    async fn get_index(&self, field: &str, value: &str) -> Result<Vec<String>> {
        Ok(self
            .index
            .read()
            .await
            .get(field)
            .and_then(|terms| terms.get(&value.to_lowercase()))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_index(&self, key: &str) -> Result<()> {
        let mut index = self.index.write().await;
        for terms in index.values_mut() {
            for keys in terms.values_mut() {
                keys.retain(|k| k != key);
            }
            terms.retain(|_, keys| !keys.is_empty());
        }
        Ok(())
    }
}
