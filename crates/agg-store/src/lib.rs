//! Aggregation Store - key-value persistence and search index
//!
//! Two logical stores back the service:
//!
//! - the durable store (plugins, targets, aggregation sources, connection
//!   methods, aggregates), SQLite or Redis
//! - the volatile store (discovered resources, search index, admission and
//!   system-operation markers), Redis or in-process memory
//!
//! Both implement [`KvStore`].

pub mod error;
pub mod kv_store;
pub mod memory_store;
pub mod metrics;
pub mod redis_store;
pub mod sqlite_store;

pub use error::{Result, StoreError};
pub use kv_store::{create_json, read_json, update_json, upsert_json, KvStore};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use sqlite_store::SqliteStore;

use std::sync::Arc;
use tracing::info;

/// Which logical store a table lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    OnDisk,
    InMemory,
}

/// The pair of stores handed to the orchestrators
#[derive(Clone)]
pub struct Stores {
    pub on_disk: Arc<dyn KvStore>,
    pub in_memory: Arc<dyn KvStore>,
}

impl Stores {
    pub fn new(on_disk: Arc<dyn KvStore>, in_memory: Arc<dyn KvStore>) -> Self {
        Self { on_disk, in_memory }
    }

    /// Two independent in-process stores
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn get(&self, db: DbType) -> &Arc<dyn KvStore> {
        match db {
            DbType::OnDisk => &self.on_disk,
            DbType::InMemory => &self.in_memory,
        }
    }

    /// Connect both stores from their URLs
    pub async fn connect(on_disk_url: &str, in_memory_url: &str) -> Result<Self> {
        Ok(Self::new(connect(on_disk_url).await?, connect(in_memory_url).await?))
    }
}

/// Open a store by URL scheme: `sqlite:`, `redis://`/`rediss://` or `memory://`
pub async fn connect(url: &str) -> Result<Arc<dyn KvStore>> {
    metrics::register_metrics();
    if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteStore::new(url).await?))
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Arc::new(RedisStore::new(url).await?))
    } else if url.starts_with("memory://") {
        info!("Using in-process memory store");
        Ok(Arc::new(MemoryStore::new()))
    } else {
        Err(StoreError::UnsupportedUrl(url.to_string()))
    }
}
