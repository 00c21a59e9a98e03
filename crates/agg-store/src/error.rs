use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no data with the key {key} found in table {table}")]
    NotFound { table: String, key: String },
    #[error("duplicate key {key} in table {table}")]
    AlreadyExists { table: String, key: String },
    #[error("Unsupported store URL: {0}")]
    UnsupportedUrl(String),
}

impl StoreError {
    pub fn not_found(table: &str, key: &str) -> Self {
        StoreError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn already_exists(table: &str, key: &str) -> Self {
        StoreError::AlreadyExists {
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "database",
            StoreError::Redis(_) => "redis",
            StoreError::Serialization(_) => "serialization",
            StoreError::NotFound { .. } => "not_found",
            StoreError::AlreadyExists { .. } => "duplicate",
            StoreError::UnsupportedUrl(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
