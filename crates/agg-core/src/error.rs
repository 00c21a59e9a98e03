//! Error types for the aggregation service

use thiserror::Error;

/// Main error type for aggregation operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn decryption_failed(msg: impl Into<String>) -> Self {
        Error::DecryptionFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// HTTP-style status code this error maps to when surfaced to a caller
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Connection(_) => 503,
            Error::Unauthorized(_) => 401,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::InvalidArgument(_) | Error::Serialization(_) => 400,
            Error::Timeout(_) => 504,
            Error::Cancelled(_) => 200,
            Error::DecryptionFailed(_) | Error::Io(_) | Error::Internal(_) => 500,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::conflict("x").status_code(), 409);
        assert_eq!(Error::connection("x").status_code(), 503);
        assert_eq!(Error::decryption_failed("x").status_code(), 500);
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert!(matches!(err, Error::Internal(ref m) if m == "boom"));
    }
}
