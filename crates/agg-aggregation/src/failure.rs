use agg_core::{RpcResponse, StatusMessage};
use agg_store::StoreError;
use serde_json::{json, Value};
use std::fmt;

/// Classified failure carried between components until an orchestrator
/// turns it into an [`RpcResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub status_code: u16,
    pub status_message: StatusMessage,
    pub error_message: String,
    pub message_args: Vec<Value>,
}

impl Failure {
    pub fn new(status_code: u16, status_message: StatusMessage, error_message: impl Into<String>) -> Self {
        Self {
            status_code,
            status_message,
            error_message: error_message.into(),
            message_args: vec![],
        }
    }

    pub fn internal(error_message: impl Into<String>) -> Self {
        Self::new(500, StatusMessage::InternalError, error_message)
    }

    pub fn not_found(resource_type: &str, name: &str, error_message: impl Into<String>) -> Self {
        Self::new(404, StatusMessage::ResourceNotFound, error_message)
            .with_args(vec![json!(resource_type), json!(name)])
    }

    pub fn with_args(mut self, message_args: Vec<Value>) -> Self {
        self.message_args = message_args;
        self
    }

    /// Prefix the message with the caller's context
    pub fn context(mut self, prefix: &str) -> Self {
        self.error_message = format!("{}{}", prefix, self.error_message);
        self
    }

    pub fn into_response(self) -> RpcResponse {
        RpcResponse::error(
            self.status_code,
            self.status_message,
            self.error_message,
            self.message_args,
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.status_code, self.status_message, self.error_message)
    }
}

impl std::error::Error for Failure {}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { table, key } => {
                Failure::not_found(table, key, err.to_string())
            }
            _ => Failure::internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::internal(format!("error while trying to unmarshal response body: {}", err))
    }
}

impl From<agg_core::Error> for Failure {
    fn from(err: agg_core::Error) -> Self {
        let status_message = match &err {
            agg_core::Error::Connection(_) => StatusMessage::CouldNotEstablishConnection,
            agg_core::Error::Unauthorized(_) => StatusMessage::ResourceAtUriUnauthorized,
            agg_core::Error::NotFound(_) => StatusMessage::ResourceNotFound,
            agg_core::Error::Conflict(_) => StatusMessage::ResourceAlreadyExists,
            agg_core::Error::InvalidArgument(_) | agg_core::Error::Serialization(_) => {
                StatusMessage::PropertyValueFormatError
            }
            _ => StatusMessage::InternalError,
        };
        Failure::new(err.status_code(), status_message, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404() {
        let failure: Failure = StoreError::not_found("Plugin", "GRF").into();
        assert_eq!(failure.status_code, 404);
        assert_eq!(failure.message_args, vec![json!("Plugin"), json!("GRF")]);
    }

    #[test]
    fn test_context_and_response() {
        let resp = Failure::internal("boom")
            .context("error while trying to save data: ")
            .into_response();
        assert_eq!(resp.status_code, 500);
        assert!(resp.error_message().unwrap().contains("error while trying to save data: boom"));
    }

    #[test]
    fn test_decryption_failure_is_internal() {
        let failure: Failure = agg_core::Error::decryption_failed("bad tag").into();
        assert_eq!(failure.status_code, 500);
        assert_eq!(failure.status_message, StatusMessage::InternalError);
    }
}
