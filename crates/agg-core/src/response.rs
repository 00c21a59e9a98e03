//! Protocol-agnostic responses and Redfish-style error bodies
//!
//! Every orchestrator entry point returns an [`RpcResponse`]: an HTTP-style
//! status code, a [`StatusMessage`] and a JSON body. Error bodies follow the
//! `{"error": {"code", "message", "@Message.ExtendedInfo": [...]}}` layout.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

/// Helper message placed in the top-level `error.message` field
pub const ERROR_HELPER_MESSAGE: &str = "An error has occurred. See ExtendedInfo for more information.";

/// Message registry type of every extended-info entry
pub const ERROR_MESSAGE_ODATA_TYPE: &str = "#Message.v1_1_2.Message";

/// Message identifiers understood by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusMessage {
    Created,
    Success,
    GeneralError,
    InternalError,
    PropertyMissing,
    PropertyUnknown,
    ResourceNotFound,
    MalformedJson,
    PropertyValueNotInList,
    ResourceInUse,
    PropertyValueFormatError,
    PropertyValueTypeError,
    ResourceAtUriUnauthorized,
    CouldNotEstablishConnection,
    ActionNotSupported,
    ResourceAlreadyExists,
    ActionParameterNotSupported,
    ResourceCannotBeDeleted,
    PropertyValueConflict,
    ResourceRemoved,
    TaskStarted,
}

impl StatusMessage {
    /// Full registry message id, e.g. `Base.1.11.0.ResourceNotFound`
    pub fn message_id(&self) -> &'static str {
        match self {
            StatusMessage::Created => "Base.1.11.0.Created",
            StatusMessage::Success => "Base.1.11.0.Success",
            StatusMessage::GeneralError => "Base.1.11.0.GeneralError",
            StatusMessage::InternalError => "Base.1.11.0.InternalError",
            StatusMessage::PropertyMissing => "Base.1.11.0.PropertyMissing",
            StatusMessage::PropertyUnknown => "Base.1.11.0.PropertyUnknown",
            StatusMessage::ResourceNotFound => "Base.1.11.0.ResourceNotFound",
            StatusMessage::MalformedJson => "Base.1.11.0.MalformedJSON",
            StatusMessage::PropertyValueNotInList => "Base.1.11.0.PropertyValueNotInList",
            StatusMessage::ResourceInUse => "Base.1.11.0.ResourceInUse",
            StatusMessage::PropertyValueFormatError => "Base.1.11.0.PropertyValueFormatError",
            StatusMessage::PropertyValueTypeError => "Base.1.11.0.PropertyValueTypeError",
            StatusMessage::ResourceAtUriUnauthorized => "Base.1.11.0.ResourceAtUriUnauthorized",
            StatusMessage::CouldNotEstablishConnection => "Base.1.11.0.CouldNotEstablishConnection",
            StatusMessage::ActionNotSupported => "Base.1.11.0.ActionNotSupported",
            StatusMessage::ResourceAlreadyExists => "Base.1.11.0.ResourceAlreadyExists",
            StatusMessage::ActionParameterNotSupported => "Base.1.11.0.ActionParameterNotSupported",
            StatusMessage::ResourceCannotBeDeleted => "Base.1.11.0.ResourceCannotBeDeleted",
            StatusMessage::PropertyValueConflict => "Base.1.11.0.PropertyValueConflict",
            StatusMessage::ResourceRemoved => "ResourceEvent.1.0.3.ResourceRemoved",
            StatusMessage::TaskStarted => "TaskEvent.1.0.3.TaskStarted",
        }
    }

    /// Render the human-readable message, severity and resolution for one
    /// extended-info entry.
    fn render(&self, args: &[Value], err_msg: &str) -> (String, &'static str, &'static str) {
        let arg = |i: usize| args.get(i).map(display_arg).unwrap_or_default();
        match self {
            StatusMessage::Success | StatusMessage::Created => (
                "Successfully Completed Request".to_string(),
                "OK",
                "None",
            ),
            StatusMessage::ResourceRemoved => (
                "The resource has been removed successfully.".to_string(),
                "OK",
                "None",
            ),
            StatusMessage::TaskStarted => (
                format!("The task with id {} has started.", arg(0)),
                "OK",
                "None",
            ),
            StatusMessage::PropertyMissing => (
                format!("The property {} is a required property and must be included in the request. {}", arg(0), err_msg),
                "Warning",
                "Ensure that the property is in the request body and has a valid value and resubmit the request if the operation failed.",
            ),
            StatusMessage::PropertyUnknown => (
                format!("The property {} is an unknown property and must not be included in the request. {}", arg(0), err_msg),
                "Warning",
                "Ensure that the request body has valid properties with proper cases and resubmit the request.",
            ),
            StatusMessage::PropertyValueNotInList => (
                format!("The value {} for the property {} is not in the list of acceptable values. {}", arg(0), arg(1), err_msg),
                "Warning",
                "Choose a value from the enumeration list that the implementation can support and resubmit the request if the operation failed.",
            ),
            StatusMessage::PropertyValueTypeError => (
                format!("The value {} for the property {} is of a different type than the property can accept. {}", arg(0), arg(1), err_msg),
                "Warning",
                "Correct the value for the property in the request body and resubmit the request if the operation failed.",
            ),
            StatusMessage::PropertyValueFormatError => (
                format!("The value {} for the property {} is of a different format than the property can accept. {}", arg(0), arg(1), err_msg),
                "Warning",
                "Correct the value for the property in the request body and resubmit the request if the operation failed.",
            ),
            StatusMessage::MalformedJson => (
                format!("The request body submitted was malformed JSON and could not be parsed by the receiving service.{}", err_msg),
                "Critical",
                "Ensure that the request body is valid JSON and resubmit the request.",
            ),
            StatusMessage::ResourceNotFound => (
                format!("The requested resource of type {} named {} was not found. {}", arg(0), arg(1), err_msg),
                "Critical",
                "Provide a valid resource identifier and resubmit the request.",
            ),
            StatusMessage::ResourceInUse => (
                format!("The change to the requested resource failed because the resource is in use or in transition.{}", err_msg),
                "Warning",
                "Remove the condition and resubmit the request if the operation failed.",
            ),
            StatusMessage::ResourceAtUriUnauthorized => (
                format!("While accessing the resource at {}, the service received an authorization error. {}", arg(0), err_msg),
                "Critical",
                "Ensure that the appropriate access is provided for the service in order for it to access the URI.",
            ),
            StatusMessage::CouldNotEstablishConnection => (
                format!("The service failed to establish a connection with the URI {}. {}", arg(0), err_msg),
                "Critical",
                "Ensure that the URI contains a valid and reachable node name, protocol information and other URI components.",
            ),
            StatusMessage::ActionNotSupported => (
                format!("The action {} is not supported by the resource. {}", arg(0), err_msg),
                "Critical",
                "The action supplied cannot be resubmitted to the implementation. Perhaps the action was invalid, the wrong resource was the target or the implementation documentation may be of assistance.",
            ),
            StatusMessage::ResourceAlreadyExists => (
                format!("The requested resource of type {} with the property {} with the value {} already exists. {}", arg(0), arg(1), arg(2), err_msg),
                "Critical",
                "Do not repeat the create operation as the resource has already been created.",
            ),
            StatusMessage::ActionParameterNotSupported => (
                err_msg.to_string(),
                "Warning",
                "Modify the parameter supplied and resubmit the request if the operation failed.",
            ),
            StatusMessage::ResourceCannotBeDeleted => (
                format!("The delete request failed because the resource requested cannot be deleted.{}", err_msg),
                "Critical",
                "Do not attempt to delete a non-deletable resource.",
            ),
            StatusMessage::PropertyValueConflict => (
                format!("The property '{}' could not be written because its value would conflict with the value of the '{}' property, {}", arg(0), arg(1), err_msg),
                "Warning",
                "No resolution is required.",
            ),
            StatusMessage::InternalError | StatusMessage::GeneralError => (
                format!("The request failed due to an internal service error.  The service is still operational.{}", err_msg),
                "Critical",
                "Resubmit the request.  If the problem persists, consider resetting the service.",
            ),
        }
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message_id())
    }
}

fn display_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One entry of `@Message.ExtendedInfo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedInfo {
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Severity")]
    pub severity: String,
    #[serde(rename = "MessageArgs", default, skip_serializing_if = "Vec::is_empty")]
    pub message_args: Vec<Value>,
    #[serde(rename = "Resolution")]
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClass {
    pub code: String,
    pub message: String,
    #[serde(rename = "@Message.ExtendedInfo", default)]
    pub extended_info: Vec<ExtendedInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonError {
    pub error: ErrorClass,
}

/// Input for a single extended-info entry
#[derive(Debug, Clone)]
pub struct ErrorArgs {
    pub status_message: StatusMessage,
    pub error_message: String,
    pub message_args: Vec<Value>,
}

impl ErrorArgs {
    pub fn new(status_message: StatusMessage, error_message: impl Into<String>, message_args: Vec<Value>) -> Self {
        Self {
            status_message,
            error_message: error_message.into(),
            message_args,
        }
    }

    fn extended_info(&self) -> ExtendedInfo {
        let (message, severity, resolution) =
            self.status_message.render(&self.message_args, &self.error_message);
        ExtendedInfo {
            odata_type: ERROR_MESSAGE_ODATA_TYPE.to_string(),
            message_id: self.status_message.message_id().to_string(),
            message,
            severity: severity.to_string(),
            message_args: self.message_args.clone(),
            resolution: resolution.to_string(),
        }
    }
}

/// Build the generic error body for the given entries
pub fn error_body(entries: &[ErrorArgs]) -> CommonError {
    CommonError {
        error: ErrorClass {
            code: StatusMessage::GeneralError.message_id().to_string(),
            message: ERROR_HELPER_MESSAGE.to_string(),
            extended_info: entries.iter().map(ErrorArgs::extended_info).collect(),
        },
    }
}

/// Result of every orchestrator entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status_code: u16,
    pub status_message: StatusMessage,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl RpcResponse {
    pub fn new(status_code: u16, status_message: StatusMessage, body: Value) -> Self {
        Self {
            status_code,
            status_message,
            headers: HashMap::new(),
            body,
        }
    }

    /// 200 with a plain body
    pub fn ok(body: Value) -> Self {
        Self::new(200, StatusMessage::Success, body)
    }

    /// 204 after a removal
    pub fn removed() -> Self {
        Self::new(204, StatusMessage::ResourceRemoved, Value::Null)
    }

    /// Generic `{code, message}` body reporting a completed request
    pub fn completed(status_code: u16, status_message: StatusMessage) -> Self {
        let body = json!({
            "code": status_message.message_id(),
            "message": "Request completed successfully",
        });
        Self::new(status_code, status_message, body)
    }

    /// Error response with one extended-info entry
    pub fn error(
        status_code: u16,
        status_message: StatusMessage,
        error_message: impl Into<String>,
        message_args: Vec<Value>,
    ) -> Self {
        let args = ErrorArgs::new(status_message, error_message, message_args);
        let body = serde_json::to_value(error_body(&[args])).unwrap_or(Value::Null);
        Self::new(status_code, status_message, body)
    }

    /// 500 InternalError with no message arguments
    pub fn internal_error(error_message: impl Into<String>) -> Self {
        Self::error(500, StatusMessage::InternalError, error_message, vec![])
    }

    /// 404 ResourceNotFound for `(resource_type, name)`
    pub fn not_found(resource_type: &str, name: &str, error_message: impl Into<String>) -> Self {
        Self::error(
            404,
            StatusMessage::ResourceNotFound,
            error_message,
            vec![json!(resource_type), json!(name)],
        )
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// First extended-info message, if the body is an error body
    pub fn error_message(&self) -> Option<String> {
        self.body
            .pointer("/error/@Message.ExtendedInfo/0/Message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_not_found_body() {
        let resp = RpcResponse::not_found("Plugin", "GRF", "error while getting plugin");
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.body["error"]["code"], "Base.1.11.0.GeneralError");
        let info = &resp.body["error"]["@Message.ExtendedInfo"][0];
        assert_eq!(info["MessageId"], "Base.1.11.0.ResourceNotFound");
        assert_eq!(info["Severity"], "Critical");
        assert_eq!(
            info["Message"],
            "The requested resource of type Plugin named GRF was not found. error while getting plugin"
        );
    }

    #[test]
    fn test_already_exists_renders_three_args() {
        let resp = RpcResponse::error(
            409,
            StatusMessage::ResourceAlreadyExists,
            "",
            vec![json!("ComputerSystem"), json!("HostName"), json!("10.0.0.1")],
        );
        let msg = resp.error_message().unwrap();
        assert!(msg.contains("of type ComputerSystem with the property HostName with the value 10.0.0.1"));
    }

    #[test]
    fn test_message_ids() {
        assert_eq!(StatusMessage::MalformedJson.message_id(), "Base.1.11.0.MalformedJSON");
        assert_eq!(StatusMessage::ResourceRemoved.to_string(), "ResourceEvent.1.0.3.ResourceRemoved");
    }

    #[test]
    fn test_headers_and_success() {
        let resp = RpcResponse::ok(json!({})).with_header("Location", "/redfish/v1/x");
        assert!(resp.is_success());
        assert_eq!(resp.headers.get("Location").map(String::as_str), Some("/redfish/v1/x"));
        assert!(!RpcResponse::internal_error("x").is_success());
    }
}
