//! Request body decoding
//!
//! Property names are matched case-sensitively against the shape each
//! entry point accepts, so `hostname` is reported as unknown rather than
//! silently ignored.

use crate::failure::Failure;
use agg_core::StatusMessage;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// One accepted property and, for objects, the properties nested under it
#[derive(Debug, Clone, Copy)]
pub struct Property {
    pub name: &'static str,
    pub children: &'static [Property],
}

pub const fn leaf(name: &'static str) -> Property {
    Property { name, children: &[] }
}

pub const fn node(name: &'static str, children: &'static [Property]) -> Property {
    Property { name, children }
}

pub const ODATA_LINK: &[Property] = &[leaf("@odata.id")];

/// Names of properties in `body` not present in `allowed`
pub fn unknown_properties(body: &Value, allowed: &[Property]) -> Vec<String> {
    let mut unknown = Vec::new();
    collect_unknown(body, allowed, &mut unknown);
    unknown
}

fn collect_unknown(value: &Value, allowed: &[Property], unknown: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                match allowed.iter().find(|p| p.name == name) {
                    Some(property) if !property.children.is_empty() => {
                        collect_unknown(child, property.children, unknown)
                    }
                    Some(_) => {}
                    None => unknown.push(name.clone()),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_unknown(item, allowed, unknown);
            }
        }
        _ => {}
    }
}

/// Parse `raw` into `T`, rejecting malformed JSON and unknown properties.
/// Returns the typed request and the raw document.
pub fn decode<T: DeserializeOwned>(raw: &[u8], allowed: &[Property]) -> Result<(T, Value), Failure> {
    let document: Value = serde_json::from_slice(raw).map_err(|e| {
        Failure::new(
            400,
            StatusMessage::MalformedJson,
            format!("Unable to validate request fields: {}", e),
        )
    })?;
    let unknown = unknown_properties(&document, allowed);
    if !unknown.is_empty() {
        return Err(Failure::new(
            400,
            StatusMessage::PropertyUnknown,
            "One or more properties given in the request body are not valid, ensure properties are listed in uppercamelcase ",
        )
        .with_args(vec![json!(unknown.join(", "))]));
    }
    let request = serde_json::from_value(document.clone()).map_err(|e| {
        Failure::new(
            400,
            StatusMessage::MalformedJson,
            format!("Unable to validate request fields: {}", e),
        )
    })?;
    Ok((request, document))
}

pub fn property_missing(name: &str, error_message: impl Into<String>) -> Failure {
    Failure::new(400, StatusMessage::PropertyMissing, error_message).with_args(vec![json!(name)])
}

/// True when the body is absent or an empty object
pub fn is_empty_request(document: &Value) -> bool {
    document.as_object().map(|m| m.is_empty()).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const SCHEMA: &[Property] = &[
        leaf("HostName"),
        node("Links", &[node("ConnectionMethod", ODATA_LINK)]),
    ];

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Request {
        host_name: String,
    }

    #[test]
    fn test_unknown_properties_are_case_sensitive_and_nested() {
        let body = json!({
            "hostname": "x",
            "Links": {"ConnectionMethod": {"@odata.id": "/a", "Extra": 1}}
        });
        let mut unknown = unknown_properties(&body, SCHEMA);
        unknown.sort();
        assert_eq!(unknown, vec!["Extra", "hostname"]);
    }

    #[test]
    fn test_decode() {
        let (req, _) = decode::<Request>(br#"{"HostName":"10.0.0.1"}"#, SCHEMA).unwrap();
        assert_eq!(req.host_name, "10.0.0.1");

        let err = decode::<Request>(b"{not json", SCHEMA).err().unwrap();
        assert_eq!(err.status_message, StatusMessage::MalformedJson);

        let err = decode::<Request>(br#"{"HostName":"a","Port":1}"#, SCHEMA).err().unwrap();
        assert_eq!(err.status_code, 400);
        assert_eq!(err.message_args, vec![json!("Port")]);
    }

    #[test]
    fn test_is_empty_request() {
        assert!(is_empty_request(&json!({})));
        assert!(is_empty_request(&Value::Null));
        assert!(!is_empty_request(&json!({"a": 1})));
    }
}
