//! Persisted data model shared by the stores and the orchestrators

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table names used in the durable and volatile stores
pub mod tables {
    pub const PLUGIN: &str = "Plugin";
    pub const SYSTEM: &str = "System";
    pub const AGGREGATION_SOURCE: &str = "AggregationSource";
    pub const CONNECTION_METHOD: &str = "ConnectionMethod";
    pub const AGGREGATE: &str = "Aggregate";
    pub const ACTIVE_ADD_BMC_REQUEST: &str = "ActiveAddBMCRequest";
    pub const SYSTEM_OPERATION: &str = "SystemOperation";
    pub const SYSTEM_RESET: &str = "SystemReset";
    pub const COMPUTER_SYSTEM: &str = "ComputerSystem";
    pub const CHASSIS: &str = "Chassis";
    pub const MANAGERS: &str = "Managers";
    pub const FIRMWARE_INVENTORY: &str = "FirmwareInventory";
    pub const SOFTWARE_INVENTORY: &str = "SoftwareInventory";
    pub const REGISTRIES: &str = "Registries";
    pub const LOG_SERVICES_COLLECTION: &str = "LogServicesCollection";
    pub const LOG_SERVICE: &str = "LogServices";
    pub const ENTRIES_COLLECTION: &str = "EntriesCollection";
}

/// Well-known URI prefixes
pub mod uris {
    pub const SYSTEMS: &str = "/redfish/v1/Systems";
    pub const CHASSIS: &str = "/redfish/v1/Chassis";
    pub const MANAGERS: &str = "/redfish/v1/Managers";
    pub const REGISTRIES: &str = "/redfish/v1/Registries";
    pub const FIRMWARE_INVENTORY: &str = "/redfish/v1/UpdateService/FirmwareInventory";
    pub const SOFTWARE_INVENTORY: &str = "/redfish/v1/UpdateService/SoftwareInventory";
    pub const LICENSES: &str = "/redfish/v1/LicenseService/Licenses/";
    pub const TELEMETRY_SERVICE: &str = "/redfish/v1/TelemetryService";
    pub const AGGREGATION_SOURCES: &str = "/redfish/v1/AggregationService/AggregationSources";
    pub const AGGREGATES: &str = "/redfish/v1/AggregationService/Aggregates";
    pub const CONNECTION_METHODS: &str = "/redfish/v1/AggregationService/ConnectionMethods";
}

/// Base64 encoding for byte fields, matching how ciphertexts travel in JSON
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Authentication mode a plugin prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    BasicAuth,
    XAuthToken,
}

impl AuthType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BasicAuth" => Some(AuthType::BasicAuth),
            "XAuthToken" => Some(AuthType::XAuthToken),
            _ => None,
        }
    }
}

/// A southbound adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Plugin {
    #[serde(rename = "IP")]
    pub ip: String,
    pub port: String,
    pub username: String,
    #[serde(with = "base64_bytes")]
    pub password: Vec<u8>,
    #[serde(rename = "ID")]
    pub id: String,
    pub plugin_type: String,
    pub preferred_auth_type: AuthType,
    #[serde(rename = "ManagerUUID", default)]
    pub manager_uuid: String,
}

impl Plugin {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// One onboarded managed endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Target {
    pub manager_address: String,
    #[serde(with = "base64_bytes")]
    pub password: Vec<u8>,
    pub user_name: String,
    #[serde(rename = "DeviceUUID")]
    pub device_uuid: String,
    #[serde(rename = "PluginID")]
    pub plugin_id: String,
}

/// `{"@odata.id": "..."}` link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OdataId {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
}

impl OdataId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { odata_id: id.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionMethodLinks {
    #[serde(default)]
    pub aggregation_sources: Vec<OdataId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionMethod {
    pub connection_method_type: String,
    pub connection_method_variant: String,
    #[serde(default)]
    pub links: ConnectionMethodLinks,
}

/// Parsed `type:authMode:pluginId_firmwareVersion` variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMethodVariant {
    pub plugin_type: String,
    pub preferred_auth_type: String,
    pub plugin_id: String,
    pub firmware_version: String,
}

impl ConnectionMethodVariant {
    pub fn parse(variant: &str) -> Option<Self> {
        let mut parts = variant.split(':');
        let plugin_type = parts.next()?;
        let preferred_auth_type = parts.next()?;
        let rest = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let (plugin_id, firmware_version) = rest.split_once('_')?;
        Some(Self {
            plugin_type: plugin_type.to_string(),
            preferred_auth_type: preferred_auth_type.to_string(),
            plugin_id: plugin_id.to_string(),
            firmware_version: firmware_version.to_string(),
        })
    }
}

/// Persisted caller-supplied source of an onboarded endpoint or plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregationSource {
    pub host_name: String,
    pub user_name: String,
    #[serde(with = "base64_bytes")]
    pub password: Vec<u8>,
    #[serde(default)]
    pub links: Value,
}

impl AggregationSource {
    /// `@odata.id` of the referenced ConnectionMethod
    pub fn connection_method_link(&self) -> Option<&str> {
        self.links
            .pointer("/ConnectionMethod/@odata.id")
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Aggregate {
    pub elements: Vec<OdataId>,
}

/// Long-running per-system operation marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemOperation {
    pub operation: String,
}

pub const OPERATION_DELETE: &str = "Delete";
pub const OPERATION_INVENTORY_REDISCOVERY: &str = "InventoryRediscovery";

/// Split a `<uuid>:<systemID>` key or URI segment
pub fn split_system_id(element: &str) -> Option<(&str, &str)> {
    let last = element.trim_end_matches('/').rsplit('/').next()?;
    let (uuid, id) = last.split_once(':')?;
    if uuid.is_empty() || id.is_empty() {
        return None;
    }
    Some((uuid, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variant_parse() {
        let v = ConnectionMethodVariant::parse("Compute:BasicAuth:GRF_v1.0.0").unwrap();
        assert_eq!(v.plugin_type, "Compute");
        assert_eq!(v.preferred_auth_type, "BasicAuth");
        assert_eq!(v.plugin_id, "GRF");
        assert_eq!(v.firmware_version, "v1.0.0");
        assert!(ConnectionMethodVariant::parse("Compute:BasicAuth").is_none());
        assert!(ConnectionMethodVariant::parse("Compute:BasicAuth:GRF").is_none());
    }

    #[test]
    fn test_plugin_serde_uses_pascal_case_and_base64() {
        let plugin = Plugin {
            ip: "10.0.0.2".into(),
            port: "45001".into(),
            username: "admin".into(),
            password: vec![1, 2, 3],
            id: "GRF".into(),
            plugin_type: "Compute".into(),
            preferred_auth_type: AuthType::BasicAuth,
            manager_uuid: "m-1".into(),
        };
        let value = serde_json::to_value(&plugin).unwrap();
        assert_eq!(value["IP"], "10.0.0.2");
        assert_eq!(value["Password"], "AQID");
        assert_eq!(value["ManagerUUID"], "m-1");
        let back: Plugin = serde_json::from_value(value).unwrap();
        assert_eq!(back, plugin);
    }

    #[test]
    fn test_split_system_id() {
        assert_eq!(
            split_system_id("/redfish/v1/Systems/abc-1:1"),
            Some(("abc-1", "1"))
        );
        assert_eq!(split_system_id("/redfish/v1/Systems/1"), None);
    }

    #[test]
    fn test_aggregation_source_cm_link() {
        let src = AggregationSource {
            host_name: "10.0.0.1".into(),
            user_name: "admin".into(),
            password: vec![],
            links: json!({"ConnectionMethod": {"@odata.id": "/redfish/v1/AggregationService/ConnectionMethods/c1"}}),
        };
        assert_eq!(
            src.connection_method_link(),
            Some("/redfish/v1/AggregationService/ConnectionMethods/c1")
        );
    }
}
