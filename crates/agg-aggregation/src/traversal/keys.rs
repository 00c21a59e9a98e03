//! Device-namespaced resource keys

/// Path elements whose following segment is prefixed with the device UUID
const NAMESPACED_ELEMENTS: &[&str] = &[
    "Systems",
    "Chassis",
    "Managers",
    "FirmwareInventory",
    "SoftwareInventory",
];

/// Body prefixes rewritten to their namespaced form before persisting
const REWRITTEN_PREFIXES: &[&str] = &[
    "/redfish/v1/Systems/",
    "/redfish/v1/systems/",
    "/redfish/v1/Managers/",
    "/redfish/v1/Chassis/",
    "/redfish/v1/UpdateService/FirmwareInventory/",
    "/redfish/v1/UpdateService/SoftwareInventory/",
];

/// Persisted key of a plugin resource path: every segment following one of
/// the namespaced elements becomes `<device_uuid>:<segment>`.
pub fn key_formation(oid: &str, device_uuid: &str) -> String {
    let oid = oid.strip_suffix('/').unwrap_or(oid);
    let prefix = format!("{}:", device_uuid);
    let segments: Vec<&str> = oid.split('/').collect();
    let mut key = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let follows_element = i > 0
            && NAMESPACED_ELEMENTS
                .iter()
                .any(|e| e.eq_ignore_ascii_case(segments[i - 1]));
        if follows_element && !segment.is_empty() && !segment.starts_with(&prefix) {
            key.push(format!("{}{}", prefix, segment));
        } else {
            key.push(segment.to_string());
        }
    }
    key.join("/")
}

/// Rewrite every well-known resource link inside a document body
pub fn rewrite_with_uuid(body: &str, device_uuid: &str) -> String {
    REWRITTEN_PREFIXES.iter().fold(body.to_string(), |acc, prefix| {
        acc.replace(prefix, &format!("{}{}:", prefix, device_uuid))
    })
}

/// Table a resource is stored in: `<last>Collection` for collections,
/// otherwise the resource type inferred from the path.
pub fn resource_name(oid: &str, is_collection: bool) -> String {
    let parts: Vec<&str> = oid.trim_end_matches('/').split('/').collect();
    let last = parts.last().copied().unwrap_or_default();
    if is_collection {
        return format!("{}Collection", last);
    }
    match parts.len().checked_sub(2).map(|i| parts[i]) {
        Some(parent) if parent.parse::<i64>().is_ok() => last.to_string(),
        Some(parent) if !parent.is_empty() => parent.to_string(),
        _ => last.to_string(),
    }
}

/// Manager key sharing the device and resource id of a system key
pub fn manager_key_for_system(system_key: &str) -> String {
    system_key.replace("Systems", "Managers")
}

/// Device UUID prefix of a namespaced key, e.g. `u1` of `/redfish/v1/Systems/u1:1`
pub fn device_uuid_of(key: &str) -> Option<&str> {
    agg_core::split_system_id(key).map(|(uuid, _)| uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formation_namespaces_known_elements() {
        assert_eq!(
            key_formation("/redfish/v1/Systems/1/Storage/1", "u1"),
            "/redfish/v1/Systems/u1:1/Storage/1"
        );
        assert_eq!(
            key_formation("/redfish/v1/UpdateService/FirmwareInventory/BMC/", "u1"),
            "/redfish/v1/UpdateService/FirmwareInventory/u1:BMC"
        );
        assert_eq!(key_formation("/redfish/v1/systems/7", "u1"), "/redfish/v1/systems/u1:7");
        assert_eq!(key_formation("/redfish/v1/Systems", "u1"), "/redfish/v1/Systems");
    }

    #[test]
    fn test_key_formation_is_idempotent() {
        let once = key_formation("/redfish/v1/Chassis/1", "u1");
        assert_eq!(key_formation(&once, "u1"), once);
    }

    #[test]
    fn test_same_path_different_devices_never_collide() {
        let path = "/redfish/v1/Managers/1/EthernetInterfaces/1";
        assert_ne!(key_formation(path, "u1"), key_formation(path, "u2"));
    }

    #[test]
    fn test_rewrite_with_uuid() {
        let body = r#"{"@odata.id":"/redfish/v1/Systems/1","Links":{"Chassis":[{"@odata.id":"/redfish/v1/Chassis/1"}]}}"#;
        let rewritten = rewrite_with_uuid(body, "u1");
        assert!(rewritten.contains("/redfish/v1/Systems/u1:1"));
        assert!(rewritten.contains("/redfish/v1/Chassis/u1:1"));
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name("/redfish/v1/Systems/1/Storage", true), "StorageCollection");
        assert_eq!(resource_name("/redfish/v1/Systems/1/Bios", false), "Bios");
        assert_eq!(resource_name("/redfish/v1/Systems/1/Storage/1", false), "Storage");
        assert_eq!(resource_name("/redfish/v1/Chassis/1", false), "Chassis");
    }

    #[test]
    fn test_manager_key_for_system() {
        assert_eq!(
            manager_key_for_system("/redfish/v1/Systems/u1:1"),
            "/redfish/v1/Managers/u1:1"
        );
        assert_eq!(device_uuid_of("/redfish/v1/Systems/u1:1"), Some("u1"));
    }
}
