//! Link extraction and filtering

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Every `@odata.id` reachable in `value`, mapped to whether each of its
/// occurrences sits under an `Oem` node. Trailing `/` is trimmed.
pub fn collect_links(value: &Value, under_oem: bool) -> BTreeMap<String, bool> {
    let mut links = BTreeMap::new();
    visit(value, under_oem, &mut links);
    links
}

fn visit(value: &Value, under_oem: bool, links: &mut BTreeMap<String, bool>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(link) if key == "@odata.id" => {
                        let link = link.strip_suffix('/').unwrap_or(link);
                        links
                            .entry(link.to_string())
                            .and_modify(|oem| *oem = *oem && under_oem)
                            .or_insert(under_oem);
                    }
                    Value::Object(_) | Value::Array(_) => {
                        visit(child, under_oem || key.eq_ignore_ascii_case("Oem"), links);
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    visit(item, under_oem, links);
                }
            }
        }
        _ => {}
    }
}

fn is_parent(link: &str, parent: &str) -> bool {
    link.eq_ignore_ascii_case(parent) || link.eq_ignore_ascii_case(&format!("{}/", parent))
}

/// Links to follow from a root-level resource: drops visited links, the
/// parent itself and anything naming an entry of `skip_list`.
pub fn filter_root_links(
    links: BTreeMap<String, bool>,
    parent: &str,
    skip_list: &[String],
    visited: &HashSet<String>,
) -> BTreeMap<String, bool> {
    links
        .into_iter()
        .filter(|(link, _)| {
            !visited.contains(link)
                && !is_parent(link, parent)
                && !skip_list.iter().any(|skip| link.contains(skip.as_str()))
        })
        .collect()
}

/// Whether a nested link should be fetched: never twice, never the parent,
/// and never below a parent that names an entry of `skip_under_others`.
pub fn should_retrieve(link: &str, parent: &str, visited: &HashSet<String>, skip_under_others: &[String]) -> bool {
    !visited.contains(link)
        && !is_parent(link, parent)
        && !skip_under_others
            .iter()
            .any(|skip| parent.contains(skip.as_str()))
}

/// `@odata.id` of every entry of a collection's `Members`
pub fn members(collection: &Value) -> Vec<String> {
    collection
        .get("Members")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get("@odata.id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_links_flags_oem() {
        let doc = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "Bios": {"@odata.id": "/redfish/v1/Systems/1/Bios/"},
            "Oem": {"Vendor": {"Extra": {"@odata.id": "/redfish/v1/Systems/1/Oem/Extra"}}},
            "Links": {"Chassis": [{"@odata.id": "/redfish/v1/Chassis/1"}]}
        });
        let links = collect_links(&doc, false);
        assert_eq!(links.get("/redfish/v1/Systems/1/Bios"), Some(&false));
        assert_eq!(links.get("/redfish/v1/Systems/1/Oem/Extra"), Some(&true));
        assert_eq!(links.get("/redfish/v1/Chassis/1"), Some(&false));
        assert_eq!(links.get("/redfish/v1/Systems/1"), Some(&false));
    }

    #[test]
    fn test_link_seen_outside_oem_is_not_oem() {
        let doc = json!({
            "Oem": {"X": {"@odata.id": "/a"}},
            "Y": {"@odata.id": "/a"}
        });
        assert_eq!(collect_links(&doc, false).get("/a"), Some(&false));
    }

    #[test]
    fn test_filter_root_links() {
        let doc = json!({
            "@odata.id": "/redfish/v1/Systems/1",
            "Bios": {"@odata.id": "/redfish/v1/Systems/1/Bios"},
            "LogServices": {"@odata.id": "/redfish/v1/Systems/1/LogServices"},
            "Memory": {"@odata.id": "/redfish/v1/Systems/1/Memory"}
        });
        let visited = HashSet::from(["/redfish/v1/Systems/1/Memory".to_string()]);
        let skip = vec!["LogServices".to_string()];
        let kept = filter_root_links(collect_links(&doc, false), "/redfish/v1/Systems/1", &skip, &visited);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["/redfish/v1/Systems/1/Bios"]);
    }

    #[test]
    fn test_should_retrieve() {
        let visited = HashSet::new();
        let skip = vec!["Power".to_string()];
        assert!(should_retrieve("/c/1/Sensors", "/c/1", &visited, &skip));
        assert!(!should_retrieve("/c/1", "/c/1", &visited, &skip));
        assert!(!should_retrieve("/c/1/Power/0", "/c/1/Power", &visited, &skip));
    }

    #[test]
    fn test_members() {
        let coll = json!({"Members": [{"@odata.id": "/a"}, {"x": 1}, {"@odata.id": "/b"}]});
        assert_eq!(members(&coll), vec!["/a", "/b"]);
        assert!(members(&json!({})).is_empty());
    }
}
