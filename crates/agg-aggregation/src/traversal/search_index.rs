//! Search index projection of a ComputerSystem

use super::keys::manager_key_for_system;
use agg_core::tables;
use agg_store::KvStore;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Read a persisted resource by key, whatever table holds it
pub async fn find_resource(store: &dyn KvStore, key: &str) -> Option<Value> {
    let key = key.trim_end_matches('/');
    let candidates = store.scan_all(key).await.ok()?;
    for (table, found) in candidates {
        if found == key {
            if let Ok(raw) = store.read(&table, &found).await {
                return serde_json::from_str(&raw).ok();
            }
        }
    }
    None
}

async fn firmware_version(store: &dyn KvStore, system_key: &str) -> Option<String> {
    let raw = store
        .read(tables::MANAGERS, &manager_key_for_system(system_key))
        .await
        .map_err(|e| debug!("error while getting the managers data: {}", e))
        .ok()?;
    let manager: Value = serde_json::from_str(&raw).ok()?;
    manager
        .get("FirmwareVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Build the index fields of a persisted system. `system` is the
/// namespaced document; storage drives are read back from the store.
pub async fn build_search_index(store: &dyn KvStore, system: &Value, key: &str) -> Map<String, Value> {
    let mut form = Map::new();
    let is_storage = key.contains("/Storage");

    if let Some(memory) = system.get("MemorySummary") {
        if let Some(total) = memory.get("TotalSystemMemoryGiB").filter(|v| v.is_number()) {
            form.insert("MemorySummary/TotalSystemMemoryGiB".into(), total.clone());
        }
        if let Some(persistent) = memory
            .get("TotalSystemPersistentMemoryGiB")
            .filter(|v| v.is_number())
        {
            form.insert("MemorySummary/TotalSystemPersistentMemoryGiB".into(), persistent.clone());
        }
    }
    if let Some(system_type) = system.get("SystemType").filter(|v| v.is_string()) {
        form.insert("SystemType".into(), system_type.clone());
    }
    if let Some(processors) = system.get("ProcessorSummary") {
        if let Some(count) = processors.get("Count").filter(|v| v.is_number()) {
            form.insert("ProcessorSummary/Count".into(), count.clone());
            form.insert("ProcessorSummary/sockets".into(), count.clone());
        }
        if let Some(model) = processors.get("Model").filter(|v| v.is_string()) {
            form.insert("ProcessorSummary/Model".into(), model.clone());
        }
    }
    if let Some(power) = system.get("PowerState").filter(|v| v.is_string()) {
        form.insert("PowerState".into(), power.clone());
    }

    if !is_storage {
        if let Some(version) = firmware_version(store, key).await {
            form.insert("FirmwareVersion".into(), json!(version));
        }
    }

    let storage_collection = if is_storage {
        Some(key.to_string())
    } else {
        system
            .pointer("/Storage/@odata.id")
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    if let Some(collection_key) = storage_collection {
        if let Some(collection) = find_resource(store, &collection_key).await {
            for storage_id in super::links::members(&collection) {
                let Some(storage) = find_resource(store, &storage_id).await else {
                    continue;
                };
                let Some(drives) = storage.get("Drives").and_then(Value::as_array) else {
                    continue;
                };
                let mut capacity = Vec::new();
                let mut types = Vec::new();
                for drive in drives {
                    let Some(drive_id) = drive.get("@odata.id").and_then(Value::as_str) else {
                        continue;
                    };
                    if let Some(drive) = find_resource(store, drive_id).await {
                        if let Some(bytes) = drive.get("CapacityBytes").and_then(Value::as_f64) {
                            capacity.push(json!(bytes / 1_000_000_000.0));
                        }
                        if let Some(media) = drive.get("MediaType").and_then(Value::as_str) {
                            types.push(json!(media));
                        }
                    }
                }
                form.insert("Storage/Drives/Quantity".into(), json!(drives.len()));
                form.insert("Storage/Drives/Capacity".into(), Value::Array(capacity));
                form.insert("Storage/Drives/Type".into(), Value::Array(types));
            }
        }
    }
    form
}
