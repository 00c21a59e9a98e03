//! Inventory rediscovery of onboarded devices
//!
//! A rediscovery refreshes one system (or its storage collection) in place:
//! subordinate volatile records of the device are dropped first, then the
//! system, chassis and managers roots are traversed again with upserts.
//! [`Aggregator::rediscover_resources`] runs it for every device whose core
//! records went missing, typically at service start.

use crate::aggregator::Aggregator;
use crate::client::Method;
use crate::contact::ContactRequest;
use crate::events::EventType;
use crate::failure::Failure;
use crate::traversal::links::members;
use crate::traversal::{key_formation, Progress, TraversalContext};
use agg_core::{
    tables, uris, RpcResponse, StatusMessage, SystemOperation, Target, OPERATION_DELETE, OPERATION_INVENTORY_REDISCOVERY,
};
use agg_store::upsert_json;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

const SYSTEMS_WEIGHT: u32 = 75;
const CHASSIS_WEIGHT: u32 = 15;
const MANAGERS_WEIGHT: u32 = 15;

/// Tables whose device records survive the pre-rediscovery cleanup
const PRESERVED_TABLES: &[&str] = &[
    tables::COMPUTER_SYSTEM,
    tables::SYSTEM_RESET,
    tables::SYSTEM_OPERATION,
    tables::CHASSIS,
    tables::MANAGERS,
    tables::FIRMWARE_INVENTORY,
    tables::SOFTWARE_INVENTORY,
];

/// Plugin-side path of a system URL that may carry the device namespace
fn plugin_path(system_url: &str, device_uuid: &str) -> String {
    system_url
        .trim_end_matches('/')
        .replace(&format!("/{}:", device_uuid), "/")
}

impl Aggregator {
    /// Refresh one system of `device_uuid`. `system_url` may be the plugin
    /// path or the namespaced key; a `/Storage` suffix refreshes only the
    /// storage collection.
    #[instrument(skip(self), fields(device_uuid = %device_uuid))]
    pub async fn rediscover_system_inventory(&self, device_uuid: &str, system_url: &str, update_flag: bool) -> RpcResponse {
        info!(device_uuid, "Rediscovery of the BMC with ID {} is started.", device_uuid);
        match self.try_rediscover(device_uuid, system_url, update_flag).await {
            Ok(()) => {
                info!(device_uuid, "Rediscovery of the BMC with ID {} is now complete.", device_uuid);
                RpcResponse::new(201, StatusMessage::Created, json!({"UUID": device_uuid}))
            }
            Err(failure) => {
                error!(device_uuid, system = %system_url, "Rediscovery failed: {}", failure.error_message);
                failure.into_response()
            }
        }
    }

    async fn try_rediscover(&self, device_uuid: &str, system_url: &str, update_flag: bool) -> Result<(), Failure> {
        let target = self
            .target(device_uuid)
            .await
            .map_err(|f| Failure { status_code: 400, ..f })?;
        let device_body = self.target_device_body(&target)?;
        let plugin = self
            .plugin(&target.plugin_id)
            .await
            .map_err(|f| Failure { status_code: 400, ..f })?;
        let auth = self.contact.login(&plugin).await?;

        let path = plugin_path(system_url, device_uuid);
        let storage = path.contains("/Storage");
        let system_key = key_formation(&path.replace("/Storage", ""), device_uuid);

        if let Some(running) = self.system_operation(&system_key).await {
            if running.operation == OPERATION_DELETE {
                return Err(Failure::new(
                    406,
                    StatusMessage::ResourceCannotBeDeleted,
                    format!(
                        "Rediscovery for system: {} can't be processed, {} operation is under progress",
                        system_key, running.operation
                    ),
                ));
            }
        }
        let marker = SystemOperation {
            operation: OPERATION_INVENTORY_REDISCOVERY.to_string(),
        };
        upsert_json(self.in_memory(), tables::SYSTEM_OPERATION, &system_key, &marker).await?;

        self.delete_subordinate_resources(device_uuid).await;
        let ctx = TraversalContext::new(Progress::new(self.tasks.clone(), None, 0));
        let discovery = self.discovery(&plugin, &auth, device_uuid, &device_body, update_flag, &ctx);
        debug!(device_uuid, path = %path, "Request oid for rediscovery");
        let result = if storage {
            discovery.discover_storage(&path, SYSTEMS_WEIGHT).await.map(|_| ())
        } else {
            let system = discovery.discover_system(&path, SYSTEMS_WEIGHT).await.map(|_| ());
            let skip = &self.config.add_compute_skip_resources;
            discovery
                .discover_root(uris::CHASSIS, &skip.skip_resource_list_under_chassis, CHASSIS_WEIGHT)
                .await;
            discovery
                .discover_root(uris::MANAGERS, &skip.skip_resource_list_under_manager, MANAGERS_WEIGHT)
                .await;
            system
        };

        self.end_system_operation(&system_key).await;
        self.clear_reset_info(&system_key).await;
        result
    }

    /// Drop the device's volatile records except the preserved roots
    async fn delete_subordinate_resources(&self, device_uuid: &str) {
        let entries = match self.in_memory().scan_all(device_uuid).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(device_uuid, "Unable to fetch all matching keys: {}", e);
                return;
            }
        };
        for (table, key) in entries {
            if PRESERVED_TABLES.contains(&table.as_str()) {
                continue;
            }
            if let Err(e) = self.in_memory().delete(&table, &key).await {
                warn!(table = %table, key = %key, "Delete of subordinate resource failed: {}", e);
            }
        }
        info!(device_uuid, "Removal of subordinate resources is now complete.");
    }

    async fn clear_reset_info(&self, system_key: &str) {
        let keys = self
            .in_memory()
            .get_all_matching(tables::SYSTEM_RESET, system_key)
            .await
            .unwrap_or_default();
        for key in keys {
            if let Err(e) = self.in_memory().delete(tables::SYSTEM_RESET, &key).await {
                debug!(key = %key, "No reset info removed: {}", e);
            }
        }
    }

    /// Rediscover every system whose ComputerSystem, Chassis or Managers
    /// records are missing, at most `server_rediscovery_batch_size` devices
    /// at a time. Returns the number of systems rediscovered.
    pub async fn rediscover_resources(&self) -> usize {
        let keys = self.on_disk().get_all_keys(tables::SYSTEM).await.unwrap_or_default();
        let mut targets = Vec::with_capacity(keys.len());
        for key in &keys {
            match agg_store::read_json::<Target>(self.on_disk(), tables::SYSTEM, key).await {
                Ok(target) => targets.push(target),
                Err(e) => warn!(device_uuid = %key, "Unable to read target: {}", e),
            }
        }
        if targets.is_empty() {
            info!("Nothing to re-discover.");
            return 0;
        }

        let permits = Arc::new(Semaphore::new(self.config.rediscovery_batch_size()));
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let aggregator = self.clone();
            handles.push(tokio::spawn(async move {
                let rediscovered = aggregator.rediscover_target(&target).await;
                drop(permit);
                rediscovered
            }));
        }

        let mut total = 0;
        for handle in handles {
            match handle.await {
                Ok(count) => total += count,
                Err(e) => error!("Rediscovery worker failed: {}", e),
            }
        }
        total
    }

    async fn rediscover_target(&self, target: &Target) -> usize {
        let systems = match self.target_system_collection(target).await {
            Ok(systems) => systems,
            Err(failure) => {
                error!(device_uuid = %target.device_uuid, "Failed to discover the server: {}", failure.error_message);
                return 0;
            }
        };
        let mut rediscovered = Vec::new();
        for system in systems {
            if self.rediscovery_required(&target.device_uuid, &system).await {
                self.rediscover_system_inventory(&target.device_uuid, &system, true).await;
                rediscovered.push(key_formation(&system, &target.device_uuid));
            }
        }
        self.publish(&rediscovered, EventType::ResourceUpdated, "SystemsCollection").await;
        rediscovered.len()
    }

    async fn target_system_collection(&self, target: &Target) -> Result<Vec<String>, Failure> {
        let device_body = self.target_device_body(target)?;
        let plugin = self.plugin(&target.plugin_id).await?;
        let auth = self.contact.login(&plugin).await?;
        let request = ContactRequest::new(&plugin, &auth, Method::Get, uris::SYSTEMS).with_body(device_body);
        let body = self
            .contact
            .call(&request, "error while trying to get the system collection details: ")
            .await?
            .json()?;
        Ok(members(&body))
    }

    async fn rediscovery_required(&self, device_uuid: &str, system_url: &str) -> bool {
        let key = key_formation(system_url, device_uuid);
        if self.in_memory().read(tables::COMPUTER_SYSTEM, &key).await.is_err() {
            info!(device_uuid, "Rediscovery required for the server with UUID: {}", device_uuid);
            return true;
        }
        for table in [tables::CHASSIS, tables::MANAGERS] {
            let present = self
                .in_memory()
                .get_all_matching(table, device_uuid)
                .await
                .map(|keys| !keys.is_empty())
                .unwrap_or(false);
            if !present {
                info!(device_uuid, table, "Rediscovery required for the server with UUID: {}", device_uuid);
                return true;
            }
        }
        debug!(device_uuid, "Rediscovery not required");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use agg_core::AuthType;
    use agg_store::KvStore;
    use serde_json::Value;

    fn seed_routes(h: &Harness) {
        let client = &h.client;
        client.route(
            Method::Get,
            "/ODIM/v1/Systems",
            200,
            json!({"Members": [{"@odata.id": "/ODIM/v1/Systems/1"}]}),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Systems/1",
            200,
            json!({
                "@odata.id": "/ODIM/v1/Systems/1",
                "Id": "1",
                "UUID": "sys-uuid",
                "PowerState": "On",
                "Bios": {"@odata.id": "/ODIM/v1/Systems/1/Bios"}
            }),
        );
        client.route(Method::Get, "/ODIM/v1/Systems/1/Bios", 200, json!({"@odata.id": "/ODIM/v1/Systems/1/Bios"}));
        client.route(
            Method::Get,
            "/ODIM/v1/Chassis",
            200,
            json!({"Members": [{"@odata.id": "/ODIM/v1/Chassis/1"}]}),
        );
        client.route(Method::Get, "/ODIM/v1/Chassis/1", 200, json!({"@odata.id": "/ODIM/v1/Chassis/1"}));
        client.route(
            Method::Get,
            "/ODIM/v1/Managers",
            200,
            json!({"Members": [{"@odata.id": "/ODIM/v1/Managers/1"}]}),
        );
        client.route(Method::Get, "/ODIM/v1/Managers/1", 200, json!({"@odata.id": "/ODIM/v1/Managers/1"}));
    }

    #[test]
    fn test_plugin_path() {
        assert_eq!(plugin_path("/redfish/v1/Systems/u1:1/", "u1"), "/redfish/v1/Systems/1");
        assert_eq!(plugin_path("/redfish/v1/Systems/1/Storage", "u1"), "/redfish/v1/Systems/1/Storage");
    }

    #[tokio::test]
    async fn test_rediscovery_refreshes_system_and_keeps_roots() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        let system = h.seed_device("dev-1", "GRF").await;
        h.stores
            .in_memory
            .upsert("Bios", "/redfish/v1/Systems/dev-1:1/Bios", r#"{"stale":true}"#)
            .await
            .unwrap();
        h.stores
            .in_memory
            .upsert(tables::SYSTEM_RESET, &system, "{}")
            .await
            .unwrap();
        seed_routes(&h);

        let resp = h.aggregator.rediscover_system_inventory("dev-1", &system, true).await;

        assert_eq!(resp.status_code, 201, "{:?}", resp.body);
        let refreshed: Value = serde_json::from_str(
            &h.stores.in_memory.read(tables::COMPUTER_SYSTEM, &system).await.unwrap(),
        )
        .unwrap();
        assert_eq!(refreshed["PowerState"], "On");
        let bios = h.stores.in_memory.read("Bios", "/redfish/v1/Systems/dev-1:1/Bios").await.unwrap();
        assert!(!bios.contains("stale"));
        assert!(h.stores.in_memory.read(tables::SYSTEM_OPERATION, &system).await.is_err());
        assert!(h.stores.in_memory.read(tables::SYSTEM_RESET, &system).await.is_err());
        assert!(!h
            .stores
            .in_memory
            .get_all_matching(tables::CHASSIS, "dev-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rediscovery_refused_during_delete() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        let system = h.seed_device("dev-1", "GRF").await;
        h.aggregator.begin_system_operation(&system, OPERATION_DELETE).await.unwrap();

        let resp = h.aggregator.rediscover_system_inventory("dev-1", &system, true).await;

        assert_eq!(resp.status_code, 406);
        assert_eq!(h.client.calls_to("/ODIM/v1/Systems/1"), 0);
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let h = Harness::new();
        let resp = h
            .aggregator
            .rediscover_system_inventory("missing", "/redfish/v1/Systems/missing:1", true)
            .await;
        assert_eq!((resp.status_code, resp.status_message), (400, StatusMessage::ResourceNotFound));
    }

    #[tokio::test]
    async fn test_rediscover_resources_only_for_incomplete_devices() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        h.seed_device("dev-1", "GRF").await;
        seed_routes(&h);

        // ComputerSystem present but no Chassis/Managers records
        assert_eq!(h.aggregator.rediscover_resources().await, 1);
        let events = h.publisher.events().await;
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ResourceUpdated && e.collection == "SystemsCollection"));

        // Everything present now
        assert_eq!(h.aggregator.rediscover_resources().await, 0);
    }

    #[tokio::test]
    async fn test_rediscover_resources_without_targets() {
        let h = Harness::new();
        assert_eq!(h.aggregator.rediscover_resources().await, 0);
    }
}
