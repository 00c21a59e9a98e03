//! Removal of aggregation sources, plugins and devices

use crate::aggregator::Aggregator;
use crate::client::Method;
use crate::contact::{ContactRequest, PluginAuth};
use crate::events::EventType;
use crate::failure::Failure;
use crate::health::STATUS_PATH;
use crate::validation::{decode, leaf, node, Property};
use agg_core::{
    split_system_id, tables, uris, Aggregate, AggregationSource, ConnectionMethod, ConnectionMethodVariant,
    OdataId, Plugin, RpcResponse, StatusMessage, Target, OPERATION_DELETE,
};
use agg_store::{read_json, update_json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

const DELETE_PROPERTIES: &[Property] = &[
    leaf("@odata.context"),
    leaf("@odata.id"),
    leaf("@odata.type"),
    leaf("Id"),
    leaf("Name"),
    leaf("Oem"),
    node("Parameters", &[leaf("Name")]),
];

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    #[serde(rename = "Parameters", default)]
    parameters: Vec<DeleteParameter>,
}

#[derive(Debug, Deserialize)]
struct DeleteParameter {
    #[serde(rename = "Name", default)]
    name: String,
}

/// Device UUID encoded in a source URI: `.../AggregationSources/<uuid>.<systemID>`
pub(crate) fn source_device_uuid(url: &str) -> &str {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    last.split('.').next().unwrap_or_default()
}

/// Drop `system` from `ManagerForServers` and every `chassis` entry from
/// `ManagerForChassis`, removing lists that end up empty
fn strip_manager_links(manager: &mut Value, system: &str, chassis: &[String]) {
    let Some(links) = manager.get_mut("Links").and_then(Value::as_object_mut) else {
        return;
    };
    let mut prune = |name: &str, remove: &dyn Fn(&str) -> bool| {
        if let Some(items) = links.get_mut(name).and_then(Value::as_array_mut) {
            items.retain(|item| !item.get("@odata.id").and_then(Value::as_str).map(remove).unwrap_or(false));
            if items.is_empty() {
                links.remove(name);
            }
        }
    };
    prune("ManagerForServers", &|oid| oid == system);
    prune("ManagerForChassis", &|oid| chassis.iter().any(|c| c == oid));
}

impl Aggregator {
    /// Remove an aggregation source together with the plugin or device it onboarded
    #[instrument(skip(self))]
    pub async fn delete_aggregation_source(&self, url: &str) -> RpcResponse {
        let source: AggregationSource = match read_json(self.on_disk(), tables::AGGREGATION_SOURCE, url).await {
            Ok(source) => source,
            Err(e) if e.is_not_found() => {
                return RpcResponse::not_found("AggregationSource", url, format!("Unable to get AggregationSource: {}", e))
            }
            Err(e) => return RpcResponse::internal_error(format!("Unable to get AggregationSource: {}", e)),
        };
        let Some(cm_link) = source.connection_method_link().map(str::to_string) else {
            return RpcResponse::internal_error(format!("aggregation source {} has no connection method link", url));
        };
        let mut connection_method: ConnectionMethod =
            match read_json(self.on_disk(), tables::CONNECTION_METHOD, &cm_link).await {
                Ok(cm) => cm,
                Err(e) if e.is_not_found() => {
                    return RpcResponse::not_found("ConnectionMethod", &cm_link, format!("Unable to get connectionmethod: {}", e))
                }
                Err(e) => return RpcResponse::internal_error(format!("Unable to get connectionmethod: {}", e)),
            };

        let device_uuid = source_device_uuid(url);
        let resp = match self.target(device_uuid).await {
            Ok(target) => self.delete_device_source(&target).await,
            Err(_) => self.delete_plugin_source(&connection_method).await,
        };
        if resp.status_code != 200 {
            return resp;
        }

        if let Err(e) = self.on_disk().delete(tables::AGGREGATION_SOURCE, url).await {
            return RpcResponse::internal_error(format!("error while trying to delete AggregationSource {}", e));
        }
        let removed = OdataId::new(url);
        connection_method.links.aggregation_sources.retain(|source| *source != removed);
        if let Err(e) = update_json(self.on_disk(), tables::CONNECTION_METHOD, &cm_link, &connection_method).await {
            error!(connection_method = %cm_link, "Failed to unbind aggregation source: {}", e);
            return RpcResponse::internal_error(e.to_string());
        }
        info!(source = %url, "Aggregation source removed");
        RpcResponse::removed()
    }

    async fn delete_plugin_source(&self, connection_method: &ConnectionMethod) -> RpcResponse {
        let Some(variant) = ConnectionMethodVariant::parse(&connection_method.connection_method_variant) else {
            return RpcResponse::internal_error(format!(
                "invalid connection method variant {}",
                connection_method.connection_method_variant
            ));
        };
        if connection_method.links.aggregation_sources.len() > 1 {
            let message = format!("Plugin {} can't be removed since it managing devices", variant.plugin_id);
            info!("{}", message);
            return RpcResponse::error(406, StatusMessage::ResourceCannotBeDeleted, message, vec![]);
        }
        match self.plugin(&variant.plugin_id).await {
            Ok(plugin) => self.delete_plugin(&format!("{}/{}", uris::MANAGERS, plugin.manager_uuid)).await,
            Err(failure) => failure.into_response(),
        }
    }

    async fn delete_device_source(&self, target: &Target) -> RpcResponse {
        let systems = match self
            .in_memory()
            .get_all_matching(tables::COMPUTER_SYSTEM, &target.device_uuid)
            .await
        {
            Ok(systems) => systems,
            Err(e) => return RpcResponse::internal_error(e.to_string()),
        };
        if systems.is_empty() {
            return RpcResponse::not_found("Systems", "everything", format!("no systems found for {}", target.device_uuid));
        }
        let mut resp = RpcResponse::completed(200, StatusMessage::ResourceRemoved);
        for system in &systems {
            resp = self.delete_compute(system, &target.plugin_id).await;
            if resp.status_code != 200 {
                return resp;
            }
        }
        self.remove_from_aggregates(&systems).await;
        resp
    }

    /// Legacy removal entry point taking `{"Parameters":[{"Name": <key>}]}`;
    /// manager keys remove a plugin, system keys a device
    #[instrument(skip(self, body))]
    pub async fn delete_compute_request(&self, body: &[u8]) -> RpcResponse {
        let request = match decode::<DeleteRequest>(body, DELETE_PROPERTIES) {
            Ok((request, _)) => request,
            Err(failure) => return failure.into_response(),
        };
        if let [parameter] = request.parameters.as_slice() {
            let key = parameter.name.trim_end_matches('/');
            if key.contains("Managers") {
                return self.delete_plugin(key).await;
            }
            if let Some((device_uuid, _)) = split_system_id(key) {
                return match self.target(device_uuid).await {
                    Ok(target) => self.delete_compute(key, &target.plugin_id).await,
                    Err(failure) => failure.into_response(),
                };
            }
        }
        RpcResponse::error(
            400,
            StatusMessage::MalformedJson,
            "error while trying to delete compute system: Invalid request",
            vec![],
        )
    }

    /// Remove a plugin that manages no device and no longer answers its
    /// status endpoint
    pub async fn delete_plugin(&self, manager_key: &str) -> RpcResponse {
        match self.try_delete_plugin(manager_key).await {
            Ok(()) => RpcResponse::completed(200, StatusMessage::ResourceRemoved),
            Err(failure) => {
                warn!(manager = %manager_key, "{}", failure.error_message);
                failure.into_response()
            }
        }
    }

    async fn try_delete_plugin(&self, manager_key: &str) -> Result<(), Failure> {
        let raw = self.in_memory().read(tables::MANAGERS, manager_key).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("Managers", manager_key, format!("error while getting Managers data: {}", e))
            } else {
                Failure::internal(format!("error while getting Managers data: {}", e))
            }
        })?;
        let manager: Value = serde_json::from_str(&raw)?;
        let plugin_id = manager.get("Name").and_then(Value::as_str).unwrap_or_default();
        let plugin = self
            .plugin(plugin_id)
            .await
            .map_err(|f| Failure { message_args: vec![json!("Plugin"), json!(plugin_id)], ..f })?;

        let mut managed = 0usize;
        for key in self.on_disk().get_all_keys(tables::SYSTEM).await? {
            let target: Target = read_json(self.on_disk(), tables::SYSTEM, &key).await?;
            if target.plugin_id == plugin.id {
                managed += 1;
            }
        }
        if managed > 0 {
            return Err(Failure::new(
                406,
                StatusMessage::ResourceCannotBeDeleted,
                format!("error: plugin {} can't be removed since it managing some of the devices", plugin.id),
            ));
        }
        if self.plugin_answers_status(&plugin).await? {
            return Err(Failure::new(
                406,
                StatusMessage::ResourceCannotBeDeleted,
                "error: plugin is still up, so it cannot be removed.",
            ));
        }

        self.in_memory().delete(tables::MANAGERS, manager_key).await?;
        if manager.get("LogServices").is_some() {
            let collection = format!("{}/LogServices", manager_key);
            let service = format!("{}/SL", collection);
            let entries = format!("{}/Entries", service);
            for (table, key) in [
                (tables::LOG_SERVICES_COLLECTION, &collection),
                (tables::LOG_SERVICE, &service),
                (tables::ENTRIES_COLLECTION, &entries),
            ] {
                if let Err(e) = self.in_memory().delete(table, key).await {
                    if !e.is_not_found() {
                        return Err(e.into());
                    }
                    debug!(table, key = %key, "Log service record already absent");
                }
            }
        }
        self.on_disk().delete(tables::PLUGIN, &plugin.id).await?;
        info!(plugin = %plugin.id, "Plugin removed");
        self.publish(&[manager_key.to_string()], EventType::ResourceRemoved, "ManagerCollection")
            .await;
        Ok(())
    }

    /// One status call without health probing; any answer means alive
    async fn plugin_answers_status(&self, plugin: &Plugin) -> Result<bool, Failure> {
        let (username, password) = self.contact.plugin_credentials(plugin)?;
        let auth = PluginAuth::Basic { username, password };
        let mut request = ContactRequest::new(plugin, &auth, Method::Get, STATUS_PATH);
        request.status_poll = false;
        let prefix = format!("error while getting the details {}: ", STATUS_PATH);
        Ok(self.contact.call(&request, &prefix).await.is_ok())
    }

    /// Remove one onboarded ComputerSystem and everything stored for its device
    pub async fn delete_compute(&self, system_key: &str, plugin_id: &str) -> RpcResponse {
        let key = system_key.trim_end_matches('/');
        if let Err(failure) = self.begin_system_operation(key, OPERATION_DELETE).await {
            warn!(system = %key, "Delete refused: {}", failure.error_message);
            return failure.into_response();
        }
        let result = self.try_delete_compute(key, plugin_id).await;
        self.end_system_operation(key).await;
        match result {
            Ok(()) => RpcResponse::completed(200, StatusMessage::ResourceRemoved),
            Err(failure) => {
                error!(system = %key, "{}", failure.error_message);
                failure.into_response()
            }
        }
    }

    async fn try_delete_compute(&self, key: &str, plugin_id: &str) -> Result<(), Failure> {
        let Some((device_uuid, _)) = split_system_id(key) else {
            return Err(Failure::internal(format!("key {} doesn't have system details", key)));
        };
        let plugin = self.plugin(plugin_id).await?;
        let manager_key = format!("{}/{}", uris::MANAGERS, plugin.manager_uuid);
        let raw = self
            .in_memory()
            .read(tables::MANAGERS, &manager_key)
            .await
            .map_err(|e| Failure::internal(format!("error while getting manager details: {}", e)))?;
        let mut manager: Value = serde_json::from_str(&raw)?;

        let chassis = self
            .in_memory()
            .get_all_matching(tables::CHASSIS, device_uuid)
            .await
            .unwrap_or_else(|e| {
                warn!(device_uuid, "error while trying to collect the chassis list: {}", e);
                Vec::new()
            });
        let managers = self
            .in_memory()
            .get_all_matching(tables::MANAGERS, device_uuid)
            .await
            .unwrap_or_else(|e| {
                warn!(device_uuid, "error while trying to collect the manager list: {}", e);
                Vec::new()
            });

        strip_manager_links(&mut manager, key, &chassis);
        self.in_memory()
            .upsert(tables::MANAGERS, &manager_key, &manager.to_string())
            .await
            .map_err(|e| Failure::internal(format!("error while trying to update the plugin manager: {}", e)))?;

        self.rollback_device(device_uuid).await;
        if let Err(e) = self.in_memory().delete_index(device_uuid).await {
            debug!(device_uuid, "No BMC address index removed: {}", e);
        }
        self.on_disk().delete(tables::SYSTEM, device_uuid).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("System", device_uuid, format!("error while trying to delete system: {}", e))
            } else {
                Failure::internal(format!("error while trying to delete system: {}", e))
            }
        })?;

        info!(device_uuid, system = %key, "Device removed");
        self.publish(&managers, EventType::ResourceRemoved, "ManagerCollection").await;
        self.publish(&chassis, EventType::ResourceRemoved, "ChassisCollection").await;
        self.publish(&[key.to_string()], EventType::ResourceRemoved, "SystemsCollection").await;
        Ok(())
    }

    /// Drop deleted systems from every aggregate that lists them
    pub(crate) async fn remove_from_aggregates(&self, systems: &[String]) {
        let keys = match self.on_disk().get_all_keys(tables::AGGREGATE).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("error getting aggregate: {}", e);
                return;
            }
        };
        for key in keys {
            let mut aggregate: Aggregate = match read_json(self.on_disk(), tables::AGGREGATE, &key).await {
                Ok(aggregate) => aggregate,
                Err(e) => {
                    error!(aggregate = %key, "error getting Aggregate: {}", e);
                    continue;
                }
            };
            let before = aggregate.elements.len();
            aggregate.elements.retain(|element| !systems.contains(&element.odata_id));
            if aggregate.elements.len() == before {
                continue;
            }
            if let Err(e) = update_json(self.on_disk(), tables::AGGREGATE, &key, &aggregate).await {
                error!(aggregate = %key, "Error while deleting system from aggregate: {}", e);
            }
        }
    }
}
