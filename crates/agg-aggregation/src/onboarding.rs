//! Onboarding of plugins and devices
//!
//! `add_aggregation_source` admits one run per endpoint address, probes the
//! address and then either registers a plugin (the probe answered 200) or
//! discovers a bare device through an already registered plugin (the probe
//! answered 404). The admission record is released on every exit.

use crate::aggregator::{Aggregator, TaskInfo};
use crate::client::Method;
use crate::contact::{ContactRequest, PluginAuth};
use crate::events::EventType;
use crate::failure::Failure;
use crate::traversal::links::members;
use crate::traversal::TraversalContext;
use crate::validation::{decode, leaf, node, property_missing, Property, ODATA_LINK};
use agg_core::{
    split_system_id, tables, uris, AggregationSource, AuthType, ConnectionMethod, ConnectionMethodVariant,
    OdataId, Plugin, RpcResponse, StatusMessage, Target,
};
use agg_store::{create_json, read_json, update_json, upsert_json};
use agg_task::{TaskState, TaskStatus};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

const SOURCE_PROPERTIES: &[Property] = &[
    leaf("HostName"),
    leaf("UserName"),
    leaf("Password"),
    node("Links", &[node("ConnectionMethod", ODATA_LINK), leaf("Oem")]),
];

pub const VALIDATE_PATH: &str = "/ODIM/v1/validate";
const PLUGIN_MANAGERS_PATH: &str = "/ODIM/v1/Managers";

/// Progress weights of the device discovery roots
const SYSTEMS_WEIGHT: u32 = 60;
const INVENTORY_WEIGHT: u32 = 5;
const TELEMETRY_WEIGHT: u32 = 4;
const LICENSES_WEIGHT: u32 = 5;
const REGISTRIES_WEIGHT: u32 = 5;
const CHASSIS_WEIGHT: u32 = 15;
const MANAGERS_WEIGHT: u32 = 15;

const TELEMETRY_COLLECTIONS: &[&str] = &[
    "MetricDefinitions",
    "MetricReportDefinitions",
    "MetricReports",
    "Triggers",
];

/// Statuses a finished device discovery may carry without being undone
const TOLERATED_STATUSES: &[u16] = &[400, 404, 500, 503];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregationSourceRequest {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub links: Value,
}

/// Everything the plugin and device branches share
struct Onboarding<'r> {
    info: TaskInfo,
    request: &'r AggregationSourceRequest,
    variant: ConnectionMethodVariant,
    auth_type: AuthType,
}

pub fn source_uri(id: &str) -> String {
    format!("{}/{}", uris::AGGREGATION_SOURCES, id)
}

/// Redfish view of a stored aggregation source; the password never leaves
pub fn source_body(uri: &str, source: &AggregationSource) -> Value {
    let id = uri.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    json!({
        "@odata.type": "#AggregationSource.v1_1_0.AggregationSource",
        "@odata.id": uri,
        "@odata.context": "/redfish/v1/$metadata#AggregationSource.AggregationSource",
        "Id": id,
        "Name": "Aggregation Source",
        "HostName": source.host_name,
        "UserName": source.user_name,
        "Links": source.links,
    })
}

/// Links of a stored document, created when absent
fn links_mut(document: &mut Value) -> Option<&mut Map<String, Value>> {
    let object = document.as_object_mut()?;
    let links = object.entry("Links").or_insert_with(|| json!({}));
    links.as_object_mut()
}

impl Aggregator {
    /// Onboard the plugin or device behind `HostName`
    #[instrument(skip(self, body), fields(task_id = %task_id))]
    pub async fn add_aggregation_source(&self, task_id: &str, body: &[u8]) -> RpcResponse {
        let mut info = TaskInfo::new(task_id, uris::AGGREGATION_SOURCES, "POST", Value::Null);
        let (request, document) = match decode::<AggregationSourceRequest>(body, SOURCE_PROPERTIES) {
            Ok(decoded) => decoded,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        info.request_body = document;

        let Some(cm_link) = request
            .links
            .pointer("/ConnectionMethod/@odata.id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            let failure = property_missing("ConnectionMethod", "Invalid request, ConnectionMethod is missing");
            return self.fail(Some(&info), failure.into_response()).await;
        };

        let address = request.host_name.to_lowercase();
        match self.in_memory().get_index("BMCAddress", &address).await {
            Ok(existing) if !existing.is_empty() => {
                let resp = RpcResponse::error(
                    409,
                    StatusMessage::ResourceAlreadyExists,
                    format!("error: Manager address {} is already added", request.host_name),
                    vec![json!("ComputerSystem"), json!("HostName"), json!(request.host_name)],
                );
                return self.fail(Some(&info), resp).await;
            }
            Ok(_) => {}
            Err(e) => {
                return self
                    .fail(Some(&info), RpcResponse::internal_error(format!("error while checking BMC address: {}", e)))
                    .await
            }
        }

        let permit = match self.admission.acquire(&address).await {
            Ok(Some(permit)) => permit,
            Ok(None) => {
                let message = format!(
                    "An active request already exists for adding aggregation source IP {}",
                    request.host_name
                );
                warn!(host = %request.host_name, "{}", message);
                let resp = RpcResponse::error(409, StatusMessage::GeneralError, message, vec![]);
                self.finish_task(&info, TaskState::Exception, TaskStatus::Warning, &resp).await;
                return resp;
            }
            Err(e) => {
                return self
                    .fail(Some(&info), RpcResponse::internal_error(format!("error while adding admission record: {}", e)))
                    .await
            }
        };

        let resp = self.onboard(info, &request, &cm_link).await;
        permit.release().await;
        resp
    }

    async fn onboard(&self, info: TaskInfo, request: &AggregationSourceRequest, cm_link: &str) -> RpcResponse {
        let mut connection_method: ConnectionMethod =
            match read_json(self.on_disk(), tables::CONNECTION_METHOD, cm_link).await {
                Ok(cm) => cm,
                Err(e) => {
                    let resp = RpcResponse::not_found(
                        "connectionmethod id",
                        cm_link,
                        format!("error while getting connection method: {}", e),
                    );
                    return self.fail(Some(&info), resp).await;
                }
            };
        let Some(variant) = ConnectionMethodVariant::parse(&connection_method.connection_method_variant) else {
            let resp = RpcResponse::error(
                400,
                StatusMessage::PropertyValueFormatError,
                "invalid connection method variant",
                vec![json!(connection_method.connection_method_variant), json!("ConnectionMethodVariant")],
            );
            return self.fail(Some(&info), resp).await;
        };
        let Some(auth_type) = AuthType::parse(&variant.preferred_auth_type) else {
            let resp = RpcResponse::error(
                400,
                StatusMessage::PropertyValueNotInList,
                "Invalid PreferredAuthType",
                vec![json!(variant.preferred_auth_type), json!("PreferredAuthType")],
            );
            return self.fail(Some(&info), resp).await;
        };
        let run = Onboarding {
            info,
            request,
            variant,
            auth_type,
        };

        let outcome = match self.check_status(&run).await {
            Ok(200) if !connection_method.links.aggregation_sources.is_empty() => Err(Failure::new(
                409,
                StatusMessage::ResourceInUse,
                format!("connection method {} is already in use", cm_link),
            )),
            Ok(200) => self.add_plugin(&run).await,
            Ok(404) => self.add_compute(&run).await,
            Ok(status) => Err(Failure::new(
                status,
                StatusMessage::InternalError,
                format!("unexpected status {} while checking the status of {}", status, request.host_name),
            )),
            Err(failure) => Err(failure),
        };
        let source_id = match outcome {
            Ok(id) => id,
            Err(failure) => {
                error!(host = %request.host_name, "{}", failure.error_message);
                return self.fail(Some(&run.info), failure.into_response()).await;
            }
        };

        let uri = source_uri(&source_id);
        let source = match self.encrypt(&request.password) {
            Ok(password) => AggregationSource {
                host_name: request.host_name.clone(),
                user_name: request.user_name.clone(),
                password,
                links: request.links.clone(),
            },
            Err(failure) => return self.fail(Some(&run.info), failure.into_response()).await,
        };
        if let Err(e) = create_json(self.on_disk(), tables::AGGREGATION_SOURCE, &uri, &source).await {
            let resp = RpcResponse::internal_error(format!("error while trying to add the aggregation source: {}", e));
            return self.fail(Some(&run.info), resp).await;
        }
        connection_method.links.aggregation_sources.push(OdataId::new(uri.clone()));
        if let Err(e) = update_json(self.on_disk(), tables::CONNECTION_METHOD, cm_link, &connection_method).await {
            let resp = RpcResponse::internal_error(format!("error while updating the connection method: {}", e));
            return self.fail(Some(&run.info), resp).await;
        }

        info!(source = %uri, host = %request.host_name, "Aggregation source added");
        let resp = RpcResponse::new(201, StatusMessage::Created, source_body(&uri, &source))
            .with_header("Link", format!("<{}/>; rel=describedby", uri))
            .with_header("Location", uri);
        self.finish_task(&run.info, TaskState::Completed, TaskStatus::Ok, &resp).await;
        resp
    }

    /// Status code of `https://<HostName>/ODIM/v1/Status`. A 200 from a
    /// plugin reporting another firmware version than the connection method
    /// names is rejected.
    async fn check_status(&self, run: &Onboarding<'_>) -> Result<u16, Failure> {
        let report = self
            .contact
            .health()
            .probe(
                &run.request.host_name,
                &run.request.user_name,
                &run.request.password,
                run.auth_type,
            )
            .await?;
        debug!(host = %run.request.host_name, status = report.status_code, "Status probe answered");
        if report.status_code == 200 && report.version != run.variant.firmware_version {
            return Err(Failure::new(
                400,
                StatusMessage::PropertyValueNotInList,
                format!(
                    "plugin firmware version {} does not match the connection method",
                    report.version
                ),
            )
            .with_args(vec![json!(report.version), json!("FirmwareVersion")]));
        }
        Ok(report.status_code)
    }

    /// Register a plugin with its managers; the source id is the manager UUID
    async fn add_plugin(&self, run: &Onboarding<'_>) -> Result<String, Failure> {
        let variant = &run.variant;
        if !self.config.supported_plugin_types.contains(&variant.plugin_type) {
            return Err(Failure::new(400, StatusMessage::PropertyValueNotInList, "Invalid PluginType")
                .with_args(vec![json!(variant.plugin_type), json!("PluginType")]));
        }

        if self.on_disk().read(tables::PLUGIN, &variant.plugin_id).await.is_ok() {
            return Err(Failure::new(409, StatusMessage::ResourceAlreadyExists, "error: plugin with the given id already exists")
                .with_args(vec![json!("Plugin"), json!("PluginID"), json!(variant.plugin_id)]));
        }
        let host = &run.request.host_name;
        for id in self.on_disk().get_all_keys(tables::PLUGIN).await? {
            match read_json::<Plugin>(self.on_disk(), tables::PLUGIN, &id).await {
                Ok(existing) if existing.address().eq_ignore_ascii_case(host) => {
                    return Err(Failure::new(409, StatusMessage::ResourceAlreadyExists, "error: plugin with the given address already exists")
                        .with_args(vec![json!("Plugin"), json!("HostName"), json!(host)]));
                }
                Ok(_) => {}
                Err(e) => warn!(plugin = %id, "Unable to read registered plugin: {}", e),
            }
        }

        let Some((ip, port)) = host.split_once(':') else {
            return Err(Failure::new(400, StatusMessage::PropertyValueFormatError, "plugin HostName must be <ip>:<port>")
                .with_args(vec![json!(host), json!("HostName")]));
        };
        let mut plugin = Plugin {
            ip: ip.to_string(),
            port: port.to_string(),
            username: run.request.user_name.clone(),
            password: self.encrypt(&run.request.password)?,
            id: variant.plugin_id.clone(),
            plugin_type: variant.plugin_type.clone(),
            preferred_auth_type: run.auth_type,
            manager_uuid: String::new(),
        };
        let auth = self.contact.login(&plugin).await?;

        // Every manager is fetched before anything is stored
        let collection = self.plugin_get(&plugin, &auth, PLUGIN_MANAGERS_PATH).await?;
        let mut managers = Vec::new();
        for member in members(&collection) {
            let mut manager = self.plugin_get(&plugin, &auth, &member).await?;
            let uuid = manager
                .get("UUID")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let key = manager
                .get("@odata.id")
                .and_then(Value::as_str)
                .unwrap_or(&member)
                .trim_end_matches('/')
                .to_string();
            if plugin.manager_uuid.is_empty() && !uuid.is_empty() {
                plugin.manager_uuid = uuid;
            }
            if let Some(object) = manager.as_object_mut() {
                object.insert("Name".into(), json!(plugin.id));
                object.insert("LogServices".into(), json!({"@odata.id": format!("{}/LogServices", key)}));
            }
            managers.push((key, manager));
        }

        let mut manager_keys = Vec::new();
        for (key, manager) in &managers {
            manager_keys.push(key.clone());
            if let Err(e) = self.save_plugin_manager(key, manager).await {
                self.discard_plugin_managers(&manager_keys).await;
                return Err(e);
            }
        }

        if let Err(e) = create_json(self.on_disk(), tables::PLUGIN, &plugin.id, &plugin).await {
            self.discard_plugin_managers(&manager_keys).await;
            return Err(Failure::internal(format!("error while trying to save plugin: {}", e)));
        }
        info!(plugin = %plugin.id, manager_uuid = %plugin.manager_uuid, "Plugin registered");

        self.publish(&manager_keys, EventType::ResourceAdded, "ManagerCollection").await;
        let (alive, _) = self.contact.health().check_plugin_status(&plugin).await;
        if alive {
            self.publish(&[plugin.id.clone()], EventType::PluginStatusOk, "PluginStatus").await;
        }
        Ok(plugin.manager_uuid)
    }

    async fn plugin_get(&self, plugin: &Plugin, auth: &PluginAuth, path: &str) -> Result<Value, Failure> {
        let request = ContactRequest::new(plugin, auth, Method::Get, path);
        self.contact
            .call(&request, &format!("error while getting the details {}: ", path))
            .await?
            .json()
    }

    async fn save_plugin_manager(&self, key: &str, manager: &Value) -> Result<(), Failure> {
        self.save_manager_log_services(key).await?;
        self.in_memory()
            .upsert(tables::MANAGERS, key, &manager.to_string())
            .await
            .map_err(|e| Failure::internal(format!("error while saving the manager: {}", e)))
    }

    /// Remove manager and log service records written by a failed registration
    async fn discard_plugin_managers(&self, manager_keys: &[String]) {
        for key in manager_keys {
            let collection_uri = format!("{}/LogServices", key);
            let service_uri = format!("{}/SL", collection_uri);
            let entries_uri = format!("{}/Entries", service_uri);
            let records = [
                (tables::MANAGERS, key.as_str()),
                (tables::LOG_SERVICES_COLLECTION, collection_uri.as_str()),
                (tables::LOG_SERVICE, service_uri.as_str()),
                (tables::ENTRIES_COLLECTION, entries_uri.as_str()),
            ];
            for (table, record) in records {
                if let Err(e) = self.in_memory().delete(table, record).await {
                    if !e.is_not_found() {
                        warn!(table, key = record, "Unable to remove partially registered manager data: {}", e);
                    }
                }
            }
        }
    }

    /// Security log service and its empty entries collection for a plugin manager
    async fn save_manager_log_services(&self, manager_key: &str) -> Result<(), Failure> {
        let collection_uri = format!("{}/LogServices", manager_key);
        let service_uri = format!("{}/SL", collection_uri);
        let entries_uri = format!("{}/Entries", service_uri);
        let documents = [
            (
                tables::LOG_SERVICES_COLLECTION,
                &collection_uri,
                json!({
                    "@odata.id": collection_uri,
                    "@odata.type": "#LogServiceCollection.LogServiceCollection",
                    "Name": "Log Services",
                    "Members": [{"@odata.id": service_uri}],
                    "Members@odata.count": 1,
                }),
            ),
            (
                tables::LOG_SERVICE,
                &service_uri,
                json!({
                    "@odata.id": service_uri,
                    "@odata.type": "#LogService.v1_3_0.LogService",
                    "Id": "SL",
                    "Name": "Security Log",
                    "OverWritePolicy": "WrapsWhenFull",
                    "Entries": {"@odata.id": entries_uri},
                }),
            ),
            (
                tables::ENTRIES_COLLECTION,
                &entries_uri,
                json!({
                    "@odata.id": entries_uri,
                    "@odata.type": "#LogEntryCollection.LogEntryCollection",
                    "Name": "Security Logs",
                    "Members": [],
                    "Members@odata.count": 0,
                }),
            ),
        ];
        for (table, key, document) in documents {
            self.in_memory()
                .create(table, key, &document.to_string())
                .await
                .map_err(|e| {
                    Failure::new(
                        409,
                        StatusMessage::ResourceAlreadyExists,
                        format!("error while saving the manager log services: {}", e),
                    )
                    .with_args(vec![json!(table), json!("@odata.id"), json!(key)])
                })?;
        }
        Ok(())
    }

    /// Discover a device through its plugin; the source id is
    /// `<device uuid>.<system id>`
    async fn add_compute(&self, run: &Onboarding<'_>) -> Result<String, Failure> {
        let plugin_id = &run.variant.plugin_id;
        let plugin = self.plugin(plugin_id).await?;
        let auth = self.contact.login(&plugin).await?;
        let address = run.request.host_name.to_lowercase();
        let device_body = Self::device_body(&address, &run.request.user_name, &run.request.password);

        let validate = ContactRequest::new(&plugin, &auth, Method::Post, VALIDATE_PATH).with_body(device_body.clone());
        self.contact
            .call(&validate, "error while trying to authenticate the compute server: ")
            .await?;

        let device_uuid = uuid::Uuid::new_v4().to_string();
        info!(device_uuid = %device_uuid, host = %address, plugin = %plugin_id, "Discovering device");
        let ctx = TraversalContext::new(self.progress(&run.info.task_id));
        let discovery = self.discovery(&plugin, &auth, &device_uuid, &device_body, false, &ctx);

        if let Err(failure) = discovery.discover_systems(uris::SYSTEMS, SYSTEMS_WEIGHT).await {
            let args = match failure.status_message {
                StatusMessage::ResourceAlreadyExists => {
                    Some(vec![json!("ComputerSystem"), json!("HostName"), json!(run.request.host_name)])
                }
                StatusMessage::ActionParameterNotSupported => {
                    Some(vec![json!(run.request.host_name), json!(plugin_id)])
                }
                StatusMessage::ResourceAtUriUnauthorized | StatusMessage::CouldNotEstablishConnection => {
                    Some(vec![json!(run.request.host_name)])
                }
                _ => None,
            };
            if let Some(args) = args {
                self.rollback_device(&device_uuid).await;
                return Err(failure.context("error while trying to add compute: ").with_args(args));
            }
            warn!(device_uuid = %device_uuid, "Continuing after partial system discovery: {}", failure.error_message);
        }

        let skip = &self.config.add_compute_skip_resources;
        discovery
            .discover_root(uris::FIRMWARE_INVENTORY, &skip.skip_resource_list_under_others, INVENTORY_WEIGHT)
            .await;
        discovery
            .discover_root(uris::SOFTWARE_INVENTORY, &skip.skip_resource_list_under_others, INVENTORY_WEIGHT)
            .await;
        let telemetry_share = TELEMETRY_WEIGHT / TELEMETRY_COLLECTIONS.len() as u32;
        for collection in TELEMETRY_COLLECTIONS {
            let uri = format!("{}/{}", uris::TELEMETRY_SERVICE, collection);
            discovery.discover_shared_root(&uri, telemetry_share).await;
        }
        discovery.discover_shared_root(uris::LICENSES, LICENSES_WEIGHT).await;
        discovery.discover_registries(uris::REGISTRIES, REGISTRIES_WEIGHT).await;
        self.abort_if_cancelled(&ctx, &device_uuid).await?;
        discovery
            .discover_root(uris::CHASSIS, &skip.skip_resource_list_under_chassis, CHASSIS_WEIGHT)
            .await;
        self.abort_if_cancelled(&ctx, &device_uuid).await?;
        discovery
            .discover_root(uris::MANAGERS, &skip.skip_resource_list_under_manager, MANAGERS_WEIGHT)
            .await;
        self.abort_if_cancelled(&ctx, &device_uuid).await?;

        if let Some(failure) = ctx.failure() {
            if !TOLERATED_STATUSES.contains(&failure.status_code) {
                self.rollback_device(&device_uuid).await;
                return Err(failure.context("error while trying to add compute: "));
            }
            debug!(device_uuid = %device_uuid, status = failure.status_code, "Tolerated discovery failure");
        }

        let system_prefix = format!("{}/", uris::SYSTEMS);
        let systems: Vec<String> = ctx
            .system_keys()
            .into_iter()
            .filter(|key| key.starts_with(&system_prefix))
            .collect();
        let Some(system_id) = systems.first().and_then(|key| split_system_id(key)).map(|(_, id)| id.to_string())
        else {
            self.rollback_device(&device_uuid).await;
            return Err(Failure::internal("error while trying to add compute: no ComputerSystem discovered"));
        };

        let target = Target {
            manager_address: address.clone(),
            password: self.encrypt(&run.request.password)?,
            user_name: run.request.user_name.clone(),
            device_uuid: device_uuid.clone(),
            plugin_id: plugin_id.clone(),
        };
        if let Err(e) = create_json(self.on_disk(), tables::SYSTEM, &device_uuid, &target).await {
            self.rollback_device(&device_uuid).await;
            return Err(Failure::internal(format!("error while trying to save the target: {}", e)));
        }
        let mut form = Map::new();
        form.insert("BMCAddress".into(), json!(address));
        if let Err(e) = self.in_memory().create_index(&form, &device_uuid).await {
            warn!(device_uuid = %device_uuid, "Failed to index BMC address: {}", e);
        }

        let chassis = self
            .in_memory()
            .get_all_matching(tables::CHASSIS, &device_uuid)
            .await
            .unwrap_or_default();
        let managers = self
            .in_memory()
            .get_all_matching(tables::MANAGERS, &device_uuid)
            .await
            .unwrap_or_default();
        self.publish(&systems, EventType::ResourceAdded, "SystemsCollection").await;
        self.publish(&chassis, EventType::ResourceAdded, "ChassisCollection").await;
        self.publish(&managers, EventType::ResourceAdded, "ManagerCollection").await;
        self.link_to_plugin_manager(&plugin, &systems, &chassis).await;

        info!(device_uuid = %device_uuid, systems = systems.len(), "Device onboarded");
        Ok(format!("{}.{}", device_uuid, system_id))
    }

    async fn abort_if_cancelled(&self, ctx: &TraversalContext, device_uuid: &str) -> Result<(), Failure> {
        if !ctx.progress.is_cancelled() {
            return Ok(());
        }
        self.rollback_device(device_uuid).await;
        info!(device_uuid, "Device discovery cancelled");
        Err(Failure::internal("error while trying to add compute: task was cancelled"))
    }

    /// Append discovered systems and chassis to the plugin's own manager
    async fn link_to_plugin_manager(&self, plugin: &Plugin, systems: &[String], chassis: &[String]) {
        let key = format!("{}/{}", uris::MANAGERS, plugin.manager_uuid);
        let mut manager: Value = match self.in_memory().read(tables::MANAGERS, &key).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| json!({})),
            Err(e) => {
                warn!(manager = %key, "Plugin manager not available for linking: {}", e);
                return;
            }
        };
        let Some(links) = links_mut(&mut manager) else {
            return;
        };
        for (name, keys) in [("ManagerForServers", systems), ("ManagerForChassis", chassis)] {
            let list = links.entry(name).or_insert_with(|| json!([]));
            if let Some(items) = list.as_array_mut() {
                items.extend(keys.iter().map(|k| json!({"@odata.id": k})));
            }
        }
        if let Err(e) = self.in_memory().upsert(tables::MANAGERS, &key, &manager.to_string()).await {
            warn!(manager = %key, "Failed to update plugin manager links: {}", e);
        }
    }

    /// Persist an updated aggregation source record
    pub(crate) async fn save_source(&self, uri: &str, source: &AggregationSource) -> Result<(), Failure> {
        upsert_json(self.on_disk(), tables::AGGREGATION_SOURCE, uri, source)
            .await
            .map_err(|e| Failure::internal(format!("error while trying to save the aggregation source: {}", e)))
    }
}
