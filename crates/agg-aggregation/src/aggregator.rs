//! Service core shared by every entry point
//!
//! [`Aggregator`] owns the collaborators (stores, task service, plugin
//! contact, cipher, event publisher, admission guard). The entry points
//! live in their own modules as `impl Aggregator` blocks.

use crate::admission::AdmissionGuard;
use crate::cipher::CredentialCipher;
use crate::client::PluginClient;
use crate::contact::{PluginAuth, PluginContact};
use crate::events::{EventPublisher, EventType};
use crate::failure::Failure;
use crate::health::{PluginHealthChecker, PluginHealthMonitor};
use crate::traversal::{Discovery, Progress, TraversalContext};
use agg_core::{tables, AggregationConfig, Plugin, RpcResponse, SystemOperation, Target};
use agg_store::{create_json, read_json, KvStore, Stores};
use agg_task::{TaskPayload, TaskService, TaskState, TaskStatus, TaskUpdate};
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Task an operation reports to, with the request that started it
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub task_id: String,
    pub target_uri: String,
    pub operation: &'static str,
    pub request_body: Value,
}

impl TaskInfo {
    pub fn new(task_id: &str, target_uri: &str, operation: &'static str, request_body: Value) -> Self {
        Self {
            task_id: task_id.to_string(),
            target_uri: target_uri.to_string(),
            operation,
            request_body,
        }
    }

    fn payload(&self, resp: &RpcResponse) -> TaskPayload {
        TaskPayload {
            http_headers: resp.headers.clone(),
            http_operation: self.operation.to_string(),
            json_body: self.request_body.clone(),
            target_uri: self.target_uri.clone(),
            status_code: resp.status_code,
            response_body: resp.body.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Aggregator {
    pub(crate) config: Arc<AggregationConfig>,
    /// Durable and volatile stores
    pub(crate) stores: Stores,
    pub(crate) tasks: Arc<dyn TaskService>,
    pub(crate) contact: Arc<PluginContact>,
    pub(crate) cipher: Arc<dyn CredentialCipher>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    /// One onboarding per endpoint address
    pub(crate) admission: Arc<AdmissionGuard>,
}

impl Aggregator {
    pub fn new(
        config: Arc<AggregationConfig>,
        stores: Stores,
        tasks: Arc<dyn TaskService>,
        client: Arc<dyn PluginClient>,
        cipher: Arc<dyn CredentialCipher>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let health = PluginHealthChecker::new(
            Arc::clone(&client),
            Arc::clone(&cipher),
            config.plugin_status_policy.clone(),
        );
        let contact = PluginContact::new(client, Arc::clone(&cipher), health, config.url_translation.clone());
        let admission = Arc::new(AdmissionGuard::new(Arc::clone(&stores.in_memory)));
        Self {
            config,
            stores,
            tasks,
            contact: Arc::new(contact),
            cipher,
            publisher,
            admission,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub(crate) fn on_disk(&self) -> &dyn KvStore {
        self.stores.on_disk.as_ref()
    }

    pub(crate) fn in_memory(&self) -> &dyn KvStore {
        self.stores.in_memory.as_ref()
    }

    /// Periodic plugin health check over the registered plugins
    pub fn health_monitor(&self) -> PluginHealthMonitor {
        let checker = PluginHealthChecker::new(
            Arc::clone(self.contact.client()),
            Arc::clone(&self.cipher),
            self.config.plugin_status_policy.clone(),
        );
        PluginHealthMonitor::new(
            Arc::new(checker),
            Arc::clone(&self.stores.on_disk),
            Arc::clone(&self.publisher),
        )
    }

    pub(crate) fn progress(&self, task_id: &str) -> Progress {
        Progress::new(Arc::clone(&self.tasks), Some(task_id.to_string()), 0)
    }

    /// Write the terminal record of a task. A task found cancelling is
    /// closed as `Cancelled` instead.
    pub(crate) async fn finish_task(&self, info: &TaskInfo, state: TaskState, status: TaskStatus, resp: &RpcResponse) {
        let update = TaskUpdate::new(&info.task_id, state, status, 100).with_payload(info.payload(resp));
        match self.tasks.update_task(update).await {
            Ok(()) => {}
            Err(e) if e.is_cancelling() => {
                let cancelled = TaskUpdate::new(&info.task_id, TaskState::Cancelled, TaskStatus::Critical, 100)
                    .with_payload(info.payload(resp));
                if let Err(e) = self.tasks.update_task(cancelled).await {
                    warn!(task_id = %info.task_id, "Failed to write cancelled record: {}", e);
                }
            }
            Err(e) => warn!(task_id = %info.task_id, "Failed to update task: {}", e),
        }
    }

    /// Close the task as `Exception`/`Critical` and hand the response back
    pub(crate) async fn fail(&self, info: Option<&TaskInfo>, resp: RpcResponse) -> RpcResponse {
        if let Some(info) = info {
            debug!(task_id = %info.task_id, status = resp.status_code, "Closing task with error");
            self.finish_task(info, TaskState::Exception, TaskStatus::Critical, &resp).await;
        }
        resp
    }

    pub(crate) async fn publish(&self, keys: &[String], event_type: EventType, collection: &str) {
        if keys.is_empty() {
            return;
        }
        self.publisher.publish(keys, event_type, collection).await;
    }

    pub(crate) async fn plugin(&self, plugin_id: &str) -> Result<Plugin, Failure> {
        read_json(self.on_disk(), tables::PLUGIN, plugin_id).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("plugin", plugin_id, format!("error while getting plugin data: {}", e))
            } else {
                Failure::internal(format!("error while getting plugin data: {}", e))
            }
        })
    }

    pub(crate) async fn target(&self, device_uuid: &str) -> Result<Target, Failure> {
        read_json(self.on_disk(), tables::SYSTEM, device_uuid).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("target", device_uuid, e.to_string())
            } else {
                Failure::internal(format!("error while getting target data: {}", e))
            }
        })
    }

    pub(crate) fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, Failure> {
        self.cipher
            .encrypt(plaintext.as_bytes())
            .map_err(|e| Failure::internal(format!("error while trying to encrypt: {}", e)))
    }

    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<String, Failure> {
        let plaintext = self
            .cipher
            .decrypt(ciphertext)
            .map_err(|e| Failure::internal(format!("error while trying to decrypt device password: {}", e)))?;
        Ok(String::from_utf8_lossy(&plaintext).into_owned())
    }

    /// Device identity sent along with every plugin call made for a target
    pub(crate) fn device_body(manager_address: &str, user_name: &str, password: &str) -> Value {
        json!({
            "ManagerAddress": manager_address,
            "UserName": user_name,
            "Password": base64::engine::general_purpose::STANDARD.encode(password.as_bytes()),
        })
    }

    pub(crate) fn target_device_body(&self, target: &Target) -> Result<Value, Failure> {
        let password = self.decrypt(&target.password)?;
        Ok(Self::device_body(&target.manager_address, &target.user_name, &password))
    }

    pub(crate) fn discovery<'a>(
        &'a self,
        plugin: &'a Plugin,
        auth: &'a PluginAuth,
        device_uuid: &'a str,
        device_body: &'a Value,
        update_flag: bool,
        ctx: &'a TraversalContext,
    ) -> Discovery<'a> {
        Discovery {
            contact: &self.contact,
            store: self.in_memory(),
            on_disk: self.on_disk(),
            skip: &self.config.add_compute_skip_resources,
            registry_store_path: &self.config.registry_store_path,
            plugin,
            auth,
            device_uuid,
            device_body,
            update_flag,
            ctx,
        }
    }

    /// Delete every volatile resource and index entry of a device
    pub(crate) async fn rollback_device(&self, device_uuid: &str) {
        let entries = match self.in_memory().scan_all(device_uuid).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(device_uuid, "Unable to collect resources for rollback: {}", e);
                return;
            }
        };
        for (table, key) in &entries {
            if let Err(e) = self.in_memory().delete(table, key).await {
                if !e.is_not_found() {
                    warn!(device_uuid, table = %table, key = %key, "Rollback delete failed: {}", e);
                }
            }
            if let Err(e) = self.in_memory().delete_index(key).await {
                debug!(key = %key, "No index entries removed: {}", e);
            }
        }
        info!(device_uuid, removed = entries.len(), "Rolled back device resources");
    }

    pub(crate) async fn system_operation(&self, system_key: &str) -> Option<SystemOperation> {
        read_json(self.in_memory(), tables::SYSTEM_OPERATION, system_key).await.ok()
    }

    /// Mark a long-running operation on a system; fails when one is running
    pub(crate) async fn begin_system_operation(&self, system_key: &str, operation: &str) -> Result<(), Failure> {
        let marker = SystemOperation {
            operation: operation.to_string(),
        };
        match create_json(self.in_memory(), tables::SYSTEM_OPERATION, system_key, &marker).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate() => {
                let running = self
                    .system_operation(system_key)
                    .await
                    .map(|op| op.operation)
                    .unwrap_or_default();
                Err(Failure::new(
                    406,
                    agg_core::StatusMessage::ResourceCannotBeDeleted,
                    format!("{} operation  is under progress", running),
                ))
            }
            Err(e) => Err(Failure::internal(format!("error while saving the system operation: {}", e))),
        }
    }

    pub(crate) async fn end_system_operation(&self, system_key: &str) {
        if let Err(e) = self.in_memory().delete(tables::SYSTEM_OPERATION, system_key).await {
            if !e.is_not_found() {
                warn!(system = %system_key, "Failed to clear system operation: {}", e);
            }
        }
    }
}
