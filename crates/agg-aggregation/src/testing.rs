//! Shared fixtures for unit tests

use crate::aggregator::Aggregator;
use crate::cipher::{CredentialCipher, Pbkdf2AesGcmCipher};
use crate::client::mock::MockPluginClient;
use crate::contact::{PluginAuth, PluginContact};
use crate::events::RecordingPublisher;
use crate::health::PluginHealthChecker;
use crate::traversal::{Discovery, TraversalContext};
use agg_core::config::PluginStatusPolicy;
use agg_core::{tables, AggregationConfig, AuthType, ConnectionMethod, ConnectionMethodLinks, Plugin, Target};
use agg_store::{upsert_json, KvStore, MemoryStore, Stores};
use agg_task::{InMemoryTaskService, TaskMetrics};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn cipher() -> Arc<Pbkdf2AesGcmCipher> {
    Arc::new(Pbkdf2AesGcmCipher::new(b"k".to_vec(), 1))
}

/// Defaults with single-attempt health probes and no monitor delay
pub fn test_config() -> AggregationConfig {
    AggregationConfig {
        plugin_status_policy: PluginStatusPolicy {
            max_retry_attempt: 1,
            retry_interval_in_mins: 0,
            ..Default::default()
        },
        task_monitor_interval_in_secs: 0,
        registry_store_path: "/nonexistent/registrystore".into(),
        ..Default::default()
    }
}

pub fn test_plugin(cipher: &dyn CredentialCipher, auth: AuthType) -> Plugin {
    Plugin {
        ip: "10.0.0.2".into(),
        port: "45001".into(),
        username: "admin".into(),
        password: cipher.encrypt(b"secret").unwrap(),
        id: "GRF".into(),
        plugin_type: "Compute".into(),
        preferred_auth_type: auth,
        manager_uuid: "m-1".into(),
    }
}

/// Collaborators for driving a [`Discovery`] directly
pub struct Fixture {
    pub client: Arc<MockPluginClient>,
    pub cipher: Arc<Pbkdf2AesGcmCipher>,
    pub contact: PluginContact,
    pub config: AggregationConfig,
    pub plugin: Plugin,
    pub on_disk: MemoryStore,
    pub device_body: Value,
}

impl Fixture {
    pub fn new() -> Self {
        let client = Arc::new(MockPluginClient::new());
        let cipher = cipher();
        let config = test_config();
        let health = PluginHealthChecker::new(client.clone(), cipher.clone(), config.plugin_status_policy.clone());
        let contact = PluginContact::new(client.clone(), cipher.clone(), health, config.url_translation.clone());
        let plugin = test_plugin(cipher.as_ref(), AuthType::BasicAuth);
        Self {
            client,
            cipher,
            contact,
            config,
            plugin,
            on_disk: MemoryStore::new(),
            device_body: Value::Null,
        }
    }

    pub fn basic_auth(&self) -> PluginAuth {
        PluginAuth::Basic {
            username: "admin".into(),
            password: "secret".into(),
        }
    }

    pub fn discovery<'a>(
        &'a self,
        store: &'a dyn KvStore,
        auth: &'a PluginAuth,
        device_uuid: &'a str,
        ctx: &'a TraversalContext,
    ) -> Discovery<'a> {
        Discovery {
            contact: &self.contact,
            store,
            on_disk: &self.on_disk,
            skip: &self.config.add_compute_skip_resources,
            registry_store_path: &self.config.registry_store_path,
            plugin: &self.plugin,
            auth,
            device_uuid,
            device_body: &self.device_body,
            update_flag: false,
            ctx,
        }
    }
}

/// A fully wired [`Aggregator`] over in-process collaborators
pub struct Harness {
    pub client: Arc<MockPluginClient>,
    pub cipher: Arc<Pbkdf2AesGcmCipher>,
    pub stores: Stores,
    pub tasks: Arc<InMemoryTaskService>,
    pub publisher: Arc<RecordingPublisher>,
    pub aggregator: Aggregator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AggregationConfig) -> Self {
        let client = Arc::new(MockPluginClient::new());
        let cipher = cipher();
        let stores = Stores::in_memory();
        let tasks = Arc::new(InMemoryTaskService::new(Arc::new(TaskMetrics::new().unwrap())));
        let publisher = Arc::new(RecordingPublisher::default());
        let aggregator = Aggregator::new(
            Arc::new(config),
            stores.clone(),
            tasks.clone(),
            client.clone(),
            cipher.clone(),
            publisher.clone(),
        );
        Self {
            client,
            cipher,
            stores,
            tasks,
            publisher,
            aggregator,
        }
    }

    pub async fn new_task(&self) -> String {
        self.tasks.create_task("admin").await
    }

    pub fn plugin(&self, auth: AuthType) -> Plugin {
        test_plugin(self.cipher.as_ref(), auth)
    }

    pub async fn seed_plugin(&self, plugin: &Plugin) {
        upsert_json(self.stores.on_disk.as_ref(), tables::PLUGIN, &plugin.id, plugin)
            .await
            .unwrap();
    }

    /// Store a connection method and return its URI
    pub async fn seed_connection_method(&self, id: &str, variant: &str) -> String {
        let uri = format!("{}/{}", agg_core::uris::CONNECTION_METHODS, id);
        let method = ConnectionMethod {
            connection_method_type: "Redfish".into(),
            connection_method_variant: variant.into(),
            links: ConnectionMethodLinks::default(),
        };
        upsert_json(self.stores.on_disk.as_ref(), tables::CONNECTION_METHOD, &uri, &method)
            .await
            .unwrap();
        uri
    }

    /// Register an onboarded device with one system and return its system key
    pub async fn seed_device(&self, device_uuid: &str, plugin_id: &str) -> String {
        let target = Target {
            manager_address: "10.0.0.1".into(),
            password: self.cipher.encrypt(b"bmcpass").unwrap(),
            user_name: "root".into(),
            device_uuid: device_uuid.into(),
            plugin_id: plugin_id.into(),
        };
        upsert_json(self.stores.on_disk.as_ref(), tables::SYSTEM, device_uuid, &target)
            .await
            .unwrap();
        let key = format!("{}/{}:1", agg_core::uris::SYSTEMS, device_uuid);
        self.stores
            .in_memory
            .upsert(tables::COMPUTER_SYSTEM, &key, &json!({"@odata.id": key, "Id": "1"}).to_string())
            .await
            .unwrap();
        key
    }
}
