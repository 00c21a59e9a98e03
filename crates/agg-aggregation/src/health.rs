//! Plugin status probe and periodic health check

use crate::cipher::CredentialCipher;
use crate::client::{HttpRequest, Method, PluginClient};
use crate::events::{EventPublisher, EventType};
use crate::failure::Failure;
use agg_core::config::PluginStatusPolicy;
use agg_core::{tables, AuthType, Plugin, StatusMessage};
use agg_store::{read_json, KvStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const STATUS_PATH: &str = "/ODIM/v1/Status";

/// Outcome of one status probe that produced an HTTP response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub status_code: u16,
    pub available: bool,
    pub version: String,
    pub queues: Vec<String>,
}

impl StatusReport {
    fn parse(status_code: u16, body: &str) -> Self {
        let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let available = value
            .pointer("/Status/Available")
            .and_then(Value::as_str)
            .map(|s| s.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        let version = value
            .get("Version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let queues = value
            .pointer("/EventMessageBus/EmbQueue")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|q| q.get("EmbQueueName").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            status_code,
            available: status_code == 200 && available,
            version,
            queues,
        }
    }
}

pub struct PluginHealthChecker {
    client: Arc<dyn PluginClient>,
    cipher: Arc<dyn CredentialCipher>,
    policy: PluginStatusPolicy,
}

impl PluginHealthChecker {
    pub fn new(client: Arc<dyn PluginClient>, cipher: Arc<dyn CredentialCipher>, policy: PluginStatusPolicy) -> Self {
        Self { client, cipher, policy }
    }

    pub fn policy(&self) -> &PluginStatusPolicy {
        &self.policy
    }

    fn status_body() -> Value {
        json!({
            "_comment": "Plugin STATUS Request",
            "Name": "Common Redfish Plugin Status",
            "Version": "v0.1"
        })
    }

    /// Single probe of `https://<address>/ODIM/v1/Status` with plaintext
    /// credentials. Transport failures become `CouldNotEstablishConnection`.
    pub async fn probe(
        &self,
        address: &str,
        username: &str,
        password: &str,
        auth_type: AuthType,
    ) -> Result<StatusReport, Failure> {
        let url = format!("https://{}{}", address, STATUS_PATH);
        let timeout = self.policy.response_timeout();
        let unreachable = |err: anyhow::Error| {
            Failure::new(
                503,
                StatusMessage::CouldNotEstablishConnection,
                format!("error while trying to get the plugin status: {}", err),
            )
            .with_args(vec![json!(url.clone())])
        };

        let mut request = HttpRequest::new(Method::Get, url.clone())
            .with_body(Self::status_body())
            .with_timeout(timeout);
        match auth_type {
            AuthType::BasicAuth => {
                request = request.with_basic_auth(username, password);
            }
            AuthType::XAuthToken => {
                let login = HttpRequest::new(Method::Post, format!("https://{}/ODIM/v1/Sessions", address))
                    .with_body(json!({"Username": username, "Password": password}))
                    .with_timeout(timeout);
                let resp = self.client.send(login).await.map_err(unreachable)?;
                match resp.header("X-Auth-Token") {
                    Some(token) if resp.status == 200 || resp.status == 201 => {
                        request = request.with_token(token);
                    }
                    _ => {
                        return Ok(StatusReport {
                            status_code: resp.status,
                            ..Default::default()
                        })
                    }
                }
            }
        }

        let resp = self.client.send(request).await.map_err(unreachable)?;
        Ok(StatusReport::parse(resp.status, &resp.body))
    }

    /// Probe a stored plugin up to `max_retry_attempt` times. Returns
    /// whether it is available and its event queue names.
    pub async fn check_plugin_status(&self, plugin: &Plugin) -> (bool, Vec<String>) {
        let password = match self.cipher.decrypt(&plugin.password) {
            Ok(p) => String::from_utf8_lossy(&p).into_owned(),
            Err(e) => {
                error!(plugin = %plugin.id, "Failed to decrypt plugin password: {}", e);
                return (false, vec![]);
            }
        };
        let address = plugin.address();
        let attempts = self.policy.max_retry_attempt.max(1);
        for attempt in 1..=attempts {
            match self
                .probe(&address, &plugin.username, &password, plugin.preferred_auth_type)
                .await
            {
                Ok(report) if report.available => {
                    debug!(plugin = %plugin.id, attempt, "Plugin is available");
                    return (true, report.queues);
                }
                Ok(report) => {
                    debug!(plugin = %plugin.id, attempt, status = report.status_code, "Plugin not available");
                }
                Err(failure) => {
                    debug!(plugin = %plugin.id, attempt, "Plugin status probe failed: {}", failure.error_message);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_interval()).await;
            }
        }
        warn!(plugin = %plugin.id, attempts, "Plugin is not reachable");
        (false, vec![])
    }
}

/// Periodic health check of every registered plugin
pub struct PluginHealthMonitor {
    checker: Arc<PluginHealthChecker>,
    store: Arc<dyn KvStore>,
    publisher: Arc<dyn EventPublisher>,
    failures: Mutex<HashMap<String, u32>>,
}

impl PluginHealthMonitor {
    pub fn new(checker: Arc<PluginHealthChecker>, store: Arc<dyn KvStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            checker,
            store,
            publisher,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Consecutive failed checks recorded for `plugin_id`
    pub async fn failure_count(&self, plugin_id: &str) -> Option<u32> {
        self.failures.lock().await.get(plugin_id).copied()
    }

    /// Check one plugin and update its failure counter. The first check
    /// only records the plugin; recovery after failures publishes a
    /// plugin-status event.
    pub async fn check(&self, plugin: &Plugin) {
        let (active, queues) = self.checker.check_plugin_status(plugin).await;
        let recovered = {
            let mut failures = self.failures.lock().await;
            match failures.get(&plugin.id).copied() {
                None => {
                    failures.insert(plugin.id.clone(), if active { 0 } else { 1 });
                    false
                }
                Some(count) if count != 0 && active => {
                    failures.insert(plugin.id.clone(), 0);
                    info!(plugin = %plugin.id, ?queues, "Plugin recovered after {} failed checks", count);
                    true
                }
                Some(count) if !active => {
                    failures.insert(plugin.id.clone(), count + 1);
                    warn!(plugin = %plugin.id, failures = count + 1, "Plugin health check failed");
                    false
                }
                Some(_) => false,
            }
        };
        if recovered {
            self.publisher
                .publish(&[plugin.id.clone()], EventType::PluginStatusOk, "PluginStatus")
                .await;
        }
    }

    /// One pass over every stored plugin
    pub async fn check_all(&self) {
        let ids = match self.store.get_all_keys(tables::PLUGIN).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("failed to get list of all plugins: {}", e);
                return;
            }
        };
        let mut plugins = Vec::with_capacity(ids.len());
        for id in ids {
            match read_json::<Plugin>(self.store.as_ref(), tables::PLUGIN, &id).await {
                Ok(plugin) => plugins.push(plugin),
                Err(e) => warn!(plugin = %id, "Failed to read plugin: {}", e),
            }
        }
        futures::future::join_all(plugins.iter().map(|p| self.check(p))).await;
    }

    /// Run forever, checking every `polling_frequency_in_mins`
    pub async fn run(self: Arc<Self>) {
        let period = self.checker.policy().polling_frequency().max(Duration::from_secs(1));
        info!(period_secs = period.as_secs(), "Plugin health check routine started");
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }
}
