//! Plugin contact protocol
//!
//! Every call to a plugin goes through [`PluginContact::call`]:
//!
//! - the path is rewritten with the southbound translation table and
//!   prefixed with `https://<ip>:<port>`
//! - authentication is either basic (credentials per call) or a session
//!   token obtained once per run by [`PluginContact::login`]
//! - a transport failure with status polling enabled runs the health probe
//!   and, if the plugin reports itself alive, retries exactly once
//! - the response body is rewritten with the northbound table

use crate::cipher::CredentialCipher;
use crate::client::{HttpRequest, HttpResponse, Method, PluginClient};
use crate::failure::Failure;
use crate::health::PluginHealthChecker;
use agg_core::config::UrlTranslation;
use agg_core::{AuthType, Plugin, StatusMessage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SESSIONS_PATH: &str = "/ODIM/v1/Sessions";

/// Credentials attached to a plugin call
#[derive(Debug, Clone, PartialEq)]
pub enum PluginAuth {
    Basic { username: String, password: String },
    Token(String),
}

#[derive(Debug, Clone)]
pub struct ContactRequest<'a> {
    pub plugin: &'a Plugin,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub auth: &'a PluginAuth,
    /// Probe plugin health and retry once on transport failure
    pub status_poll: bool,
}

impl<'a> ContactRequest<'a> {
    pub fn new(plugin: &'a Plugin, auth: &'a PluginAuth, method: Method, path: impl Into<String>) -> Self {
        Self {
            plugin,
            method,
            path: path.into(),
            body: None,
            auth,
            status_poll: true,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactResponse {
    pub status: u16,
    /// Northbound-translated body
    pub body: String,
    pub token: Option<String>,
    pub location: Option<String>,
}

impl ContactResponse {
    pub fn json(&self) -> Result<Value, Failure> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Apply every substitution of `table` to `input`
pub fn translate(input: &str, table: &HashMap<String, String>) -> String {
    table
        .iter()
        .fold(input.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
}

pub struct PluginContact {
    client: Arc<dyn PluginClient>,
    cipher: Arc<dyn CredentialCipher>,
    health: PluginHealthChecker,
    translation: UrlTranslation,
}

impl PluginContact {
    pub fn new(
        client: Arc<dyn PluginClient>,
        cipher: Arc<dyn CredentialCipher>,
        health: PluginHealthChecker,
        translation: UrlTranslation,
    ) -> Self {
        Self {
            client,
            cipher,
            health,
            translation,
        }
    }

    pub fn health(&self) -> &PluginHealthChecker {
        &self.health
    }

    pub fn client(&self) -> &Arc<dyn PluginClient> {
        &self.client
    }

    pub fn plugin_url(plugin: &Plugin, path: &str) -> String {
        format!("https://{}:{}{}", plugin.ip, plugin.port, path)
    }

    /// Plaintext credentials of a plugin
    pub fn plugin_credentials(&self, plugin: &Plugin) -> Result<(String, String), Failure> {
        let password = self.cipher.decrypt(&plugin.password).map_err(|e| {
            Failure::internal(format!("error while trying to decrypt plugin password: {}", e))
        })?;
        Ok((plugin.username.clone(), String::from_utf8_lossy(&password).into_owned()))
    }

    /// Credentials for the rest of a run: basic credentials, or a fresh
    /// session token for plugins preferring `XAuthToken`.
    pub async fn login(&self, plugin: &Plugin) -> Result<PluginAuth, Failure> {
        let (username, password) = self.plugin_credentials(plugin)?;
        let basic = PluginAuth::Basic { username: username.clone(), password: password.clone() };
        if plugin.preferred_auth_type == AuthType::BasicAuth {
            return Ok(basic);
        }

        let request = ContactRequest::new(plugin, &basic, Method::Post, SESSIONS_PATH)
            .with_body(json!({"Username": username, "Password": password}));
        let response = self
            .call(&request, &format!("error while getting the details {}: ", SESSIONS_PATH))
            .await?;
        match response.token {
            Some(token) => Ok(PluginAuth::Token(token)),
            None => Err(Failure::new(
                401,
                StatusMessage::ResourceAtUriUnauthorized,
                format!("plugin {} returned no session token", plugin.id),
            )
            .with_args(vec![json!(Self::plugin_url(plugin, SESSIONS_PATH))])),
        }
    }

    fn build(&self, request: &ContactRequest<'_>, path: &str) -> HttpRequest {
        let mut http = HttpRequest::new(request.method, Self::plugin_url(request.plugin, path));
        match request.auth {
            PluginAuth::Basic { username, password } => {
                http = http.with_basic_auth(username.clone(), password.clone());
            }
            PluginAuth::Token(token) => {
                http = http.with_token(token.clone());
            }
        }
        if let Some(body) = &request.body {
            http = http.with_body(body.clone());
        }
        http
    }

    async fn send_with_retry(&self, request: &ContactRequest<'_>, path: &str) -> anyhow::Result<HttpResponse> {
        match self.client.send(self.build(request, path)).await {
            Ok(resp) => Ok(resp),
            Err(first) if request.status_poll => {
                warn!(plugin = %request.plugin.id, error = %first, "Plugin call failed, probing plugin status");
                let (alive, _) = self.health.check_plugin_status(request.plugin).await;
                if !alive {
                    return Err(first);
                }
                debug!(plugin = %request.plugin.id, "Plugin alive, retrying once");
                self.client.send(self.build(request, path)).await
            }
            Err(err) => Err(err),
        }
    }

    /// One classified plugin call; `error_prefix` starts every failure message
    pub async fn call(&self, request: &ContactRequest<'_>, error_prefix: &str) -> Result<ContactResponse, Failure> {
        let path = translate(&request.path, &self.translation.south_bound);
        let target = Self::plugin_url(request.plugin, &request.path);

        let response = self.send_with_retry(request, &path).await.map_err(|err| {
            Failure::new(
                503,
                StatusMessage::CouldNotEstablishConnection,
                format!("{}{}", error_prefix, err),
            )
            .with_args(vec![json!(target)])
        })?;

        match response.status {
            200 | 201 | 202 => {}
            401 => {
                let message = format!("{}error: invalid resource username/password", error_prefix);
                warn!(plugin = %request.plugin.id, path = %request.path, "{}", message);
                return Err(Failure::new(401, StatusMessage::ResourceAtUriUnauthorized, message)
                    .with_args(vec![json!(target)]));
            }
            status => {
                let message = format!("{}{}", error_prefix, response.body);
                warn!(plugin = %request.plugin.id, path = %request.path, status, "Plugin call failed");
                return Err(Failure::new(status, StatusMessage::InternalError, message));
            }
        }

        Ok(ContactResponse {
            status: response.status,
            body: translate(&response.body, &self.translation.north_bound),
            token: response.header("X-Auth-Token").map(str::to_string),
            location: response.header("Location").map(str::to_string),
        })
    }

    /// Follow a plugin task monitor until it stops answering 202
    pub async fn poll_task_monitor(
        &self,
        plugin: &Plugin,
        auth: &PluginAuth,
        location: &str,
        interval: Duration,
    ) -> Result<ContactResponse, Failure> {
        loop {
            tokio::time::sleep(interval).await;
            let request = ContactRequest::new(plugin, auth, Method::Get, location);
            let response = self
                .call(&request, "error while polling the plugin task monitor: ")
                .await?;
            if response.status != 202 {
                return Ok(response);
            }
            debug!(plugin = %plugin.id, location, "Plugin task still running");
        }
    }
}
