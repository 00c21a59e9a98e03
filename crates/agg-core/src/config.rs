//! Configuration
//!
//! Two layers:
//!
//! - `load_environment()` reads `KEY=VALUE` files (`AGG_ENV_FILE`,
//!   `/etc/aggregation/environment`, `.env`) into the process environment
//!   without overriding variables that are already set.
//! - [`AggregationConfig`] is the typed service configuration, loaded from a
//!   JSON or YAML file with defaults for every field.
//!
//! ```rust,no_run
//! use agg_core::config::{load_environment, AggregationConfig};
//!
//! load_environment();
//! let config = AggregationConfig::load_default().unwrap().with_env_overrides();
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/aggregation/environment", ".env"];

/// Load environment variables from the first environment file found.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("AGG_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        let shown = if is_secret(&key) { "***" } else { value.as_str() };
                        debug!("Loaded: {}={}", key, shown);
                    } else {
                        skipped_count += 1;
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

fn is_secret(key: &str) -> bool {
    key.contains("KEY") || key.contains("PASSWORD") || key.contains("SECRET")
}

/// Parse a single `KEY=VALUE` line, stripping matching quotes.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional, non-empty configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub url_translation: UrlTranslation,

    #[serde(default)]
    pub add_compute_skip_resources: SkipResources,

    #[serde(default)]
    pub plugin_status_policy: PluginStatusPolicy,

    /// Number of targets rediscovered concurrently; values below 1 mean 1
    #[serde(default = "default_rediscovery_batch_size")]
    pub server_rediscovery_batch_size: i64,

    #[serde(default = "default_supported_plugin_types")]
    pub supported_plugin_types: Vec<String>,

    #[serde(default)]
    pub connection_method_conf: Vec<ConnectionMethodConf>,

    /// Directory holding message registry files shipped with the service
    #[serde(default = "default_registry_store_path")]
    pub registry_store_path: String,

    /// File holding the base64 master key for credential encryption
    #[serde(default = "default_key_path")]
    pub key_path: String,

    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,

    /// Per-request timeout for plugin calls
    #[serde(default = "default_south_bound_timeout")]
    pub south_bound_timeout_in_secs: u64,

    /// Poll interval while following a plugin task monitor
    #[serde(default = "default_task_monitor_interval")]
    pub task_monitor_interval_in_secs: u64,

    /// Durable store URL (`sqlite://...`, `redis://...` or `memory://`)
    #[serde(default = "default_on_disk_url")]
    pub on_disk_url: String,

    /// Volatile store URL (`redis://...` or `memory://`)
    #[serde(default = "default_in_memory_url")]
    pub in_memory_url: String,
}

/// Path prefix translation between this service and its plugins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTranslation {
    #[serde(default = "default_north_bound")]
    pub north_bound: HashMap<String, String>,
    #[serde(default = "default_south_bound")]
    pub south_bound: HashMap<String, String>,
}

impl Default for UrlTranslation {
    fn default() -> Self {
        Self {
            north_bound: default_north_bound(),
            south_bound: default_south_bound(),
        }
    }
}

/// Sub-resources never mirrored under a given resource type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipResources {
    #[serde(default = "default_skip_under_system")]
    pub skip_resource_list_under_system: Vec<String>,
    #[serde(default = "default_skip_under_manager")]
    pub skip_resource_list_under_manager: Vec<String>,
    #[serde(default = "default_skip_under_chassis")]
    pub skip_resource_list_under_chassis: Vec<String>,
    #[serde(default = "default_skip_under_others")]
    pub skip_resource_list_under_others: Vec<String>,
}

impl Default for SkipResources {
    fn default() -> Self {
        Self {
            skip_resource_list_under_system: default_skip_under_system(),
            skip_resource_list_under_manager: default_skip_under_manager(),
            skip_resource_list_under_chassis: default_skip_under_chassis(),
            skip_resource_list_under_others: default_skip_under_others(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatusPolicy {
    #[serde(default = "default_polling_frequency")]
    pub polling_frequency_in_mins: u64,
    #[serde(default = "default_max_retry_attempt")]
    pub max_retry_attempt: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_in_mins: u64,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_in_secs: u64,
    #[serde(default = "default_startup_batch_size")]
    pub startup_resource_batch_size: usize,
}

impl Default for PluginStatusPolicy {
    fn default() -> Self {
        Self {
            polling_frequency_in_mins: default_polling_frequency(),
            max_retry_attempt: default_max_retry_attempt(),
            retry_interval_in_mins: default_retry_interval(),
            response_timeout_in_secs: default_response_timeout(),
            startup_resource_batch_size: default_startup_batch_size(),
        }
    }
}

impl PluginStatusPolicy {
    pub fn polling_frequency(&self) -> Duration {
        Duration::from_secs(self.polling_frequency_in_mins * 60)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_in_mins * 60)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_in_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMethodConf {
    pub connection_method_type: String,
    pub connection_method_variant: String,
}

fn string_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_north_bound() -> HashMap<String, String> {
    string_map(&[("ODIM", "redfish")])
}

fn default_south_bound() -> HashMap<String, String> {
    string_map(&[("redfish", "ODIM")])
}

fn default_skip_under_system() -> Vec<String> {
    strings(&["Chassis", "LogServices", "Managers"])
}

fn default_skip_under_manager() -> Vec<String> {
    strings(&["Chassis", "LogServices", "Systems"])
}

fn default_skip_under_chassis() -> Vec<String> {
    strings(&["Managers", "Systems", "Devices"])
}

fn default_skip_under_others() -> Vec<String> {
    strings(&["Power", "Thermal", "SmartStorage"])
}

fn default_polling_frequency() -> u64 {
    30
}

fn default_max_retry_attempt() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    3
}

fn default_response_timeout() -> u64 {
    3
}

fn default_startup_batch_size() -> usize {
    10
}

fn default_rediscovery_batch_size() -> i64 {
    30
}

fn default_supported_plugin_types() -> Vec<String> {
    strings(&["Compute", "Fabric", "Storage"])
}

fn default_registry_store_path() -> String {
    "/etc/aggregation/registrystore".to_string()
}

fn default_key_path() -> String {
    "/etc/aggregation/master.key".to_string()
}

fn default_pbkdf2_iterations() -> u32 {
    100_000
}

fn default_south_bound_timeout() -> u64 {
    60
}

fn default_task_monitor_interval() -> u64 {
    5
}

fn default_on_disk_url() -> String {
    "sqlite:///var/lib/aggregation/store.db?mode=rwc".to_string()
}

fn default_in_memory_url() -> String {
    "memory://".to_string()
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            url_translation: UrlTranslation::default(),
            add_compute_skip_resources: SkipResources::default(),
            plugin_status_policy: PluginStatusPolicy::default(),
            server_rediscovery_batch_size: default_rediscovery_batch_size(),
            supported_plugin_types: default_supported_plugin_types(),
            connection_method_conf: vec![],
            registry_store_path: default_registry_store_path(),
            key_path: default_key_path(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            south_bound_timeout_in_secs: default_south_bound_timeout(),
            task_monitor_interval_in_secs: default_task_monitor_interval(),
            on_disk_url: default_on_disk_url(),
            in_memory_url: default_in_memory_url(),
        }
    }
}

impl AggregationConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).with_context(|| "Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).with_context(|| "Failed to parse JSON config")?
        };

        info!("Loaded aggregation config from {}", path.display());
        Ok(config)
    }

    /// Load from `AGG_CONFIG_FILE` or the default paths, falling back to defaults
    pub fn load_default() -> Result<Self> {
        if let Some(path) = get_config_opt("AGG_CONFIG_FILE") {
            return Self::load(path);
        }

        let paths = [
            "/etc/aggregation/aggregation.json",
            "/etc/aggregation/aggregation.yaml",
            "aggregation.json",
        ];
        for path in paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        info!("No aggregation config found, using defaults");
        Ok(Self::default())
    }

    /// Apply `AGG_*` environment overrides for store URLs and the key path
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = get_config_opt("AGG_ON_DISK_URL") {
            self.on_disk_url = url;
        }
        if let Some(url) = get_config_opt("AGG_IN_MEMORY_URL") {
            self.in_memory_url = url;
        }
        if let Some(path) = get_config_opt("AGG_KEY_PATH") {
            self.key_path = path;
        }
        self
    }

    /// Effective rediscovery concurrency (at least 1)
    pub fn rediscovery_batch_size(&self) -> usize {
        self.server_rediscovery_batch_size.max(1) as usize
    }

    pub fn south_bound_timeout(&self) -> Duration {
        Duration::from_secs(self.south_bound_timeout_in_secs)
    }

    pub fn task_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.task_monitor_interval_in_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_line() {
        assert_eq!(
            parse_env_line("FOO=\"bar baz\""),
            Some(("FOO".to_string(), "bar baz".to_string()))
        );
        assert_eq!(
            parse_env_line("FOO='bar'"),
            Some(("FOO".to_string(), "bar".to_string()))
        );
        assert!(parse_env_line("=value").is_none());
        assert!(parse_env_line("novalue").is_none());
    }

    #[test]
    fn test_defaults() {
        let config = AggregationConfig::default();
        assert_eq!(config.url_translation.south_bound.get("redfish").map(String::as_str), Some("ODIM"));
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert!(config
            .add_compute_skip_resources
            .skip_resource_list_under_system
            .contains(&"LogServices".to_string()));
    }

    #[test]
    fn test_rediscovery_batch_size_floor() {
        let mut config = AggregationConfig::default();
        config.server_rediscovery_batch_size = 0;
        assert_eq!(config.rediscovery_batch_size(), 1);
        config.server_rediscovery_batch_size = -4;
        assert_eq!(config.rediscovery_batch_size(), 1);
        config.server_rediscovery_batch_size = 8;
        assert_eq!(config.rediscovery_batch_size(), 8);
    }

    #[test]
    fn test_load_yaml_partial() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server_rediscovery_batch_size: 4\nconnection_method_conf:\n  - connection_method_type: Redfish\n    connection_method_variant: Compute:BasicAuth:GRF_v1.0.0"
        )
        .unwrap();
        let config = AggregationConfig::load(file.path()).unwrap();
        assert_eq!(config.server_rediscovery_batch_size, 4);
        assert_eq!(config.connection_method_conf.len(), 1);
        assert_eq!(config.plugin_status_policy.max_retry_attempt, 3);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"supported_plugin_types": ["Compute"], "pbkdf2_iterations": 10}}"#).unwrap();
        let config = AggregationConfig::load(file.path()).unwrap();
        assert_eq!(config.supported_plugin_types, vec!["Compute".to_string()]);
        assert_eq!(config.pbkdf2_iterations, 10);
    }
}
