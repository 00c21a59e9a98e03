//! Connection method catalogue
//!
//! Connection methods are seeded from configuration at startup. Entries
//! the configuration no longer names are dropped unless an aggregation
//! source still points at them.

use crate::aggregator::Aggregator;
use agg_core::config::ConnectionMethodConf;
use agg_core::{tables, uris, ConnectionMethod, ConnectionMethodLinks, RpcResponse};
use agg_store::{create_json, read_json, StoreError};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info, instrument};

/// Connection method types the service can onboard through
pub const SUPPORTED_CONNECTION_METHOD_TYPES: &[&str] = &["Redfish"];

fn variant_key(method_type: &str, variant: &str) -> String {
    format!("{}:{}", method_type, variant)
}

impl Aggregator {
    /// Reconcile stored connection methods with the configured list
    #[instrument(skip(self))]
    pub async fn add_connection_methods(&self) -> Result<(), StoreError> {
        self.reconcile_connection_methods(&self.config.connection_method_conf).await
    }

    pub(crate) async fn reconcile_connection_methods(&self, configured: &[ConnectionMethodConf]) -> Result<(), StoreError> {
        let mut existing: HashMap<String, (String, ConnectionMethod)> = HashMap::new();
        for uri in self.on_disk().get_all_keys(tables::CONNECTION_METHOD).await? {
            let method: ConnectionMethod = read_json(self.on_disk(), tables::CONNECTION_METHOD, &uri).await?;
            let key = variant_key(&method.connection_method_type, &method.connection_method_variant);
            existing.insert(key, (uri, method));
        }

        for conf in configured {
            if !SUPPORTED_CONNECTION_METHOD_TYPES.contains(&conf.connection_method_type.as_str()) {
                error!(
                    method_type = %conf.connection_method_type,
                    "Connection method type is not supported"
                );
                continue;
            }
            let key = variant_key(&conf.connection_method_type, &conf.connection_method_variant);
            if existing.remove(&key).is_some() {
                info!(variant = %conf.connection_method_variant, "Connection method already present");
                continue;
            }
            let uri = format!("{}/{}", uris::CONNECTION_METHODS, uuid::Uuid::new_v4());
            let method = ConnectionMethod {
                connection_method_type: conf.connection_method_type.clone(),
                connection_method_variant: conf.connection_method_variant.clone(),
                links: ConnectionMethodLinks::default(),
            };
            create_json(self.on_disk(), tables::CONNECTION_METHOD, &uri, &method).await?;
            info!(uri = %uri, variant = %conf.connection_method_variant, "Connection method added");
        }

        for (uri, method) in existing.into_values() {
            let in_use = method.links.aggregation_sources.len();
            if in_use > 0 {
                error!(
                    uri = %uri,
                    variant = %method.connection_method_variant,
                    sources = in_use,
                    "Connection method is managing aggregation sources and can't be removed"
                );
                continue;
            }
            self.on_disk().delete(tables::CONNECTION_METHOD, &uri).await?;
            info!(uri = %uri, variant = %method.connection_method_variant, "Connection method removed");
        }
        Ok(())
    }

    pub async fn get_all_connection_methods(&self) -> RpcResponse {
        let keys = match self.on_disk().get_all_keys(tables::CONNECTION_METHOD).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("error getting connection methods: {}", e);
                return RpcResponse::internal_error(format!("error getting connection methods: {}", e));
            }
        };
        let members: Vec<Value> = keys.iter().map(|k| json!({"@odata.id": k})).collect();
        RpcResponse::ok(json!({
            "@odata.type": "#ConnectionMethodCollection.ConnectionMethodCollection",
            "@odata.id": uris::CONNECTION_METHODS,
            "@odata.context": "/redfish/v1/$metadata#ConnectionMethodCollection.ConnectionMethodCollection",
            "Name": "Connection Methods",
            "Members@odata.count": members.len(),
            "Members": members,
        }))
    }

    pub async fn get_connection_method_info(&self, url: &str) -> RpcResponse {
        let method: ConnectionMethod = match read_json(self.on_disk(), tables::CONNECTION_METHOD, url).await {
            Ok(method) => method,
            Err(e) if e.is_not_found() => {
                return RpcResponse::not_found("ConnectionMethod", url, format!("error getting connectionmethod: {}", e))
            }
            Err(e) => return RpcResponse::internal_error(format!("error getting connectionmethod: {}", e)),
        };
        let id = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        RpcResponse::ok(json!({
            "@odata.type": "#ConnectionMethod.v1_1_0.ConnectionMethod",
            "@odata.id": url,
            "@odata.context": "/redfish/v1/$metadata#ConnectionMethod.v1_1_0.ConnectionMethod",
            "Id": id,
            "Name": "Connection Method",
            "ConnectionMethodType": method.connection_method_type,
            "ConnectionMethodVariant": method.connection_method_variant,
            "Links": {"AggregationSources": method.links.aggregation_sources},
        }))
    }
}
