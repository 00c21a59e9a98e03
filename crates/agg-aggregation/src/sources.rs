//! Reading and updating aggregation sources

use crate::aggregator::Aggregator;
use crate::client::Method;
use crate::contact::ContactRequest;
use crate::failure::Failure;
use crate::offboarding::source_device_uuid;
use crate::onboarding::{source_body, VALIDATE_PATH};
use crate::traversal::links::members;
use crate::traversal::{key_formation, Progress, TraversalContext};
use crate::validation::{decode, is_empty_request, leaf, Property};
use agg_core::{
    tables, uris, AggregationSource, ConnectionMethod, ConnectionMethodVariant, Plugin, RpcResponse,
    StatusMessage, Target,
};
use agg_store::{read_json, update_json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

const UPDATE_PROPERTIES: &[Property] = &[leaf("HostName"), leaf("UserName"), leaf("Password")];

const PLUGIN_MANAGERS_PATH: &str = "/ODIM/v1/Managers";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateRequest {
    host_name: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
}

/// Credentials after applying a PATCH over the stored source
struct Credentials {
    host_name: String,
    user_name: String,
    password: String,
    host_changed: bool,
}

/// Resolve `address`, with or without a `:port` suffix
async fn validate_address(address: &str) -> Result<(), Failure> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    };
    let invalid = |detail: String| {
        Failure::new(
            400,
            StatusMessage::PropertyValueFormatError,
            format!("error: failed to resolve ManagerAddress: {}", detail),
        )
        .with_args(vec![json!(address), json!("HostName")])
    };
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(_) => Ok(()),
            None => Err(invalid(format!("no addresses for {}", host))),
        },
        Err(e) => Err(invalid(e.to_string())),
    }
}

fn allow_headers(resp: RpcResponse) -> RpcResponse {
    resp.with_header("Allow", r#""GET","PATCH","DELETE""#)
        .with_header("Cache-Control", "no-cache")
        .with_header("OData-Version", "4.0")
}

impl Aggregator {
    pub async fn get_aggregation_source_collection(&self) -> RpcResponse {
        let keys = match self.on_disk().get_all_keys(tables::AGGREGATION_SOURCE).await {
            Ok(keys) => keys,
            Err(e) => return RpcResponse::internal_error(format!("error getting aggregation sources: {}", e)),
        };
        let members: Vec<Value> = keys.iter().map(|k| json!({"@odata.id": k})).collect();
        let body = json!({
            "@odata.type": "#AggregationSourceCollection.AggregationSourceCollection",
            "@odata.id": uris::AGGREGATION_SOURCES,
            "@odata.context": "/redfish/v1/$metadata#AggregationSourceCollection.AggregationSourceCollection",
            "Name": "Aggregation Source",
            "Members@odata.count": members.len(),
            "Members": members,
        });
        RpcResponse::ok(body).with_header("Allow", r#""GET","POST""#)
    }

    pub async fn get_aggregation_source(&self, url: &str) -> RpcResponse {
        match self.load_source(url).await {
            Ok(source) => allow_headers(RpcResponse::ok(source_body(url, &source))),
            Err(failure) => failure.into_response(),
        }
    }

    async fn load_source(&self, url: &str) -> Result<AggregationSource, Failure> {
        read_json(self.on_disk(), tables::AGGREGATION_SOURCE, url).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("AggregationSource", url, format!("error getting AggregationSource: {}", e))
            } else {
                Failure::internal(format!("error getting AggregationSource: {}", e))
            }
        })
    }

    /// Change the address or credentials of a source after checking them
    /// against the plugin or device it names
    #[instrument(skip(self, body))]
    pub async fn update_aggregation_source(&self, url: &str, body: &[u8]) -> RpcResponse {
        match self.try_update_source(url, body).await {
            Ok(resp) => resp,
            Err(failure) => {
                warn!(source = %url, status = failure.status_code, "{}", failure.error_message);
                failure.into_response()
            }
        }
    }

    async fn try_update_source(&self, url: &str, body: &[u8]) -> Result<RpcResponse, Failure> {
        let mut source = self.load_source(url).await?;
        let (request, document) = decode::<UpdateRequest>(body, UPDATE_PROPERTIES)?;
        if is_empty_request(&document) {
            let param = "HostName UserName Password ";
            return Err(Failure::new(400, StatusMessage::PropertyMissing, format!("error: field {} Missing", param))
                .with_args(vec![json!(param)]));
        }
        let empty: String = [
            ("HostName", &request.host_name),
            ("UserName", &request.user_name),
            ("Password", &request.password),
        ]
        .iter()
        .filter(|(_, value)| value.as_deref() == Some(""))
        .map(|(name, _)| format!("{} ", name))
        .collect();
        if !empty.is_empty() {
            return Err(Failure::new(400, StatusMessage::PropertyMissing, format!("error: field {} Missing", empty))
                .with_args(vec![json!(empty)]));
        }

        let host_changed = request.host_name.is_some();
        if let Some(host) = &request.host_name {
            validate_address(host).await?;
        }
        let password = match request.password {
            Some(password) => password,
            None => self.decrypt(&source.password)?,
        };
        let credentials = Credentials {
            host_name: request.host_name.unwrap_or_else(|| source.host_name.clone()),
            user_name: request.user_name.unwrap_or_else(|| source.user_name.clone()),
            password,
            host_changed,
        };

        let cm_link = source
            .connection_method_link()
            .map(str::to_string)
            .ok_or_else(|| Failure::internal(format!("aggregation source {} has no connection method link", url)))?;
        let connection_method: ConnectionMethod = read_json(self.on_disk(), tables::CONNECTION_METHOD, &cm_link)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Failure::not_found("ConnectionMethod", &cm_link, e.to_string())
                } else {
                    Failure::internal(e.to_string())
                }
            })?;
        let variant = ConnectionMethodVariant::parse(&connection_method.connection_method_variant).ok_or_else(|| {
            Failure::internal(format!(
                "invalid connection method variant {}",
                connection_method.connection_method_variant
            ))
        })?;

        match self.target(source_device_uuid(url)).await {
            Ok(target) => self.update_device_source(target, &variant.plugin_id, &credentials).await?,
            Err(_) => self.update_plugin_source(&variant.plugin_id, &credentials).await?,
        }

        source.host_name = credentials.host_name;
        source.user_name = credentials.user_name;
        source.password = self.encrypt(&credentials.password)?;
        self.save_source(url, &source).await?;
        info!(source = %url, host_changed, "Aggregation source updated");
        Ok(allow_headers(RpcResponse::ok(source_body(url, &source))))
    }

    /// Check the new details against the plugin and store them on the plugin record
    async fn update_plugin_source(&self, plugin_id: &str, credentials: &Credentials) -> Result<(), Failure> {
        let mut plugin = self.plugin(plugin_id).await?;
        let Some((ip, port)) = credentials.host_name.split_once(':') else {
            return Err(Failure::new(400, StatusMessage::PropertyValueFormatError, "plugin HostName must be <ip>:<port>")
                .with_args(vec![json!(credentials.host_name), json!("HostName")]));
        };
        let report = self
            .contact
            .health()
            .probe(
                &credentials.host_name,
                &credentials.user_name,
                &credentials.password,
                plugin.preferred_auth_type,
            )
            .await?;
        if report.status_code != 200 {
            return Err(Failure::new(
                report.status_code,
                StatusMessage::InternalError,
                format!("error while getting the details {}: status {}", crate::health::STATUS_PATH, report.status_code),
            ));
        }

        let previous_uuid = plugin.manager_uuid.clone();
        plugin.ip = ip.to_string();
        plugin.port = port.to_string();
        plugin.username = credentials.user_name.clone();
        plugin.password = self.encrypt(&credentials.password)?;

        if credentials.host_changed {
            let manager_uuid = self.reported_manager_uuid(&plugin).await?;
            if manager_uuid.as_deref().unwrap_or(&previous_uuid) != previous_uuid {
                return Err(Failure::new(
                    400,
                    StatusMessage::ResourceInUse,
                    "error: uuid of the added managers is not matching with given HostName",
                ));
            }
        }

        update_json(self.on_disk(), tables::PLUGIN, plugin_id, &plugin)
            .await
            .map_err(|e| Failure::internal(format!("error while trying to update plugin info: {}", e)))?;
        debug!(plugin = %plugin_id, "Plugin record updated");
        Ok(())
    }

    /// Manager UUID the plugin at its current address reports, if any
    async fn reported_manager_uuid(&self, plugin: &Plugin) -> Result<Option<String>, Failure> {
        let auth = self.contact.login(plugin).await?;
        let fetch = |path: String| {
            let auth = auth.clone();
            async move {
                let request = ContactRequest::new(plugin, &auth, Method::Get, path.clone());
                self.contact
                    .call(&request, &format!("error while getting the details {}: ", path))
                    .await?
                    .json()
            }
        };
        let collection = fetch(PLUGIN_MANAGERS_PATH.to_string()).await?;
        let mut uuid = None;
        for member in members(&collection) {
            let manager = fetch(member).await?;
            if let Some(reported) = manager.get("UUID").and_then(Value::as_str) {
                uuid = Some(reported.to_string());
            }
        }
        Ok(uuid)
    }

    /// Validate the new device credentials through its plugin and store
    /// them on the target
    async fn update_device_source(&self, mut target: Target, plugin_id: &str, credentials: &Credentials) -> Result<(), Failure> {
        let plugin = self.plugin(plugin_id).await?;
        let auth = self.contact.login(&plugin).await?;
        let address = credentials.host_name.to_lowercase();
        let device_body = Self::device_body(&address, &credentials.user_name, &credentials.password);

        let validate = ContactRequest::new(&plugin, &auth, Method::Post, VALIDATE_PATH).with_body(device_body.clone());
        self.contact
            .call(&validate, "error while trying to authenticate the compute server: ")
            .await?;

        if credentials.host_changed {
            let ctx = TraversalContext::new(Progress::new(self.tasks.clone(), None, 0));
            let discovery = self.discovery(&plugin, &auth, &target.device_uuid, &device_body, false, &ctx);
            let collection = discovery
                .fetch(uris::SYSTEMS, "error while trying to get system collection details: ")
                .await?;
            for member in members(&collection) {
                let system = discovery
                    .fetch(&member, "error while trying to get system details: ")
                    .await?;
                let system_uuid = system.get("UUID").and_then(Value::as_str).unwrap_or_default();
                let key = key_formation(&member, &target.device_uuid);
                let indexed = self
                    .in_memory()
                    .get_index("UUID", system_uuid)
                    .await
                    .map_err(|e| Failure::internal(format!("error while trying get computer system index: {}", e)))?;
                if !indexed.contains(&key) {
                    return Err(Failure::new(
                        400,
                        StatusMessage::ResourceInUse,
                        "error: uuid of the added bmc is not matching with given HostName",
                    ));
                }
            }
        }

        target.manager_address = address.clone();
        target.user_name = credentials.user_name.clone();
        target.password = self.encrypt(&credentials.password)?;
        target.plugin_id = plugin_id.to_string();
        update_json(self.on_disk(), tables::SYSTEM, &target.device_uuid, &target)
            .await
            .map_err(|e| Failure::internal(format!("error while trying to update system info: {}", e)))?;
        if credentials.host_changed {
            let mut form = Map::new();
            form.insert("BMCAddress".into(), json!(address));
            if let Err(e) = self.in_memory().update_index(&form, &target.device_uuid).await {
                warn!(device_uuid = %target.device_uuid, "Failed to reindex BMC address: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CredentialCipher;
    use crate::onboarding::source_uri;
    use crate::testing::Harness;
    use agg_core::AuthType;
    use agg_store::{upsert_json, KvStore};
    use tokio_test::{assert_err, assert_ok};

    const VARIANT: &str = "Compute:BasicAuth:GRF_v1.0.0";

    async fn seed_source(h: &Harness, id: &str, host: &str) -> String {
        let cm = h.seed_connection_method("c1", VARIANT).await;
        let uri = source_uri(id);
        let source = AggregationSource {
            host_name: host.into(),
            user_name: "root".into(),
            password: h.cipher.encrypt(b"bmcpass").unwrap(),
            links: json!({"ConnectionMethod": {"@odata.id": cm}}),
        };
        upsert_json(h.stores.on_disk.as_ref(), tables::AGGREGATION_SOURCE, &uri, &source)
            .await
            .unwrap();
        uri
    }

    #[tokio::test]
    async fn test_validate_address() {
        assert_ok!(validate_address("127.0.0.1").await);
        assert_ok!(validate_address("127.0.0.1:45001").await);
        let err = assert_err!(validate_address("bmc.invalid:443").await);
        assert_eq!(err.status_code, 400);
        assert_eq!(err.status_message, StatusMessage::PropertyValueFormatError);
    }

    #[tokio::test]
    async fn test_get_source_hides_password() {
        let h = Harness::new();
        let uri = seed_source(&h, "dev-1.1", "10.0.0.1").await;

        let resp = h.aggregator.get_aggregation_source(&uri).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["HostName"], "10.0.0.1");
        assert_eq!(resp.body["Id"], "dev-1.1");
        assert!(resp.body.get("Password").is_none());

        let collection = h.aggregator.get_aggregation_source_collection().await;
        assert_eq!(collection.body["Members@odata.count"], 1);
        assert_eq!(collection.body["Members"][0]["@odata.id"], uri.as_str());

        let missing = h.aggregator.get_aggregation_source(&source_uri("nope")).await;
        assert_eq!(missing.status_code, 404);
    }

    #[tokio::test]
    async fn test_update_request_validation() {
        let h = Harness::new();
        let uri = seed_source(&h, "dev-1.1", "10.0.0.1").await;

        let resp = h.aggregator.update_aggregation_source(&uri, b"{}").await;
        assert_eq!(resp.status_message, StatusMessage::PropertyMissing);

        let resp = h.aggregator.update_aggregation_source(&uri, br#"{"UserName":""}"#).await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.status_message, StatusMessage::PropertyMissing);

        let resp = h.aggregator.update_aggregation_source(&uri, br#"{"Links":{}}"#).await;
        assert_eq!(resp.status_message, StatusMessage::PropertyUnknown);

        let resp = h.aggregator.update_aggregation_source(&source_uri("nope"), br#"{"UserName":"x"}"#).await;
        assert_eq!(resp.status_code, 404);
    }

    #[tokio::test]
    async fn test_update_device_source_revalidates_and_reencrypts() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        h.seed_device("dev-1", "GRF").await;
        let uri = seed_source(&h, "dev-1.1", "10.0.0.1").await;
        h.client.route(Method::Post, VALIDATE_PATH, 200, json!({}));

        let resp = h
            .aggregator
            .update_aggregation_source(&uri, br#"{"UserName":"admin","Password":"newpass"}"#)
            .await;

        assert_eq!(resp.status_code, 200, "{:?}", resp.body);
        assert_eq!(resp.body["UserName"], "admin");
        let sent = h.client.requests.lock().unwrap().last().cloned().unwrap();
        assert_eq!(sent.body.unwrap()["UserName"], "admin");

        let target: Target = read_json(h.stores.on_disk.as_ref(), tables::SYSTEM, "dev-1").await.unwrap();
        assert_eq!(target.user_name, "admin");
        assert_eq!(h.cipher.decrypt(&target.password).unwrap(), b"newpass");
        let source: AggregationSource = read_json(h.stores.on_disk.as_ref(), tables::AGGREGATION_SOURCE, &uri)
            .await
            .unwrap();
        assert_eq!(h.cipher.decrypt(&source.password).unwrap(), b"newpass");
    }

    #[tokio::test]
    async fn test_update_device_source_rejected_by_plugin() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        h.seed_device("dev-1", "GRF").await;
        let uri = seed_source(&h, "dev-1.1", "10.0.0.1").await;
        h.client.route(Method::Post, VALIDATE_PATH, 401, json!({}));

        let resp = h.aggregator.update_aggregation_source(&uri, br#"{"Password":"wrong"}"#).await;

        assert_eq!(resp.status_code, 401);
        let target: Target = read_json(h.stores.on_disk.as_ref(), tables::SYSTEM, "dev-1").await.unwrap();
        assert_eq!(h.cipher.decrypt(&target.password).unwrap(), b"bmcpass");
    }

    #[tokio::test]
    async fn test_update_device_host_checks_system_uuid() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        let key = h.seed_device("dev-1", "GRF").await;
        let uri = seed_source(&h, "dev-1.1", "10.0.0.1").await;
        h.client.route(Method::Post, VALIDATE_PATH, 200, json!({}));
        h.client.route(Method::Get, "/ODIM/v1/Systems", 200, json!({"Members": [{"@odata.id": "/ODIM/v1/Systems/1"}]}));
        h.client.route(Method::Get, "/ODIM/v1/Systems/1", 200, json!({"Id": "1", "UUID": "sys-uuid"}));

        let body = br#"{"HostName":"10.0.0.9"}"#;
        let resp = h.aggregator.update_aggregation_source(&uri, body).await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.status_message, StatusMessage::ResourceInUse);

        let mut form = Map::new();
        form.insert("UUID".into(), json!("sys-uuid"));
        h.stores.in_memory.create_index(&form, &key).await.unwrap();
        let resp = h.aggregator.update_aggregation_source(&uri, body).await;
        assert_eq!(resp.status_code, 200, "{:?}", resp.body);
        assert_eq!(
            h.stores.in_memory.get_index("BMCAddress", "10.0.0.9").await.unwrap(),
            vec!["dev-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_plugin_source() {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        let uri = seed_source(&h, "m-1", "10.0.0.2:45001").await;
        h.client.route(
            Method::Get,
            crate::health::STATUS_PATH,
            200,
            json!({"Version": "v1.0.0", "Status": {"Available": "Yes"}}),
        );
        h.client.route(Method::Get, PLUGIN_MANAGERS_PATH, 200, json!({"Members": [{"@odata.id": "/ODIM/v1/Managers/m"}]}));
        h.client.route(Method::Get, "/ODIM/v1/Managers/m", 200, json!({"UUID": "other"}));

        let resp = h.aggregator.update_aggregation_source(&uri, br#"{"UserName":"ops"}"#).await;
        assert_eq!(resp.status_code, 200, "{:?}", resp.body);
        let plugin: Plugin = read_json(h.stores.on_disk.as_ref(), tables::PLUGIN, "GRF").await.unwrap();
        assert_eq!(plugin.username, "ops");

        let resp = h
            .aggregator
            .update_aggregation_source(&uri, br#"{"HostName":"10.0.0.3:45001"}"#)
            .await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.status_message, StatusMessage::ResourceInUse);

        h.client.route(Method::Get, "/ODIM/v1/Managers/m", 200, json!({"UUID": "m-1"}));
        let resp = h
            .aggregator
            .update_aggregation_source(&uri, br#"{"HostName":"10.0.0.3:45001"}"#)
            .await;
        assert_eq!(resp.status_code, 200, "{:?}", resp.body);
        let plugin: Plugin = read_json(h.stores.on_disk.as_ref(), tables::PLUGIN, "GRF").await.unwrap();
        assert_eq!(plugin.address(), "10.0.0.3:45001");
    }
}
