//! Message registry discovery
//!
//! Registries shipped with the service live as files under the registry
//! store directory; anything a plugin offers beyond those is fetched once
//! and kept in the durable store.

use super::engine::Discovery;
use super::links::members;
use agg_core::tables;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// File names present in the registry store directory
pub async fn standard_registry_files(dir: impl AsRef<Path>) -> Vec<String> {
    let dir = dir.as_ref();
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), "error while reading the files from directory: {}", e);
            return names;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names
}

/// English location of a registry file, when it is a plain URI
fn english_location(info: &Value) -> Option<String> {
    let locations = info.get("Location")?.as_array()?;
    let english = locations
        .iter()
        .find(|l| l.get("Language").and_then(Value::as_str) == Some("en"))?;
    english.get("Uri")?.as_str().map(str::to_string)
}

/// Name a registry is stored under; `#`-prefixed names fall back to the Id
fn registry_name(info: &Value) -> Option<String> {
    let name = info.get("Registry")?.as_str()?;
    if name.starts_with('#') {
        return info.get("Id").and_then(Value::as_str).map(str::to_string);
    }
    Some(name.to_string())
}

impl<'a> Discovery<'a> {
    async fn registry_exists(&self, standard: &[String], file: &str) -> bool {
        if standard.iter().any(|name| name.contains(file)) {
            return true;
        }
        self.on_disk.read(tables::REGISTRIES, file).await.is_ok()
    }

    /// Fetch every registry the plugin offers that is not already known
    pub async fn discover_registries(&self, collection: &str, allotted: u32) {
        let standard = standard_registry_files(self.registry_store_path).await;
        let body = match self
            .fetch(collection, "error while trying to get the Registries collection details: ")
            .await
        {
            Ok(body) => body,
            Err(failure) => {
                self.ctx.record(failure);
                return;
            }
        };
        let items = members(&body);
        if items.is_empty() {
            self.ctx.progress.advance(allotted).await;
            return;
        }
        let share = allotted / items.len() as u32;
        for member in &items {
            if self.ctx.progress.is_cancelled() {
                return;
            }
            self.discover_registry(member, &standard).await;
            self.ctx.progress.advance(share).await;
        }
    }

    async fn discover_registry(&self, path: &str, standard: &[String]) {
        let info = match self
            .fetch(path, "error while trying to get Registry fileinfo details: ")
            .await
        {
            Ok(info) => info,
            Err(failure) => {
                self.ctx.record(failure);
                return;
            }
        };
        let Some(name) = registry_name(&info) else {
            return;
        };
        let file = format!("{}.json", name);
        if self.registry_exists(standard, &file).await {
            debug!(registry = %file, "Registry already available");
            return;
        }
        let Some(uri) = english_location(&info) else {
            return;
        };
        let document = match self.fetch(&uri, "error while trying to get Registry file: ").await {
            Ok(document) => document,
            Err(failure) => {
                self.ctx.record(failure);
                return;
            }
        };
        match self
            .on_disk
            .create(tables::REGISTRIES, &file, &document.to_string())
            .await
        {
            Ok(()) => debug!(registry = %file, "Stored registry"),
            Err(e) if e.is_duplicate() => {}
            Err(e) => self.ctx.record(crate::failure::Failure::internal(format!(
                "error while trying to save data: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::testing::Fixture;
    use crate::traversal::context::{Progress, TraversalContext};
    use agg_store::{KvStore, MemoryStore};
    use agg_task::NoopTaskService;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_registry_name_and_location() {
        let info = json!({
            "Registry": "#Vendor.1.0",
            "Id": "Vendor.1.0",
            "Location": [
                {"Language": "fr", "Uri": "/fr"},
                {"Language": "en", "Uri": "/redfish/v1/Registries/Vendor/en"}
            ]
        });
        assert_eq!(registry_name(&info).as_deref(), Some("Vendor.1.0"));
        assert_eq!(english_location(&info).as_deref(), Some("/redfish/v1/Registries/Vendor/en"));
        assert!(english_location(&json!({"Location": [{"Language": "en", "Uri": {"x": 1}}]})).is_none());
    }

    #[tokio::test]
    async fn test_only_unknown_registries_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Base.1.11.0.json"), "{}").unwrap();

        let mut fixture = Fixture::new();
        fixture.config.registry_store_path = dir.path().to_string_lossy().into_owned();
        let client = &fixture.client;
        client.route(
            Method::Get,
            "/ODIM/v1/Registries",
            200,
            json!({"Members": [
                {"@odata.id": "/ODIM/v1/Registries/Base"},
                {"@odata.id": "/ODIM/v1/Registries/Vendor"}
            ]}),
        );
        client.route(Method::Get, "/ODIM/v1/Registries/Base", 200, json!({"Registry": "Base.1.11.0"}));
        client.route(
            Method::Get,
            "/ODIM/v1/Registries/Vendor",
            200,
            json!({"Registry": "Vendor.1.0", "Location": [{"Language": "en", "Uri": "/ODIM/v1/Registries/Vendor/en"}]}),
        );
        client.route(Method::Get, "/ODIM/v1/Registries/Vendor/en", 200, json!({"Messages": {}}));

        let store = MemoryStore::new();
        let ctx = TraversalContext::new(Progress::new(Arc::new(NoopTaskService), None, 0));
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);
        discovery.discover_registries("/redfish/v1/Registries", 5).await;

        assert!(fixture.on_disk.read(tables::REGISTRIES, "Vendor.1.0.json").await.is_ok());
        assert!(fixture.on_disk.read(tables::REGISTRIES, "Base.1.11.0.json").await.is_err());
        assert_eq!(fixture.client.calls_to("/ODIM/v1/Registries/Vendor/en"), 1);
        assert!(ctx.failure().is_none());
    }
}
