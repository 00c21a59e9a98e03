//! Recursive discovery of a device's resource graph

use super::context::TraversalContext;
use super::keys::{key_formation, resource_name, rewrite_with_uuid};
use super::links::{collect_links, filter_root_links, members, should_retrieve};
use super::search_index::build_search_index;
use crate::client::Method;
use crate::contact::{ContactRequest, PluginAuth, PluginContact};
use crate::failure::Failure;
use agg_core::config::SkipResources;
use agg_core::{tables, Plugin, StatusMessage};
use agg_store::KvStore;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// One discovery run against one device behind one plugin.
///
/// Every fetched document is persisted in the volatile store under its
/// device-namespaced key before its own links are followed. Failures are
/// recorded on the [`TraversalContext`]; a failing node aborts only its own
/// subtree.
pub struct Discovery<'a> {
    pub contact: &'a PluginContact,
    pub store: &'a dyn KvStore,
    pub on_disk: &'a dyn KvStore,
    pub skip: &'a SkipResources,
    pub registry_store_path: &'a str,
    pub plugin: &'a Plugin,
    pub auth: &'a PluginAuth,
    pub device_uuid: &'a str,
    /// `{ManagerAddress, UserName, Password}` sent with every call so the
    /// plugin knows which device to query
    pub device_body: &'a Value,
    /// Rediscovery: overwrite existing documents and index entries
    pub update_flag: bool,
    pub ctx: &'a TraversalContext,
}

impl<'a> Discovery<'a> {
    pub(crate) async fn fetch(&self, path: &str, error_prefix: &str) -> Result<Value, Failure> {
        let mut request = ContactRequest::new(self.plugin, self.auth, Method::Get, path);
        if !self.device_body.is_null() {
            request = request.with_body(self.device_body.clone());
        }
        let response = self.contact.call(&request, error_prefix).await?;
        serde_json::from_str(&response.body).map_err(|e| {
            Failure::internal(format!("error while trying unmarshal response body: {}", e))
        })
    }

    async fn fetch_recorded(&self, path: &str, error_prefix: &str) -> Option<Value> {
        match self.fetch(path, error_prefix).await {
            Ok(value) => Some(value),
            Err(failure) => {
                self.ctx.record(failure);
                None
            }
        }
    }

    /// Write a document; a duplicate key is benign unless rediscovering
    pub(crate) async fn persist(&self, table: &str, key: &str, document: &str) -> Result<(), Failure> {
        let result = if self.update_flag {
            self.store.upsert(table, key, document).await
        } else {
            self.store.create(table, key, document).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate() => {
                debug!(table, key, "Resource already persisted");
                Ok(())
            }
            Err(e) => Err(Failure::internal(format!("error while trying to save data: {}", e))),
        }
    }

    /// Discover every member of the systems collection at `collection`,
    /// each with an even share of `allotted`.
    pub async fn discover_systems(&self, collection: &str, allotted: u32) -> Result<(), Failure> {
        let body = self
            .fetch(collection, "error while trying to get system collection details: ")
            .await
            .map_err(|failure| {
                self.ctx.record(failure.clone());
                failure
            })?;
        let systems = members(&body);
        if systems.is_empty() {
            self.ctx.progress.advance(allotted).await;
            return Ok(());
        }
        let share = allotted / systems.len() as u32;

        let mut failed = Vec::new();
        let mut last_failure = None;
        for system in &systems {
            if self.ctx.progress.is_cancelled() {
                break;
            }
            if let Err(failure) = self.discover_system(system, share).await {
                failed.push(format!("{}:err-{}", system, failure.error_message));
                last_failure = Some(failure);
            }
        }
        match last_failure {
            Some(failure) => Err(Failure {
                error_message: format!(
                    "error : get system collection members failed for [{}]",
                    failed.join("; ")
                ),
                ..failure
            }),
            None => Ok(()),
        }
    }

    /// Discover one ComputerSystem, its subtree and its search index entry.
    /// Returns the system's namespaced key.
    pub async fn discover_system(&self, path: &str, allotted: u32) -> Result<String, Failure> {
        let result = self.discover_system_inner(path, allotted).await;
        if let Err(failure) = &result {
            self.ctx.record(failure.clone());
        }
        result
    }

    async fn discover_system_inner(&self, path: &str, allotted: u32) -> Result<String, Failure> {
        let system = self
            .fetch(path, "error while trying to get system collection details: ")
            .await?;
        let oid = system
            .get("@odata.id")
            .and_then(Value::as_str)
            .unwrap_or(path)
            .to_string();
        let uuid = system
            .get("UUID")
            .and_then(Value::as_str)
            .ok_or_else(|| Failure::internal(format!("system {} carries no UUID", oid)))?
            .to_string();
        let key = key_formation(&oid, self.device_uuid);

        if !self.update_flag {
            let existing = self
                .store
                .get_index("UUID", &uuid)
                .await
                .map_err(|e| Failure::internal(e.to_string()))?;
            if !existing.is_empty() {
                return Err(Failure::new(409, StatusMessage::ResourceAlreadyExists, "Resource already exists")
                    .with_args(vec![json!("ComputerSystem"), json!("ComputerSystem"), json!("ComputerSystem")]));
            }
        }

        let document = rewrite_with_uuid(&system.to_string(), self.device_uuid);
        self.persist(tables::COMPUTER_SYSTEM, &key, &document).await?;
        self.ctx.claim(path);
        self.ctx.add_system_key(key.clone());
        info!(device_uuid = %self.device_uuid, system = %key, "Discovered ComputerSystem");

        let children = filter_root_links(
            collect_links(&system, false),
            &oid,
            &self.skip.skip_resource_list_under_system,
            &self.ctx.visited(),
        );
        self.descend(children, allotted).await;

        self.write_index(&document, &key, &uuid).await?;
        Ok(key)
    }

    async fn write_index(&self, document: &str, key: &str, uuid: &str) -> Result<(), Failure> {
        let namespaced: Value = serde_json::from_str(document)?;
        let mut form = build_search_index(self.store, &namespaced, key).await;
        form.insert("UUID".into(), json!(uuid));
        let result = if self.update_flag {
            self.store.update_index(&form, key).await
        } else {
            self.store.create_index(&form, key).await
        };
        result.map_err(|e| Failure::internal(format!("error while trying save index values: {}", e)))
    }

    /// Rediscover a system's storage collection. The system identity comes
    /// from the persisted ComputerSystem, not from the storage documents.
    pub async fn discover_storage(&self, path: &str, allotted: u32) -> Result<String, Failure> {
        let result = self.discover_storage_inner(path, allotted).await;
        if let Err(failure) = &result {
            self.ctx.record(failure.clone());
        }
        result
    }

    async fn discover_storage_inner(&self, path: &str, allotted: u32) -> Result<String, Failure> {
        let storage = self
            .fetch(path, "error while trying to get system storage collection details: ")
            .await?;
        let system_uri = path
            .replace("/Storage", "")
            .replace("/Systems/", &format!("/Systems/{}:", self.device_uuid));
        let raw = self
            .store
            .read(tables::COMPUTER_SYSTEM, &system_uri)
            .await
            .map_err(|e| {
                warn!(system = %system_uri, "error while getting the systems data: {}", e);
                Failure::from(e)
            })?;
        let system: Value = serde_json::from_str(&raw)?;
        let uuid = system
            .get("UUID")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let oid = storage
            .get("@odata.id")
            .and_then(Value::as_str)
            .unwrap_or(path)
            .to_string();
        let key = key_formation(&oid, self.device_uuid);
        let document = rewrite_with_uuid(&storage.to_string(), self.device_uuid);
        self.persist(&resource_name(path, true), &key, &document).await?;
        self.ctx.claim(path);
        self.ctx.add_system_key(key.clone());

        let children = filter_root_links(
            collect_links(&storage, false),
            &oid,
            &self.skip.skip_resource_list_under_system,
            &self.ctx.visited(),
        );
        self.descend(children, allotted).await;

        self.write_index(&document, &key, &uuid).await?;
        Ok(key)
    }

    /// Discover every member of a root collection such as Chassis or Managers
    pub async fn discover_root(&self, collection: &str, skip_list: &[String], allotted: u32) {
        let prefix = format!("error while trying to get the {} collection details: ", collection);
        let Some(body) = self.fetch_recorded(collection, &prefix).await else {
            return;
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
            self.discover_member(member, skip_list, share).await;
        }
    }

    async fn discover_member(&self, path: &str, skip_list: &[String], allotted: u32) {
        let table = resource_name(path, false);
        let prefix = format!("error while trying to get {} details: ", table);
        let Some(resource) = self.fetch_recorded(path, &prefix).await else {
            return;
        };
        let oid = resource
            .get("@odata.id")
            .and_then(Value::as_str)
            .unwrap_or(path)
            .to_string();
        let key = key_formation(&oid, self.device_uuid);
        let document = rewrite_with_uuid(&resource.to_string(), self.device_uuid);
        if let Err(failure) = self.persist(&table, &key, &document).await {
            self.ctx.record(failure);
            return;
        }
        self.ctx.claim(path);
        if table == tables::CHASSIS || table == tables::MANAGERS {
            self.ctx.add_system_key(key);
        }

        let children = filter_root_links(collect_links(&resource, false), &oid, skip_list, &self.ctx.visited());
        self.descend(children, allotted).await;
    }

    /// Follow `children` concurrently, each with an even share of `allotted`.
    /// A node without children consumes its whole share.
    async fn descend(&self, children: std::collections::BTreeMap<String, bool>, allotted: u32) {
        if self.ctx.progress.is_cancelled() {
            return;
        }
        if children.is_empty() {
            self.ctx.progress.advance(allotted).await;
            return;
        }
        let share = allotted / children.len() as u32;
        let visits = children
            .into_iter()
            .map(|(link, under_oem)| self.discover_resource(link, under_oem, share));
        join_all(visits).await;
    }

    /// Fetch, persist and recurse into one nested resource
    fn discover_resource(&self, path: String, under_oem: bool, allotted: u32) -> BoxFuture<'_, ()> {
        async move {
            if self.ctx.progress.is_cancelled() || !self.ctx.claim(&path) {
                return;
            }
            let prefix = format!("error while trying to get the {} details: ", path);
            let Some(resource) = self.fetch_recorded(&path, &prefix).await else {
                return;
            };
            let key = key_formation(&path, self.device_uuid);
            let table = resource_name(&path, resource.get("Members").is_some());
            let document = rewrite_with_uuid(&resource.to_string(), self.device_uuid);
            if let Err(failure) = self.persist(&table, &key, &document).await {
                self.ctx.record(failure);
                return;
            }

            let visited = self.ctx.visited();
            let children: std::collections::BTreeMap<String, bool> = collect_links(&resource, under_oem)
                .into_iter()
                .filter(|(link, _)| {
                    should_retrieve(link, &path, &visited, &self.skip.skip_resource_list_under_others)
                })
                .collect();
            self.descend(children, allotted).await;
        }
        .boxed()
    }

    /// Discover a root collection whose members are stored without device
    /// namespacing, such as telemetry definitions or licenses
    pub async fn discover_shared_root(&self, collection: &str, allotted: u32) {
        let prefix = format!("error while trying to get the {} collection details: ", collection);
        let Some(body) = self.fetch_recorded(collection, &prefix).await else {
            return;
        };
        let items = members(&body);
        let table = resource_name(collection, true);
        if let Err(failure) = self.persist(&table, collection.trim_end_matches('/'), &body.to_string()).await {
            self.ctx.record(failure);
            return;
        }
        if items.is_empty() {
            self.ctx.progress.advance(allotted).await;
            return;
        }
        let share = allotted / items.len() as u32;
        for member in &items {
            if self.ctx.progress.is_cancelled() {
                return;
            }
            let prefix = format!("error while trying to get the {} details: ", member);
            if let Some(resource) = self.fetch_recorded(member, &prefix).await {
                let table = resource_name(member, false);
                if let Err(failure) = self.persist(&table, member.trim_end_matches('/'), &resource.to_string()).await {
                    self.ctx.record(failure);
                }
            }
            self.ctx.progress.advance(share).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use crate::traversal::context::Progress;
    use agg_store::MemoryStore;
    use agg_task::{InMemoryTaskService, NoopTaskService, TaskEvent, TaskMetrics, TaskService};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn context() -> TraversalContext {
        TraversalContext::new(Progress::new(Arc::new(NoopTaskService), None, 0))
    }

    fn seed_device(fixture: &Fixture) {
        let client = &fixture.client;
        client.route(
            Method::Get,
            "/ODIM/v1/Systems",
            200,
            json!({"Members": [{"@odata.id": "/ODIM/v1/Systems/1"}]}),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Systems/1",
            200,
            json!({
                "@odata.id": "/ODIM/v1/Systems/1",
                "Id": "1",
                "UUID": "5d1f3e0a-0000-0000-0000-000000000001",
                "PowerState": "On",
                "Bios": {"@odata.id": "/ODIM/v1/Systems/1/Bios"},
                "Memory": {"@odata.id": "/ODIM/v1/Systems/1/Memory"},
                "LogServices": {"@odata.id": "/ODIM/v1/Systems/1/LogServices"},
                "Links": {"Chassis": [{"@odata.id": "/ODIM/v1/Chassis/1"}]}
            }),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Systems/1/Bios",
            200,
            json!({"@odata.id": "/ODIM/v1/Systems/1/Bios", "Id": "Bios",
                   "Links": {"Memory": {"@odata.id": "/ODIM/v1/Systems/1/Memory"}}}),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Systems/1/Memory",
            200,
            json!({"@odata.id": "/ODIM/v1/Systems/1/Memory",
                   "Members": [{"@odata.id": "/ODIM/v1/Systems/1/Memory/DIMM1"}],
                   "Parent": {"@odata.id": "/ODIM/v1/Systems/1/Bios"}}),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Systems/1/Memory/DIMM1",
            200,
            json!({"@odata.id": "/ODIM/v1/Systems/1/Memory/DIMM1", "Id": "DIMM1"}),
        );
    }

    #[tokio::test]
    async fn test_discover_systems_persists_namespaced_tree() {
        let fixture = Fixture::new();
        seed_device(&fixture);
        let store = MemoryStore::new();
        let ctx = context();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery.discover_systems("/redfish/v1/Systems", 60).await.unwrap();

        let system = store
            .read(tables::COMPUTER_SYSTEM, "/redfish/v1/Systems/dev1:1")
            .await
            .unwrap();
        assert!(system.contains("/redfish/v1/Chassis/dev1:1"));
        assert!(store.read("Bios", "/redfish/v1/Systems/dev1:1/Bios").await.is_ok());
        assert!(store
            .read("MemoryCollection", "/redfish/v1/Systems/dev1:1/Memory")
            .await
            .is_ok());
        assert!(store
            .read("Memory", "/redfish/v1/Systems/dev1:1/Memory/DIMM1")
            .await
            .is_ok());
        assert!(store
            .get_all_matching("LogServicesCollection", "dev1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(ctx.system_keys(), vec!["/redfish/v1/Systems/dev1:1"]);
        assert_eq!(
            store.get_index("UUID", "5d1f3e0a-0000-0000-0000-000000000001").await.unwrap(),
            vec!["/redfish/v1/Systems/dev1:1"]
        );
        assert!(ctx.failure().is_none());
    }

    #[tokio::test]
    async fn test_each_link_fetched_once() {
        let fixture = Fixture::new();
        seed_device(&fixture);
        let store = MemoryStore::new();
        let ctx = context();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery.discover_systems("/redfish/v1/Systems", 60).await.unwrap();

        assert_eq!(fixture.client.calls_to("/ODIM/v1/Systems/1/Memory"), 1);
        assert_eq!(fixture.client.calls_to("/ODIM/v1/Systems/1/Bios"), 1);
        assert_eq!(fixture.client.calls_to("/ODIM/v1/Systems/1/LogServices"), 0);
    }

    #[tokio::test]
    async fn test_same_system_uuid_is_rejected() {
        let fixture = Fixture::new();
        seed_device(&fixture);
        let store = MemoryStore::new();
        let auth = fixture.basic_auth();

        let first = context();
        fixture
            .discovery(&store, &auth, "dev1", &first)
            .discover_systems("/redfish/v1/Systems", 60)
            .await
            .unwrap();

        let second = context();
        let err = fixture
            .discovery(&store, &auth, "dev2", &second)
            .discover_systems("/redfish/v1/Systems", 60)
            .await
            .unwrap_err();
        assert_eq!(err.status_code, 409);
        assert_eq!(err.status_message, StatusMessage::ResourceAlreadyExists);
        assert!(store
            .read(tables::COMPUTER_SYSTEM, "/redfish/v1/Systems/dev2:1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_child_is_recorded_without_aborting_siblings() {
        let fixture = Fixture::new();
        seed_device(&fixture);
        fixture
            .client
            .route(Method::Get, "/ODIM/v1/Systems/1/Bios", 500, json!({"error": "boom"}));
        let store = MemoryStore::new();
        let ctx = context();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery.discover_systems("/redfish/v1/Systems", 60).await.unwrap();

        assert_eq!(ctx.failure().map(|f| f.status_code), Some(500));
        assert!(store
            .read("Memory", "/redfish/v1/Systems/dev1:1/Memory/DIMM1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_discover_root_uses_its_skip_list() {
        let fixture = Fixture::new();
        let client = &fixture.client;
        client.route(
            Method::Get,
            "/ODIM/v1/Chassis",
            200,
            json!({"Members": [{"@odata.id": "/ODIM/v1/Chassis/1"}]}),
        );
        client.route(
            Method::Get,
            "/ODIM/v1/Chassis/1",
            200,
            json!({
                "@odata.id": "/ODIM/v1/Chassis/1",
                "Id": "1",
                "Power": {"@odata.id": "/ODIM/v1/Chassis/1/Power"},
                "Links": {"ComputerSystems": [{"@odata.id": "/ODIM/v1/Systems/1"}]}
            }),
        );
        client.route(Method::Get, "/ODIM/v1/Chassis/1/Power", 200, json!({"@odata.id": "/ODIM/v1/Chassis/1/Power"}));
        let store = MemoryStore::new();
        let ctx = context();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery
            .discover_root("/redfish/v1/Chassis", &fixture.config.add_compute_skip_resources.skip_resource_list_under_chassis, 15)
            .await;

        assert!(store.read(tables::CHASSIS, "/redfish/v1/Chassis/dev1:1").await.is_ok());
        assert!(store.read("Power", "/redfish/v1/Chassis/dev1:1/Power").await.is_ok());
        assert_eq!(fixture.client.calls_to("/ODIM/v1/Systems/1"), 0);
        assert_eq!(ctx.system_keys(), vec!["/redfish/v1/Chassis/dev1:1"]);
    }

    #[tokio::test]
    async fn test_children_share_truncates() {
        let fixture = Fixture::new();
        let mut children = BTreeMap::new();
        for name in ["A", "B", "C"] {
            let path = format!("/ODIM/v1/Systems/1/{}", name);
            fixture.client.route(Method::Get, &path, 200, json!({"@odata.id": path, "Id": name}));
            children.insert(format!("/redfish/v1/Systems/1/{}", name), false);
        }
        let store = MemoryStore::new();
        let ctx = context();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery.descend(children, 10).await;

        assert_eq!(ctx.progress.current().await, 9);
        assert!(store.read("A", "/redfish/v1/Systems/dev1:1/A").await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let fixture = Fixture::new();
        seed_device(&fixture);
        let service = Arc::new(InMemoryTaskService::new(Arc::new(TaskMetrics::new().unwrap())));
        let task_id = service.create_task("admin").await;
        let mut events = service.subscribe();
        let ctx = TraversalContext::new(Progress::new(service.clone(), Some(task_id.clone()), 10));
        let store = MemoryStore::new();
        let auth = fixture.basic_auth();
        let discovery = fixture.discovery(&store, &auth, "dev1", &ctx);

        discovery.discover_systems("/redfish/v1/Systems", 60).await.unwrap();

        let mut seen = vec![10];
        while let Ok(event) = events.try_recv() {
            if let TaskEvent::Updated(id, _, percent) = event {
                if id == task_id {
                    seen.push(percent);
                }
            }
        }
        assert!(seen.len() > 2, "{:?}", seen);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", seen);
        assert!(*seen.last().unwrap() <= 70);
    }
}
