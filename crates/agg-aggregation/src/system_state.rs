//! Refresh of one ComputerSystem after a state change reported by its plugin

use crate::aggregator::Aggregator;
use crate::client::Method;
use crate::contact::ContactRequest;
use crate::failure::Failure;
use crate::traversal::search_index::build_search_index;
use crate::traversal::{key_formation, rewrite_with_uuid};
use agg_core::tables;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStateUpdate {
    #[serde(rename = "SystemUUID")]
    pub system_uuid: String,
    #[serde(rename = "SystemID")]
    pub system_id: String,
    /// Systems collection URI the id is appended to, or the full system URI
    #[serde(rename = "SystemURI")]
    pub system_uri: String,
    #[serde(rename = "UpdateKey")]
    pub update_key: String,
    #[serde(rename = "UpdateVal")]
    pub update_val: String,
}

impl SystemStateUpdate {
    fn plugin_path(&self) -> String {
        if self.system_uri.ends_with('/') {
            format!("{}{}", self.system_uri, self.system_id)
        } else {
            self.system_uri.clone()
        }
    }
}

impl Aggregator {
    /// Refetch the system through its plugin, store the fresh document and
    /// set `UpdateKey = UpdateVal` on its index entry
    #[instrument(skip(self, update), fields(device_uuid = %update.system_uuid))]
    pub async fn update_system_state(&self, update: &SystemStateUpdate) -> Result<(), Failure> {
        let target = self.target(&update.system_uuid).await?;
        let device_body = self.target_device_body(&target)?;
        let plugin = self.plugin(&target.plugin_id).await?;
        let auth = self.contact.login(&plugin).await?;

        let path = update.plugin_path();
        let request = ContactRequest::new(&plugin, &auth, Method::Get, path.clone()).with_body(device_body);
        let response = self
            .contact
            .call(&request, "error while trying to get system details: ")
            .await?;

        let key = key_formation(&path, &update.system_uuid);
        let document = rewrite_with_uuid(&response.body, &update.system_uuid);
        let system: Value = serde_json::from_str(&document)?;
        self.in_memory()
            .upsert(tables::COMPUTER_SYSTEM, &key, &document)
            .await
            .map_err(|e| Failure::internal(format!("error while trying to save system data: {}", e)))?;

        let mut form = build_search_index(self.in_memory(), &system, &key).await;
        if !update.update_key.is_empty() {
            form.insert(update.update_key.clone(), json!(update.update_val));
        }
        self.in_memory()
            .update_index(&form, &key)
            .await
            .map_err(|e| Failure::internal(format!("error while trying to update the system index: {}", e)))?;
        info!(system = %key, field = %update.update_key, "System state updated");
        Ok(())
    }
}
