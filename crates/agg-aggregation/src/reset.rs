//! Reset and SetDefaultBootOrder across systems and aggregates
//!
//! Every system gets its own sub-task under the request's task. Targets are
//! fanned out with [`run_batched`]; an aggregate named as a target expands
//! into its elements under one intermediate sub-task. The request succeeds
//! only when every unit did, otherwise the highest failing status is
//! returned and the caller is pointed at the sub-tasks.

use crate::aggregates::aggregate_url;
use crate::aggregator::{Aggregator, TaskInfo};
use crate::batch::{run_batched, BatchOutcome};
use crate::client::Method;
use crate::contact::ContactRequest;
use crate::failure::Failure;
use crate::traversal::Progress;
use crate::validation::{decode, is_empty_request, leaf, node, property_missing, Property, ODATA_LINK};
use agg_core::{split_system_id, tables, OdataId, RpcResponse, StatusMessage};
use agg_store::upsert_json;
use agg_task::{task_id_from_uri, TaskState, TaskStatus, TaskUpdate, TASK_URI_PREFIX};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const RESET_TARGET: &str = "/redfish/v1/AggregationService/Actions/AggregationService.Reset/";
pub const BOOT_ORDER_TARGET: &str = "/redfish/v1/AggregationService/Actions/AggregationService.SetDefaultBootOrder";

const RESET_PROPERTIES: &[Property] = &[
    leaf("BatchSize"),
    leaf("DelayBetweenBatchesInSeconds"),
    leaf("ResetType"),
    leaf("TargetURIs"),
];

const AGGREGATE_RESET_PROPERTIES: &[Property] = &[
    leaf("BatchSize"),
    leaf("DelayBetweenBatchesInSeconds"),
    leaf("ResetType"),
];

const BOOT_ORDER_PROPERTIES: &[Property] = &[node("Systems", ODATA_LINK)];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResetRequest {
    #[serde(default)]
    batch_size: usize,
    #[serde(default)]
    delay_between_batches_in_seconds: u64,
    #[serde(default)]
    reset_type: String,
    #[serde(rename = "TargetURIs", default)]
    target_uris: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BootOrderRequest {
    #[serde(rename = "Systems", default)]
    systems: Vec<OdataId>,
}

/// Action performed on each ComputerSystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAction {
    Reset { reset_type: String },
    SetDefaultBootOrder,
}

impl SystemAction {
    fn name(&self) -> &'static str {
        match self {
            SystemAction::Reset { .. } => "Reset",
            SystemAction::SetDefaultBootOrder => "SetDefaultBootOrder",
        }
    }

    fn plugin_path(&self, system_id: &str) -> String {
        format!("/ODIM/v1/Systems/{}/Actions/ComputerSystem.{}", system_id, self.name())
    }

    fn post_body(&self) -> Value {
        match self {
            SystemAction::Reset { reset_type } => json!({"ResetType": reset_type}),
            SystemAction::SetDefaultBootOrder => json!({}),
        }
    }

    /// Map a failed unit onto the response the caller sees
    fn classify(&self, failure: Failure, element: &str) -> Failure {
        match self {
            SystemAction::Reset { .. } => failure,
            SystemAction::SetDefaultBootOrder => match failure.status_code {
                401 => Failure {
                    status_message: StatusMessage::ResourceAtUriUnauthorized,
                    message_args: vec![json!(element)],
                    ..failure
                },
                404 => Failure {
                    status_message: StatusMessage::ResourceNotFound,
                    message_args: vec![json!("option"), json!("SetDefaultBootOrder")],
                    ..failure
                },
                _ => Failure::internal(failure.error_message),
            },
        }
    }
}

/// One batch target: a system URI or an aggregate to expand
#[derive(Debug, Clone)]
enum ActionTarget {
    System(String),
    Aggregate(String),
}

impl ActionTarget {
    fn from_uri(uri: &str) -> Self {
        if uri.contains("/AggregationService/Aggregates") {
            ActionTarget::Aggregate(uri.to_string())
        } else {
            ActionTarget::System(uri.to_string())
        }
    }
}

/// Everything a unit needs, owned so it can run on its own task
#[derive(Clone)]
struct UnitContext {
    aggregator: Aggregator,
    parent_task: String,
    session_user: String,
    action: SystemAction,
    request_body: Value,
}

fn summary(task_id: &str, outcome: &BatchOutcome, action: &SystemAction) -> RpcResponse {
    if outcome.status_code == 200 && outcome.failed == 0 {
        info!(
            task_id,
            total = outcome.total,
            "All {} actions are successfully completed",
            action.name()
        );
        return RpcResponse::completed(200, StatusMessage::Success);
    }
    let message = format!(
        "one or more of the {} actions failed. for more information please check SubTasks in URI: {}{}",
        action.name().to_lowercase(),
        TASK_URI_PREFIX,
        task_id
    );
    error!(task_id, failed = outcome.failed, "{}", message);
    RpcResponse::error(outcome.status_code, StatusMessage::GeneralError, message, vec![])
}

impl Aggregator {
    /// `{BatchSize, DelayBetweenBatchesInSeconds, ResetType, TargetURIs}`
    #[instrument(skip(self, body), fields(task_id = %task_id))]
    pub async fn reset(&self, task_id: &str, session_user: &str, body: &[u8]) -> RpcResponse {
        let mut info = TaskInfo::new(task_id, RESET_TARGET, "POST", Value::Null);
        let (request, document) = match decode::<ResetRequest>(body, RESET_PROPERTIES) {
            Ok(decoded) => decoded,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        info.request_body = document.clone();
        let missing = if is_empty_request(&document) {
            Some(("ResetRequest", "ResetRequest is empty"))
        } else if request.reset_type.is_empty() {
            Some(("ResetType", "property ResetType missing in the reset request"))
        } else if request.target_uris.is_empty() {
            Some(("TargetURIs", "property TargetURIs missing/no resources found in the reset request"))
        } else {
            None
        };
        if let Some((property, message)) = missing {
            let failure = property_missing(property, format!("Unable to validate request fields: {}", message));
            return self.fail(Some(&info), failure.into_response()).await;
        }

        let targets = request.target_uris.iter().map(|uri| ActionTarget::from_uri(uri)).collect();
        let action = SystemAction::Reset {
            reset_type: request.reset_type,
        };
        self.run_action(
            info,
            session_user,
            action,
            targets,
            request.batch_size,
            Duration::from_secs(request.delay_between_batches_in_seconds),
        )
        .await
    }

    /// Reset every element of the aggregate at or above `url`
    #[instrument(skip(self, body), fields(task_id = %task_id))]
    pub async fn reset_elements_of_aggregate(&self, task_id: &str, session_user: &str, url: &str, body: &[u8]) -> RpcResponse {
        let mut info = TaskInfo::new(task_id, url, "POST", Value::Null);
        let (request, document) = match decode::<ResetRequest>(body, AGGREGATE_RESET_PROPERTIES) {
            Ok(decoded) => decoded,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        info.request_body = document;
        if request.reset_type.is_empty() {
            let failure = property_missing("ResetType", "property ResetType missing in the reset request");
            return self.fail(Some(&info), failure.into_response()).await;
        }
        let elements = match self.aggregate_elements(url).await {
            Ok(elements) => elements,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        let action = SystemAction::Reset {
            reset_type: request.reset_type,
        };
        self.run_action(
            info,
            session_user,
            action,
            elements.into_iter().map(ActionTarget::System).collect(),
            request.batch_size,
            Duration::from_secs(request.delay_between_batches_in_seconds),
        )
        .await
    }

    /// `{Systems: [{@odata.id}]}`
    #[instrument(skip(self, body), fields(task_id = %task_id))]
    pub async fn set_default_boot_order(&self, task_id: &str, session_user: &str, body: &[u8]) -> RpcResponse {
        let mut info = TaskInfo::new(task_id, BOOT_ORDER_TARGET, "POST", Value::Null);
        let (request, document) = match decode::<BootOrderRequest>(body, BOOT_ORDER_PROPERTIES) {
            Ok(decoded) => decoded,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        info.request_body = document;
        if request.systems.is_empty() {
            let failure = property_missing("Systems", "error while trying to validate request fields");
            return self.fail(Some(&info), failure.into_response()).await;
        }
        let targets = request
            .systems
            .into_iter()
            .map(|system| ActionTarget::System(system.odata_id))
            .collect();
        self.run_action(info, session_user, SystemAction::SetDefaultBootOrder, targets, 0, Duration::ZERO)
            .await
    }

    /// Set the default boot order on every element of the aggregate at or above `url`
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn set_default_boot_order_elements_of_aggregate(&self, task_id: &str, session_user: &str, url: &str) -> RpcResponse {
        let info = TaskInfo::new(task_id, url, "POST", Value::Null);
        let elements = match self.aggregate_elements(url).await {
            Ok(elements) => elements,
            Err(failure) => return self.fail(Some(&info), failure.into_response()).await,
        };
        self.run_action(
            info,
            session_user,
            SystemAction::SetDefaultBootOrder,
            elements.into_iter().map(ActionTarget::System).collect(),
            0,
            Duration::ZERO,
        )
        .await
    }

    async fn aggregate_elements(&self, url: &str) -> Result<Vec<String>, Failure> {
        let Some((aggregate_key, _)) = aggregate_url(url) else {
            return Err(Failure::not_found("Aggregate", url, "invalid aggregate URI"));
        };
        let aggregate = self.load_aggregate(&aggregate_key).await?;
        Ok(aggregate.elements.into_iter().map(|e| e.odata_id).collect())
    }

    async fn run_action(
        &self,
        info: TaskInfo,
        session_user: &str,
        action: SystemAction,
        targets: Vec<ActionTarget>,
        batch_size: usize,
        delay: Duration,
    ) -> RpcResponse {
        if let Err(e) = self.tasks.update_task(TaskUpdate::running(&info.task_id, 0)).await {
            warn!(task_id = %info.task_id, "Failed to mark task running: {}", e);
        }
        let unit = UnitContext {
            aggregator: self.clone(),
            parent_task: info.task_id.clone(),
            session_user: session_user.to_string(),
            action: action.clone(),
            request_body: info.request_body.clone(),
        };
        let progress = self.progress(&info.task_id);
        let outcome = run_batched(targets, batch_size, delay, &progress, move |target| {
            let unit = unit.clone();
            async move { unit.run(target).await }
        })
        .await;

        let resp = summary(&info.task_id, &outcome, &action);
        if outcome.cancelled {
            info!(task_id = %info.task_id, "Batch action cancelled");
            return resp;
        }
        if resp.status_code != 200 {
            return self.fail(Some(&info), resp).await;
        }
        let status = if outcome.failed > 0 { TaskStatus::Warning } else { TaskStatus::Ok };
        self.finish_task(&info, TaskState::Completed, status, &resp).await;
        resp
    }
}

impl UnitContext {
    fn run(self, target: ActionTarget) -> BoxFuture<'static, u16> {
        async move {
            match target {
                ActionTarget::System(uri) => self.run_system(&uri).await,
                ActionTarget::Aggregate(uri) => self.run_aggregate(&uri).await,
            }
        }
        .boxed()
    }

    async fn child_task(&self) -> Option<String> {
        match self
            .aggregator
            .tasks
            .create_child_task(&self.session_user, &self.parent_task)
            .await
        {
            Ok(uri) => Some(task_id_from_uri(&uri).to_string()),
            Err(e) => {
                error!(parent = %self.parent_task, "error while trying to create sub task: {}", e);
                None
            }
        }
    }

    /// Expand an aggregate into its elements under one sub-task
    async fn run_aggregate(&self, uri: &str) -> u16 {
        let Some(sub_task) = self.child_task().await else {
            return 500;
        };
        let info = TaskInfo::new(&sub_task, uri, "POST", self.request_body.clone());
        let elements = match self.aggregator.aggregate_elements(uri).await {
            Ok(elements) => elements,
            Err(failure) => {
                let status = failure.status_code;
                self.aggregator.fail(Some(&info), failure.into_response()).await;
                return status;
            }
        };
        let nested = UnitContext {
            parent_task: sub_task.clone(),
            ..self.clone()
        };
        let progress = Progress::new(self.aggregator.tasks.clone(), Some(sub_task.clone()), 0);
        let targets = elements.into_iter().map(ActionTarget::System).collect();
        let outcome = run_batched(targets, 0, Duration::ZERO, &progress, move |target| {
            let unit = nested.clone();
            async move { unit.run(target).await }
        })
        .await;

        let resp = summary(&sub_task, &outcome, &self.action);
        if resp.status_code == 200 {
            self.aggregator
                .finish_task(&info, TaskState::Completed, TaskStatus::Ok, &resp)
                .await;
        } else {
            self.aggregator.fail(Some(&info), resp).await;
        }
        outcome.status_code
    }

    async fn run_system(&self, uri: &str) -> u16 {
        let Some(sub_task) = self.child_task().await else {
            return 500;
        };
        let info = TaskInfo::new(&sub_task, uri, "POST", self.request_body.clone());
        match self.perform(uri).await {
            Ok(resp) => {
                self.aggregator
                    .finish_task(&info, TaskState::Completed, TaskStatus::Ok, &resp)
                    .await;
                if let SystemAction::Reset { reset_type } = &self.action {
                    let record = json!({"ResetType": reset_type});
                    if let Err(e) = upsert_json(self.aggregator.in_memory(), tables::SYSTEM_RESET, uri, &record).await {
                        warn!(system = %uri, "Failed to record reset info: {}", e);
                    }
                }
                info!(system = %uri, action = self.action.name(), "System action completed");
                200
            }
            Err(failure) => {
                let failure = self.action.classify(failure, uri);
                let status = failure.status_code;
                warn!(system = %uri, status, "{}", failure.error_message);
                self.aggregator.fail(Some(&info), failure.into_response()).await;
                status
            }
        }
    }

    /// Send the action to the plugin managing `uri` and follow its task monitor
    async fn perform(&self, uri: &str) -> Result<RpcResponse, Failure> {
        let aggregator = &self.aggregator;
        let (device_uuid, system_id) = split_system_id(uri).ok_or_else(|| {
            Failure::not_found("SystemUUID", "", format!("error: SystemUUID not found in {}", uri))
        })?;
        let target = aggregator.target(device_uuid).await?;
        let mut body = aggregator.target_device_body(&target)?;
        let plugin = aggregator.plugin(&target.plugin_id).await?;
        let auth = aggregator.contact.login(&plugin).await?;

        if let Some(object) = body.as_object_mut() {
            object.insert("PostBody".into(), self.action.post_body());
        }
        let path = self.action.plugin_path(system_id);
        let request = ContactRequest::new(&plugin, &auth, Method::Post, path).with_body(body);
        let prefix = format!("error while performing {} on {}: ", self.action.name(), uri);
        let mut response = aggregator.contact.call(&request, &prefix).await?;
        if response.status == 202 {
            if let Some(location) = response.location.clone() {
                response = aggregator
                    .contact
                    .poll_task_monitor(&plugin, &auth, &location, aggregator.config.task_monitor_interval())
                    .await?;
            }
        }
        let body = serde_json::from_str(&response.body).unwrap_or(Value::Null);
        Ok(RpcResponse::new(200, StatusMessage::Success, body).with_header("Location", uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpResponse;
    use crate::testing::Harness;
    use agg_core::{Aggregate, AuthType};
    use agg_store::KvStore;
    use agg_task::TaskService;

    async fn harness_with_devices(n: usize) -> (Harness, Vec<String>) {
        let h = Harness::new();
        h.seed_plugin(&h.plugin(AuthType::BasicAuth)).await;
        let mut systems = Vec::new();
        for i in 0..n {
            systems.push(h.seed_device(&format!("dev-{}", i), "GRF").await);
        }
        (h, systems)
    }

    fn reset_body(targets: &[String]) -> Vec<u8> {
        json!({"BatchSize": 0, "DelayBetweenBatchesInSeconds": 0, "ResetType": "ForceRestart", "TargetURIs": targets})
            .to_string()
            .into_bytes()
    }

    const RESET_PATH: &str = "/ODIM/v1/Systems/1/Actions/ComputerSystem.Reset";

    #[tokio::test]
    async fn test_reset_all_targets_succeed() {
        let (h, systems) = harness_with_devices(2).await;
        h.client.route(Method::Post, RESET_PATH, 200, json!({"Status": "done"}));
        let task = h.new_task().await;

        let resp = h.aggregator.reset(&task, "admin", &reset_body(&systems)).await;

        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["message"], "Request completed successfully");
        let parent = h.tasks.get_task(&task).await.unwrap();
        assert_eq!(parent.state, TaskState::Completed);
        assert_eq!(parent.child_ids.len(), 2);
        for child in &parent.child_ids {
            let child = h.tasks.get_task(child).await.unwrap();
            assert_eq!(child.state, TaskState::Completed);
        }
        assert!(h.stores.in_memory.read(tables::SYSTEM_RESET, &systems[0]).await.is_ok());
        let sent = h.client.requests.lock().unwrap();
        let post = sent.iter().find(|r| r.method == Method::Post).unwrap();
        assert_eq!(post.body.as_ref().unwrap()["PostBody"]["ResetType"], "ForceRestart");
    }

    #[tokio::test]
    async fn test_reset_partial_failure_surfaces_highest_status() {
        let (h, systems) = harness_with_devices(3).await;
        h.client.route(Method::Post, RESET_PATH, 200, json!({}));
        // The first reset request gets a 503, the others succeed
        h.client
            .enqueue(Method::Post, RESET_PATH, Ok(HttpResponse::new(503, "{}")));
        let task = h.new_task().await;

        let resp = h.aggregator.reset(&task, "admin", &reset_body(&systems)).await;

        assert_eq!(resp.status_code, 503);
        assert!(resp.error_message().unwrap_or_default().contains("SubTasks"));
        let parent = h.tasks.get_task(&task).await.unwrap();
        assert_eq!(parent.state, TaskState::Exception);
        let mut states = Vec::new();
        for child in &parent.child_ids {
            states.push(h.tasks.get_task(child).await.unwrap().state);
        }
        assert_eq!(states.iter().filter(|s| **s == TaskState::Exception).count(), 1);
        assert_eq!(states.iter().filter(|s| **s == TaskState::Completed).count(), 2);
    }

    #[tokio::test]
    async fn test_reset_follows_task_monitor() {
        let (h, systems) = harness_with_devices(1).await;
        h.client.route_response(
            Method::Post,
            RESET_PATH,
            HttpResponse::new(202, "{}").with_header("Location", "/taskmon/1"),
        );
        h.client.enqueue(Method::Get, "/taskmon/1", Ok(HttpResponse::new(202, "{}")));
        h.client.route(Method::Get, "/taskmon/1", 200, json!({"TaskState": "Completed"}));
        let task = h.new_task().await;

        let resp = h.aggregator.reset(&task, "admin", &reset_body(&systems)).await;

        assert_eq!(resp.status_code, 200);
        assert_eq!(h.client.calls_to("/taskmon/1"), 2);
    }

    #[tokio::test]
    async fn test_reset_expands_aggregates() {
        let (h, systems) = harness_with_devices(2).await;
        h.client.route(Method::Post, RESET_PATH, 200, json!({}));
        let url = "/redfish/v1/AggregationService/Aggregates/a1".to_string();
        let aggregate = Aggregate {
            elements: systems.iter().map(|s| OdataId::new(s.clone())).collect(),
        };
        upsert_json(h.stores.on_disk.as_ref(), tables::AGGREGATE, &url, &aggregate).await.unwrap();
        let task = h.new_task().await;

        let resp = h.aggregator.reset(&task, "admin", &reset_body(&[url])).await;

        assert_eq!(resp.status_code, 200);
        let parent = h.tasks.get_task(&task).await.unwrap();
        assert_eq!(parent.child_ids.len(), 1);
        let sub = h.tasks.get_task(&parent.child_ids[0]).await.unwrap();
        assert_eq!(sub.child_ids.len(), 2);
        assert_eq!(h.client.calls_to(RESET_PATH), 2);
    }

    #[tokio::test]
    async fn test_reset_request_validation() {
        let h = Harness::new();
        let task = h.new_task().await;
        let cases: &[(&[u8], StatusMessage, Option<&str>)] = &[
            (b"{", StatusMessage::MalformedJson, None),
            (b"{}", StatusMessage::PropertyMissing, Some("ResetRequest")),
            (br#"{"TargetURIs":["/redfish/v1/Systems/a:1"]}"#, StatusMessage::PropertyMissing, Some("ResetType")),
            (br#"{"ResetType":"On"}"#, StatusMessage::PropertyMissing, Some("TargetURIs")),
            (br#"{"resetType":"On"}"#, StatusMessage::PropertyUnknown, Some("resetType")),
        ];
        for (body, message, arg) in cases {
            let resp = h.aggregator.reset(&task, "admin", body).await;
            assert_eq!(resp.status_code, 400);
            assert_eq!(resp.status_message, *message);
            if let Some(arg) = arg {
                assert_eq!(resp.body["error"]["@Message.ExtendedInfo"][0]["MessageArgs"][0], *arg);
            }
        }
    }

    #[tokio::test]
    async fn test_reset_unknown_target_is_not_found() {
        let (h, _) = harness_with_devices(0).await;
        let task = h.new_task().await;
        let resp = h
            .aggregator
            .reset(&task, "admin", &reset_body(&["/redfish/v1/Systems/ghost:1".to_string()]))
            .await;
        assert_eq!(resp.status_code, 404);

        let resp = h
            .aggregator
            .reset(&task, "admin", &reset_body(&["/redfish/v1/Systems/no-separator".to_string()]))
            .await;
        assert_eq!(resp.status_code, 404);
    }

    #[tokio::test]
    async fn test_set_default_boot_order_maps_failures() {
        let (h, systems) = harness_with_devices(1).await;
        let path = "/ODIM/v1/Systems/1/Actions/ComputerSystem.SetDefaultBootOrder";
        let body = json!({"Systems": [{"@odata.id": systems[0]}]}).to_string().into_bytes();

        h.client.route(Method::Post, path, 200, json!({}));
        let task = h.new_task().await;
        assert_eq!(h.aggregator.set_default_boot_order(&task, "admin", &body).await.status_code, 200);

        h.client.route(Method::Post, path, 404, json!({}));
        let task = h.new_task().await;
        let resp = h.aggregator.set_default_boot_order(&task, "admin", &body).await;
        assert_eq!(resp.status_code, 404);
        let parent = h.tasks.get_task(&task).await.unwrap();
        let child = h.tasks.get_task(&parent.child_ids[0]).await.unwrap();
        let payload = child.payload.unwrap();
        assert_eq!(
            payload.response_body["error"]["@Message.ExtendedInfo"][0]["MessageArgs"],
            json!(["option", "SetDefaultBootOrder"])
        );

        h.client.route(Method::Post, path, 502, json!({}));
        let task = h.new_task().await;
        assert_eq!(h.aggregator.set_default_boot_order(&task, "admin", &body).await.status_code, 500);

        let task = h.new_task().await;
        let resp = h.aggregator.set_default_boot_order(&task, "admin", br#"{"Systems":[]}"#).await;
        assert_eq!(resp.status_message, StatusMessage::PropertyMissing);
    }

    #[tokio::test]
    async fn test_aggregate_actions() {
        let (h, systems) = harness_with_devices(2).await;
        h.client.route(Method::Post, RESET_PATH, 200, json!({}));
        h.client
            .route(Method::Post, "/ODIM/v1/Systems/1/Actions/ComputerSystem.SetDefaultBootOrder", 200, json!({}));
        let url = "/redfish/v1/AggregationService/Aggregates/a1";
        let aggregate = Aggregate {
            elements: systems.iter().map(|s| OdataId::new(s.clone())).collect(),
        };
        upsert_json(h.stores.on_disk.as_ref(), tables::AGGREGATE, url, &aggregate).await.unwrap();

        let task = h.new_task().await;
        let resp = h
            .aggregator
            .reset_elements_of_aggregate(
                &task,
                "admin",
                &format!("{}/Actions/Aggregate.Reset", url),
                br#"{"BatchSize":1,"DelayBetweenBatchesInSeconds":0,"ResetType":"On"}"#,
            )
            .await;
        assert_eq!(resp.status_code, 200);

        let task = h.new_task().await;
        let resp = h
            .aggregator
            .set_default_boot_order_elements_of_aggregate(&task, "admin", url)
            .await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(h.tasks.get_task(&task).await.unwrap().child_ids.len(), 2);

        let task = h.new_task().await;
        let resp = h
            .aggregator
            .set_default_boot_order_elements_of_aggregate(&task, "admin", "/redfish/v1/AggregationService/Aggregates/none")
            .await;
        assert_eq!(resp.status_code, 404);
    }
}
