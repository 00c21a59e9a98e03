//! Aggregates: named groups of onboarded ComputerSystems

use crate::aggregator::Aggregator;
use crate::failure::Failure;
use crate::validation::{decode, node, property_missing, Property, ODATA_LINK};
use agg_core::{tables, uris, Aggregate, OdataId, RpcResponse, StatusMessage};
use agg_store::{create_json, read_json, update_json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{error, info, instrument};

const ELEMENTS_PROPERTIES: &[Property] = &[node("Elements", ODATA_LINK)];

#[derive(Debug, Deserialize)]
struct ElementsRequest {
    #[serde(rename = "Elements", default)]
    elements: Vec<OdataId>,
}

fn has_duplicates(elements: &[OdataId]) -> bool {
    let mut seen = HashSet::new();
    elements.iter().any(|e| !seen.insert(e.odata_id.as_str()))
}

/// `/redfish/v1/AggregationService/Aggregates/<id>` and `<id>` for any URL
/// at or below an aggregate, such as one of its action targets
pub fn aggregate_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix(uris::AGGREGATES)?.trim_start_matches('/');
    let id = rest.split('/').next().filter(|id| !id.is_empty())?;
    Some((format!("{}/{}", uris::AGGREGATES, id), id.to_string()))
}

fn aggregate_body(url: &str, id: &str, elements: &[OdataId]) -> Value {
    json!({
        "@odata.type": "#Aggregate.v1_0_1.Aggregate",
        "@odata.id": url,
        "@odata.context": "/redfish/v1/$metadata#Aggregate.Aggregate",
        "Id": id,
        "Name": "Aggregate",
        "Elements": elements,
    })
}

impl Aggregator {
    fn parse_elements(&self, body: &[u8]) -> Result<Vec<OdataId>, Failure> {
        let (request, _) = decode::<ElementsRequest>(body, ELEMENTS_PROPERTIES)?;
        if request.elements.is_empty() {
            return Err(property_missing("Elements", "empty request can not be processed"));
        }
        Ok(request.elements)
    }

    /// Elements must be distinct, onboarded ComputerSystem keys
    async fn validate_elements(&self, elements: &[OdataId]) -> Result<(), Failure> {
        if has_duplicates(elements) {
            return Err(Failure::new(
                400,
                StatusMessage::ResourceNotFound,
                "invalid elements for create an aggregate: Duplicate elements present",
            )
            .with_args(vec![json!("Elements"), json!(elements.len())]));
        }
        for element in elements {
            if let Err(e) = self.in_memory().read(tables::COMPUTER_SYSTEM, &element.odata_id).await {
                return Err(Failure::not_found(
                    "Elements",
                    &element.odata_id,
                    format!("invalid elements for create an aggregate: {}", e),
                ));
            }
        }
        Ok(())
    }

    pub(crate) async fn load_aggregate(&self, url: &str) -> Result<Aggregate, Failure> {
        read_json(self.on_disk(), tables::AGGREGATE, url).await.map_err(|e| {
            if e.is_not_found() {
                Failure::not_found("Aggregate", url, format!("error getting Aggregate: {}", e))
            } else {
                Failure::internal(format!("error getting Aggregate: {}", e))
            }
        })
    }

    #[instrument(skip(self, body))]
    pub async fn create_aggregate(&self, body: &[u8]) -> RpcResponse {
        let result = async {
            let elements = self.parse_elements(body)?;
            self.validate_elements(&elements).await?;
            let id = uuid::Uuid::new_v4().to_string();
            let url = format!("{}/{}", uris::AGGREGATES, id);
            let aggregate = Aggregate { elements };
            create_json(self.on_disk(), tables::AGGREGATE, &url, &aggregate).await?;
            info!(aggregate = %url, elements = aggregate.elements.len(), "Aggregate created");
            Ok::<_, Failure>(
                RpcResponse::new(201, StatusMessage::Created, aggregate_body(&url, &id, &aggregate.elements))
                    .with_header("Link", format!("<{}/>; rel=describedby", url))
                    .with_header("Location", url),
            )
        }
        .await;
        result.unwrap_or_else(|failure| {
            error!("{}", failure.error_message);
            failure.into_response()
        })
    }

    pub async fn get_all_aggregates(&self) -> RpcResponse {
        let keys = match self.on_disk().get_all_keys(tables::AGGREGATE).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("error getting aggregate: {}", e);
                return RpcResponse::error(503, StatusMessage::CouldNotEstablishConnection, e.to_string(), vec![json!("on-disk store")]);
            }
        };
        let members: Vec<OdataId> = keys.into_iter().map(OdataId::new).collect();
        RpcResponse::ok(json!({
            "@odata.type": "#AggregateCollection.AggregateCollection",
            "@odata.id": uris::AGGREGATES,
            "@odata.context": "/redfish/v1/$metadata#AggregateCollection.AggregateCollection",
            "Name": "Aggregate",
            "Description": "Aggregate collection view",
            "Members@odata.count": members.len(),
            "Members": members,
        }))
    }

    pub async fn get_aggregate(&self, url: &str) -> RpcResponse {
        let aggregate = match self.load_aggregate(url).await {
            Ok(aggregate) => aggregate,
            Err(failure) => return failure.into_response(),
        };
        let id = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        let action = |name: &str| json!({"target": format!("{}/{}/Actions/Aggregate.{}", uris::AGGREGATES, id, name)});
        let mut body = aggregate_body(url, id, &aggregate.elements);
        if let Some(object) = body.as_object_mut() {
            object.insert("Elements@odata.count".into(), json!(aggregate.elements.len()));
            object.insert(
                "Actions".into(),
                json!({
                    "#Aggregate.Reset": action("Reset"),
                    "#Aggregate.SetDefaultBootOrder": action("SetDefaultBootOrder"),
                    "#Aggregate.AddElements": action("AddElements"),
                    "#Aggregate.RemoveElements": action("RemoveElements"),
                }),
            );
        }
        RpcResponse::ok(body)
    }

    pub async fn delete_aggregate(&self, url: &str) -> RpcResponse {
        if let Err(failure) = self.load_aggregate(url).await {
            return failure.into_response();
        }
        match self.on_disk().delete(tables::AGGREGATE, url).await {
            Ok(()) => {
                info!(aggregate = %url, "Aggregate deleted");
                RpcResponse::new(204, StatusMessage::ResourceRemoved, Value::Null)
            }
            Err(e) => Failure::from(e).into_response(),
        }
    }

    /// `url` is the aggregate or its AddElements action target
    #[instrument(skip(self, body))]
    pub async fn add_elements_to_aggregate(&self, url: &str, body: &[u8]) -> RpcResponse {
        self.modify_elements(url, body, true).await.unwrap_or_else(Failure::into_response)
    }

    /// `url` is the aggregate or its RemoveElements action target
    #[instrument(skip(self, body))]
    pub async fn remove_elements_from_aggregate(&self, url: &str, body: &[u8]) -> RpcResponse {
        self.modify_elements(url, body, false).await.unwrap_or_else(Failure::into_response)
    }

    async fn modify_elements(&self, url: &str, body: &[u8], add: bool) -> Result<RpcResponse, Failure> {
        let requested = self.parse_elements(body)?;
        let Some((aggregate_url, id)) = aggregate_url(url) else {
            return Err(property_missing("request uri", "request uri is not provided"));
        };
        if add {
            self.validate_elements(&requested).await?;
        } else if has_duplicates(&requested) {
            return Err(Failure::new(400, StatusMessage::ResourceCannotBeDeleted, "duplicate elements present"));
        }
        let mut aggregate = self.load_aggregate(&aggregate_url).await?;
        let listed = |element: &OdataId| aggregate.elements.contains(element);
        if add {
            if requested.iter().any(listed) {
                return Err(Failure::new(409, StatusMessage::ResourceAlreadyExists, "Elements present in aggregate")
                    .with_args(vec![json!("AddElements"), json!("Elements"), json!(requested)]));
            }
            aggregate.elements.extend(requested);
        } else {
            if !requested.iter().all(listed) {
                return Err(Failure::new(404, StatusMessage::ResourceNotFound, "Elements not present in aggregate")
                    .with_args(vec![json!("Elements"), json!(requested)]));
            }
            aggregate.elements.retain(|element| !requested.contains(element));
        }
        update_json(self.on_disk(), tables::AGGREGATE, &aggregate_url, &aggregate).await?;
        info!(aggregate = %aggregate_url, elements = aggregate.elements.len(), add, "Aggregate elements updated");
        Ok(RpcResponse::ok(aggregate_body(&aggregate_url, &id, &aggregate.elements))
            .with_header("Link", format!("<{}/>; rel=describedby", aggregate_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    fn elements(keys: &[&str]) -> Vec<u8> {
        let elements: Vec<Value> = keys.iter().map(|k| json!({"@odata.id": k})).collect();
        json!({"Elements": elements}).to_string().into_bytes()
    }

    #[test]
    fn test_aggregate_url() {
        let (url, id) = aggregate_url("/redfish/v1/AggregationService/Aggregates/a1/Actions/Aggregate.AddElements").unwrap();
        assert_eq!(url, "/redfish/v1/AggregationService/Aggregates/a1");
        assert_eq!(id, "a1");
        assert!(aggregate_url("/redfish/v1/Systems/x").is_none());
        assert!(aggregate_url("/redfish/v1/AggregationService/Aggregates/").is_none());
    }

    #[tokio::test]
    async fn test_aggregate_lifecycle() {
        let h = Harness::new();
        let s1 = h.seed_device("u1", "GRF").await;
        let s2 = h.seed_device("u2", "GRF").await;

        let resp = h.aggregator.create_aggregate(&elements(&[&s1])).await;
        assert_eq!(resp.status_code, 201);
        let url = resp.headers["Location"].clone();

        let resp = h.aggregator.get_all_aggregates().await;
        assert_eq!(resp.body["Members@odata.count"], 1);

        let add = format!("{}/Actions/Aggregate.AddElements", url);
        let resp = h.aggregator.add_elements_to_aggregate(&add, &elements(&[&s2])).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["Elements"].as_array().unwrap().len(), 2);

        let resp = h.aggregator.add_elements_to_aggregate(&add, &elements(&[&s2])).await;
        assert_eq!(resp.status_code, 409);

        let remove = format!("{}/Actions/Aggregate.RemoveElements", url);
        let resp = h.aggregator.remove_elements_from_aggregate(&remove, &elements(&[&s1])).await;
        assert_eq!(resp.status_code, 200);
        let resp = h.aggregator.remove_elements_from_aggregate(&remove, &elements(&[&s1])).await;
        assert_eq!(resp.status_code, 404);

        let resp = h.aggregator.get_aggregate(&url).await;
        assert_eq!(resp.body["Elements@odata.count"], 1);
        assert!(resp.body["Actions"]["#Aggregate.Reset"]["target"]
            .as_str()
            .unwrap()
            .ends_with("/Actions/Aggregate.Reset"));

        assert_eq!(h.aggregator.delete_aggregate(&url).await.status_code, 204);
        assert_eq!(h.aggregator.get_aggregate(&url).await.status_code, 404);
        assert_eq!(h.aggregator.delete_aggregate(&url).await.status_code, 404);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = Harness::new();
        let s1 = h.seed_device("u1", "GRF").await;

        let resp = h.aggregator.create_aggregate(&elements(&[&s1, &s1])).await;
        assert_eq!(resp.status_code, 400);

        let resp = h.aggregator.create_aggregate(&elements(&["/redfish/v1/Systems/nope:1"])).await;
        assert_eq!((resp.status_code, resp.status_message), (404, StatusMessage::ResourceNotFound));

        let resp = h.aggregator.create_aggregate(b"{}").await;
        assert_eq!((resp.status_code, resp.status_message), (400, StatusMessage::PropertyMissing));

        let resp = h.aggregator.create_aggregate(b"[").await;
        assert_eq!(resp.status_message, StatusMessage::MalformedJson);
    }
}
