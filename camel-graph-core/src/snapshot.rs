//! Point-in-time views of the topology for the query layer
//!
//! Everything here is plain data: built from the live entities under their
//! read locks, then serialized without touching them again.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::endpoint::Endpoints;
use crate::route::{RouteCounters, RouteState};
use crate::worker::UpdatingState;

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvironmentSnapshot>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub service_map: BTreeMap<String, ServiceSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub route_map: BTreeMap<String, RouteSnapshot>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rfc3339"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub updating_state: UpdatingState,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSnapshot {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rfc3339"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    pub state: RouteState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uptime: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub endpoint_uri: String,
    #[serde(skip_serializing_if = "Endpoints::is_empty")]
    pub endpoints: Endpoints,
    #[serde(flatten)]
    pub counters: RouteCounters,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start_timestamp: String,
    pub updating_state: UpdatingState,
}

fn rfc3339<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => s.serialize_none(),
    }
}

impl InstanceSnapshot {
    pub fn environment(&self, name: &str) -> Option<&EnvironmentSnapshot> {
        self.environments.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route() -> RouteSnapshot {
        RouteSnapshot {
            context: "ctx".into(),
            name: "r1".into(),
            error: None,
            last_updated: None,
            state: RouteState::Absent,
            uptime: String::new(),
            schema: String::new(),
            endpoint_uri: "activemq://queue:in".into(),
            endpoints: Endpoints {
                inputs: vec!["jms:queue:in".into()],
                outputs: vec![],
            },
            counters: RouteCounters {
                exchanges_total: 5,
                ..Default::default()
            },
            start_timestamp: String::new(),
            updating_state: UpdatingState::Failed,
        }
    }

    #[test]
    fn test_route_snapshot_omits_empty_fields() {
        let v = serde_json::to_value(route()).unwrap();
        assert_eq!(
            v,
            json!({
                "context": "ctx",
                "name": "r1",
                "state": "None",
                "endpointUri": "activemq://queue:in",
                "endpoints": {"inputs": ["jms:queue:in"]},
                "exchangesTotal": 5,
                "updatingState": "failed"
            })
        );
    }

    #[test]
    fn test_service_snapshot_shape() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut route_map = BTreeMap::new();
        route_map.insert("ctx.r1".to_string(), route());
        let svc = ServiceSnapshot {
            name: "orders".into(),
            url: "http://orders".into(),
            route_map,
            last_updated: Some(at),
            error: None,
            color: Some("#ff0000".into()),
            updating_state: UpdatingState::Done,
        };

        let v = serde_json::to_value(&svc).unwrap();
        assert_eq!(v["lastUpdated"], "2023-11-14T22:13:20Z");
        assert_eq!(v["updatingState"], "done");
        assert_eq!(v["color"], "#ff0000");
        assert_eq!(v["routeMap"]["ctx.r1"]["state"], "None");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_instance_environment_lookup() {
        let snap = InstanceSnapshot {
            environments: vec![
                EnvironmentSnapshot {
                    name: "dev".into(),
                    ..Default::default()
                },
                EnvironmentSnapshot {
                    name: "prod".into(),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(snap.environment("prod").unwrap().name, "prod");
        assert!(snap.environment("qa").is_none());
        assert_eq!(serde_json::to_value(&snap.environments[0]).unwrap(), json!({"name": "dev"}));
    }
}
