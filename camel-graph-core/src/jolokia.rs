//! Jolokia wire formats for Camel route management
//!
//! Three reads are used: the route list (one MBean read over every route),
//! the static endpoint JSON of one route, and the XML dump of one route.
//! The last two come wrapped in an exec envelope whose `value` is a string.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

pub const ROUTES_PATH: &str = "/jolokia/read/org.apache.camel:type=routes,*";

/// `{url}/jolokia/exec/...createRouteStaticEndpointJson(boolean)/true`
pub fn route_endpoints_url(service_url: &str, context: &str, route: &str) -> String {
    format!(
        "{}/jolokia/exec/org.apache.camel:context={},type=routes,name=\"{}\"/createRouteStaticEndpointJson(boolean)/true",
        service_url, context, route
    )
}

/// `{url}/jolokia/exec/...dumpRouteAsXml(boolean)/true`
pub fn route_schema_url(service_url: &str, context: &str, route: &str) -> String {
    format!(
        "{}/jolokia/exec/org.apache.camel:context={},type=routes,name=\"{}\"/dumpRouteAsXml(boolean)/true",
        service_url, context, route
    )
}

pub fn routes_url(service_url: &str) -> String {
    format!("{}{}", service_url, ROUTES_PATH)
}

/// Response of the route list read
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RouteListResponse {
    #[serde(default)]
    pub value: BTreeMap<String, RouteEntry>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Runtime attributes of one route MBean
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub camel_management_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub route_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub uptime: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub endpoint_uri: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_timestamp: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub exchanges_total: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub exchanges_completed: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub exchanges_failed: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub exchanges_inflight: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub max_processing_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub min_processing_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub last_processing_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub mean_processing_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_processing_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub failures_handled: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub redeliveries: i64,
}

/// Exec envelope: the operation result travels as a string in `value`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExecResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct StaticEndpoints {
    #[serde(default)]
    routes: Option<BTreeMap<String, RouteEndpointLists>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RouteEndpointLists {
    #[serde(default)]
    #[allow(dead_code)]
    inputs: Option<Vec<EndpointRef>>,
    #[serde(default)]
    outputs: Option<Vec<EndpointRef>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct EndpointRef {
    #[serde(default)]
    uri: String,
}

/// `from`/`to` URIs found in a route definition, in document order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDefinition {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

// Jolokia reports an error either as a non-200 status or an `error` member
fn check_envelope(status: Option<u16>, error: Option<&str>) -> Result<()> {
    if let Some(err) = error.filter(|e| !e.is_empty()) {
        return Err(Error::RemoteStatus(err.to_string()));
    }
    match status {
        Some(200) | None => Ok(()),
        Some(code) => Err(Error::RemoteStatus(format!("Jolokia status {}", code))),
    }
}

pub fn parse_route_list(body: &[u8]) -> Result<RouteListResponse> {
    let resp: RouteListResponse =
        serde_json::from_slice(body).map_err(|e| Error::parse("route list", e))?;
    check_envelope(resp.status, resp.error.as_deref())?;
    Ok(resp)
}

pub fn parse_exec(body: &[u8]) -> Result<ExecResponse> {
    let resp: ExecResponse =
        serde_json::from_slice(body).map_err(|e| Error::parse("exec response", e))?;
    check_envelope(resp.status, resp.error.as_deref())?;
    Ok(resp)
}

/// Output URIs of `createRouteStaticEndpointJson`, skipping blanks and
/// unresolved `{{property}}` placeholders
pub fn parse_static_outputs(body: &[u8]) -> Result<Vec<String>> {
    let envelope = parse_exec(body)?;
    if envelope.value.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: StaticEndpoints = serde_json::from_str(&envelope.value)
        .map_err(|e| Error::parse("static endpoint json", e))?;

    let mut outputs = Vec::new();
    for lists in doc.routes.unwrap_or_default().into_values() {
        for ep in lists.outputs.unwrap_or_default() {
            if ep.uri.is_empty() || ep.uri.contains("{{") {
                continue;
            }
            outputs.push(ep.uri);
        }
    }
    Ok(outputs)
}

/// Collect `<from uri>` and `<to uri>` of a route XML dump
pub fn parse_route_xml(xml: &str) -> Result<RouteDefinition> {
    let mut reader = Reader::from_str(xml);
    let mut def = RouteDefinition::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let target = match e.local_name().as_ref() {
                    b"from" => &mut def.inputs,
                    b"to" => &mut def.outputs,
                    _ => continue,
                };
                let attr = e
                    .try_get_attribute("uri")
                    .map_err(|err| Error::parse("route xml", err))?;
                if let Some(attr) = attr {
                    let uri = attr
                        .unescape_value()
                        .map_err(|err| Error::parse("route xml", err))?;
                    if !uri.is_empty() {
                        target.push(uri.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::parse(
                    "route xml",
                    format!("at {}: {}", reader.buffer_position(), e),
                ));
            }
        }
    }

    Ok(def)
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_LIST: &str = r#"{
  "request": {"type": "read"},
  "value": {
    "org.apache.camel:context=orders,name=\"route 1\",type=routes": {
      "CamelManagementName": "orders",
      "RouteId": "route 1",
      "State": "Started",
      "Uptime": "3 minutes",
      "EndpointUri": "activemq://queue:in?concurrentConsumers=2",
      "ExchangesTotal": 5,
      "ExchangesCompleted": 4,
      "ExchangesFailed": 1,
      "MeanProcessingTime": 12.7,
      "Redeliveries": null,
      "StartTimestamp": "2024-01-01T00:00:00Z"
    }
  },
  "status": 200
}"#;

    #[test]
    fn test_parse_route_list() {
        let resp = parse_route_list(ROUTE_LIST.as_bytes()).unwrap();
        assert_eq!(resp.value.len(), 1);
        let entry = resp.value.values().next().unwrap();
        assert_eq!(entry.camel_management_name, "orders");
        assert_eq!(entry.route_id, "route 1");
        assert_eq!(entry.exchanges_total, 5);
        assert_eq!(entry.exchanges_failed, 1);
        assert_eq!(entry.mean_processing_time, 12);
        assert_eq!(entry.redeliveries, 0);
        assert_eq!(entry.min_processing_time, 0);
    }

    #[test]
    fn test_route_list_error_status() {
        let body = br#"{"status": 404, "error": "javax.management.InstanceNotFoundException"}"#;
        let err = parse_route_list(body).unwrap_err();
        assert!(matches!(err, Error::RemoteStatus(ref m) if m.contains("InstanceNotFound")));

        let err = parse_route_list(br#"{"status": 500}"#).unwrap_err();
        assert!(matches!(err, Error::RemoteStatus(_)));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_route_list(b"<html>").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_static_outputs_skip_placeholders() {
        let inner = r#"{"routes": {"r1": {"inputs": [{"uri": "direct://start"}], "outputs": [{"uri": "activemq://queue:out"}, {"uri": ""}, {"uri": "{{out.endpoint}}"}, {"uri": "log://x"}]}}}"#;
        let body = serde_json::json!({"value": inner, "status": 200}).to_string();
        let outputs = parse_static_outputs(body.as_bytes()).unwrap();
        assert_eq!(outputs, vec!["activemq://queue:out", "log://x"]);
    }

    #[test]
    fn test_static_outputs_envelope_error() {
        let body = br#"{"status": 404, "error": "no such operation"}"#;
        let err = parse_static_outputs(body).unwrap_err();
        assert_eq!(err, Error::RemoteStatus("no such operation".into()));
    }

    #[test]
    fn test_parse_route_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<route xmlns="http://camel.apache.org/schema/spring" id="route1">
    <from uri="activemq:queue:in?concurrentConsumers=2"/>
    <choice>
        <when><simple>${header.x}</simple><to uri="direct:a"/></when>
        <otherwise><to uri="jms:queue:out?a=1&amp;b=2"></to></otherwise>
    </choice>
    <to id="t" uri="log:done"/>
</route>"#;
        let def = parse_route_xml(xml).unwrap();
        assert_eq!(def.inputs, vec!["activemq:queue:in?concurrentConsumers=2"]);
        assert_eq!(
            def.outputs,
            vec!["direct:a", "jms:queue:out?a=1&b=2", "log:done"]
        );
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse_route_xml("<route><from uri=\"a\"></route>").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_exec_urls() {
        assert_eq!(
            route_schema_url("http://h:1", "ctx", "r1"),
            "http://h:1/jolokia/exec/org.apache.camel:context=ctx,type=routes,name=\"r1\"/dumpRouteAsXml(boolean)/true"
        );
        assert_eq!(
            routes_url("http://h:1"),
            "http://h:1/jolokia/read/org.apache.camel:type=routes,*"
        );
    }
}
