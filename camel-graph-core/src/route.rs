//! Route entity
//!
//! A route's fields are split in two groups with one writer each: the owning
//! service's reconciliation writes [`RouteRuntime`] (lifecycle state, uptime,
//! counters), the route's own loop writes [`RouteDetail`] (schema, endpoints,
//! update status).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;

use crate::config::Authorization;
use crate::endpoint::{Endpoints, normalize};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::jolokia::{self, RouteEntry};
use crate::metrics::{Metric, MetricQueue, route_metric_base};
use crate::snapshot::RouteSnapshot;
use crate::worker::{Job, TickAction, UpdateStatus};

/// Shown for routes the service stopped reporting
pub const ABSENT_STATE: &str = "None";

/// Lifecycle of a route as seen on the remote service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteState {
    /// Reported by the service, with Camel's state string (`Started`, `Stopped`, ...)
    Reported(String),
    /// No longer reported; the route loop retires on its next tick
    Absent,
}

impl RouteState {
    pub fn as_str(&self) -> &str {
        match self {
            RouteState::Reported(s) => s,
            RouteState::Absent => ABSENT_STATE,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RouteState::Absent)
    }
}

impl Serialize for RouteState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Runtime counters reported for a route
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCounters {
    #[serde(skip_serializing_if = "is_zero")]
    pub exchanges_total: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub exchanges_completed: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub exchanges_failed: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub exchanges_inflight: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_processing_time: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_processing_time: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_processing_time: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mean_processing_time: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_processing_time: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub failures_handled: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub redeliveries: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl RouteCounters {
    pub fn from_entry(e: &RouteEntry) -> Self {
        Self {
            exchanges_total: e.exchanges_total,
            exchanges_completed: e.exchanges_completed,
            exchanges_failed: e.exchanges_failed,
            exchanges_inflight: e.exchanges_inflight,
            max_processing_time: e.max_processing_time,
            min_processing_time: e.min_processing_time,
            last_processing_time: e.last_processing_time,
            mean_processing_time: e.mean_processing_time,
            total_processing_time: e.total_processing_time,
            failures_handled: e.failures_handled,
            redeliveries: e.redeliveries,
        }
    }

    /// Metric leaf name and value, in emission order
    pub fn samples(&self) -> [(&'static str, i64); 11] {
        [
            ("exchanges_total", self.exchanges_total),
            ("exchanges_completed", self.exchanges_completed),
            ("exchanges_failed", self.exchanges_failed),
            ("exchanges_inflight", self.exchanges_inflight),
            ("max_processing_time", self.max_processing_time),
            ("min_processing_time", self.min_processing_time),
            ("last_processing_time", self.last_processing_time),
            ("mean_processing_time", self.mean_processing_time),
            ("total_processing_time", self.total_processing_time),
            ("failures_handled", self.failures_handled),
            ("redeliveries", self.redeliveries),
        ]
    }
}

/// Written by the owning service's reconciliation
#[derive(Clone, Debug)]
pub struct RouteRuntime {
    pub state: RouteState,
    pub uptime: String,
    pub start_timestamp: String,
    pub counters: RouteCounters,
}

/// Written by the route's own loop
#[derive(Clone, Debug, Default)]
pub struct RouteDetail {
    pub schema: String,
    pub endpoints: Endpoints,
    pub status: UpdateStatus,
}

/// What a route needs to know about the service hosting it
pub struct ServiceLink {
    pub environment: String,
    pub service: String,
    pub url: String,
    pub authorization: Option<Authorization>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// Map key of a route: `context.name`, spaces turned into `_`
pub fn route_key(context: &str, name: &str) -> String {
    format!("{}.{}", context.replace(' ', "_"), name.replace(' ', "_"))
}

pub struct Route {
    context: String,
    name: String,
    key: String,
    endpoint_uri: String,
    link: Arc<ServiceLink>,
    metrics: MetricQueue,
    runtime: RwLock<RouteRuntime>,
    detail: RwLock<RouteDetail>,
}

impl Route {
    /// Build a route from its first report. `None` when the report has no route id.
    pub fn new(entry: &RouteEntry, link: Arc<ServiceLink>, metrics: MetricQueue) -> Option<Self> {
        if entry.route_id.is_empty() {
            return None;
        }

        let mut detail = RouteDetail::default();
        if !entry.endpoint_uri.is_empty() {
            detail
                .endpoints
                .add_input(normalize(&link.service, &entry.endpoint_uri));
        }

        Some(Self {
            context: entry.camel_management_name.clone(),
            name: entry.route_id.clone(),
            key: route_key(&entry.camel_management_name, &entry.route_id),
            endpoint_uri: entry.endpoint_uri.clone(),
            link,
            metrics,
            runtime: RwLock::new(RouteRuntime {
                state: RouteState::Reported(entry.state.clone()),
                uptime: entry.uptime.clone(),
                start_timestamp: entry.start_timestamp.clone(),
                counters: RouteCounters::from_entry(entry),
            }),
            detail: RwLock::new(detail),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Overwrite state, uptime and counters from a fresh report
    pub async fn apply_report(&self, entry: &RouteEntry) {
        let mut rt = self.runtime.write().await;
        rt.state = RouteState::Reported(entry.state.clone());
        rt.uptime = entry.uptime.clone();
        rt.start_timestamp = entry.start_timestamp.clone();
        rt.counters = RouteCounters::from_entry(entry);
    }

    /// Returns true on the transition, false if the route was already absent
    pub async fn mark_absent(&self) -> bool {
        let mut rt = self.runtime.write().await;
        if rt.state.is_absent() {
            return false;
        }
        rt.state = RouteState::Absent;
        true
    }

    pub async fn state(&self) -> RouteState {
        self.runtime.read().await.state.clone()
    }

    pub async fn endpoints(&self) -> Endpoints {
        self.detail.read().await.endpoints.clone()
    }

    pub async fn status(&self) -> UpdateStatus {
        self.detail.read().await.status.clone()
    }

    /// Queue one sample per counter, all stamped `at`
    pub async fn record_metrics(&self, prefix: &str, at: DateTime<Utc>) {
        let counters = self.runtime.read().await.counters.clone();
        let base = route_metric_base(
            prefix,
            &self.link.environment,
            &self.link.service,
            &self.context,
            &self.name,
        );
        for (leaf, value) in counters.samples() {
            self.metrics
                .push(Metric::new(format!("{}.{}", base, leaf), value, at))
                .await;
        }
    }

    /// Fetch endpoint detail, then the XML definition, merging as each succeeds
    pub async fn update(&self) -> Result<()> {
        let link = &self.link;

        let url = jolokia::route_endpoints_url(&link.url, &self.context, &self.name);
        let body = link.fetcher.fetch(&url, link.authorization.as_ref()).await?;
        let outputs = jolokia::parse_static_outputs(&body)?;
        {
            let mut detail = self.detail.write().await;
            for uri in outputs {
                detail.endpoints.add_output(normalize(&link.service, &uri));
            }
        }

        let url = jolokia::route_schema_url(&link.url, &self.context, &self.name);
        let body = link.fetcher.fetch(&url, link.authorization.as_ref()).await?;
        let envelope = jolokia::parse_exec(&body)?;
        if envelope.value.is_empty() {
            return Ok(());
        }
        let definition = jolokia::parse_route_xml(&envelope.value)?;

        let mut detail = self.detail.write().await;
        for uri in definition.outputs {
            detail.endpoints.add_output(normalize(&link.service, &uri));
        }
        for uri in definition.inputs {
            detail.endpoints.add_input(normalize(&link.service, &uri));
        }
        detail.schema = envelope.value;
        Ok(())
    }

    pub async fn snapshot(&self) -> RouteSnapshot {
        let rt = self.runtime.read().await.clone();
        let detail = self.detail.read().await.clone();
        RouteSnapshot {
            context: self.context.clone(),
            name: self.name.clone(),
            error: detail.status.error,
            last_updated: detail.status.last_updated,
            state: rt.state,
            uptime: rt.uptime,
            schema: detail.schema,
            endpoint_uri: self.endpoint_uri.clone(),
            endpoints: detail.endpoints,
            counters: rt.counters,
            start_timestamp: rt.start_timestamp,
            updating_state: detail.status.updating,
        }
    }
}

#[async_trait]
impl Job for Route {
    fn label(&self) -> String {
        format!("{}:{}:{}", self.link.environment, self.link.service, self.key)
    }

    async fn on_tick(&self) -> TickAction {
        if self.runtime.read().await.state.is_absent() {
            tracing::info!(
                env = %self.link.environment,
                service = %self.link.service,
                route = %self.name,
                "route is out of service"
            );
            return TickAction::Retire;
        }
        TickAction::for_state(self.detail.read().await.status.updating)
    }

    async fn run(&self, at: DateTime<Utc>) {
        self.detail.write().await.status.begin();
        let outcome = self.update().await;

        let mut detail = self.detail.write().await;
        match outcome {
            Ok(()) => detail.status.succeed(at),
            Err(e) => {
                tracing::warn!(
                    env = %self.link.environment,
                    service = %self.link.service,
                    route = %self.name,
                    error = %e,
                    "route update failed"
                );
                detail.status.fail(e);
            }
        }
    }
}
