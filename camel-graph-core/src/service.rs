//! Service entity: route discovery and reconciliation
//!
//! Each service cycle reads the full route list of one Camel application and
//! folds it into the route map. New routes get their own update loop and
//! metric drain task; routes that stop being reported are marked absent and
//! their loop retires on its next tick.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, ServiceConfig};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::jolokia::{self, RouteEntry, RouteListResponse};
use crate::metrics::{Backoff, METRIC_QUEUE_CAPACITY, MetricConsumer, MetricQueue};
use crate::route::{Route, ServiceLink, route_key};
use crate::snapshot::ServiceSnapshot;
use crate::worker::{Job, TickAction, UpdateStatus, Worker};

/// Where route metrics go and how they are named
#[derive(Clone)]
pub struct MetricsPipeline {
    pub consumer: Arc<dyn MetricConsumer>,
    pub backoff: Arc<dyn Backoff>,
    pub prefix: String,
    pub queue_capacity: usize,
}

impl MetricsPipeline {
    pub fn new(
        consumer: Arc<dyn MetricConsumer>,
        backoff: Arc<dyn Backoff>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            consumer,
            backoff,
            prefix: prefix.into(),
            queue_capacity: METRIC_QUEUE_CAPACITY,
        }
    }
}

struct RouteTasks {
    worker: Worker,
    drain: JoinHandle<()>,
}

pub struct Service {
    link: Arc<ServiceLink>,
    color: Option<String>,
    pipeline: MetricsPipeline,
    route_interval: Duration,
    routes: RwLock<BTreeMap<String, Arc<Route>>>,
    status: RwLock<UpdateStatus>,
    tasks: Mutex<BTreeMap<String, RouteTasks>>,
    worker: Mutex<Option<Worker>>,
}

impl Service {
    pub fn new(
        environment: &str,
        config: &ServiceConfig,
        fetcher: Arc<dyn Fetcher>,
        pipeline: MetricsPipeline,
        route_interval: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName {
                environment: environment.to_string(),
            });
        }
        if config.url.trim().is_empty() {
            return Err(ConfigError::EmptyServiceUrl {
                service: config.name.clone(),
            });
        }

        Ok(Self {
            link: Arc::new(ServiceLink {
                environment: environment.to_string(),
                service: config.name.clone(),
                url: config.url.trim_end_matches('/').to_string(),
                authorization: config.authorization.clone(),
                fetcher,
            }),
            color: config.color.clone(),
            pipeline,
            route_interval,
            routes: RwLock::new(BTreeMap::new()),
            status: RwLock::new(UpdateStatus::default()),
            tasks: Mutex::new(BTreeMap::new()),
            worker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.link.service
    }

    pub fn url(&self) -> &str {
        &self.link.url
    }

    pub async fn status(&self) -> UpdateStatus {
        self.status.read().await.clone()
    }

    pub async fn route(&self, key: &str) -> Option<Arc<Route>> {
        self.routes.read().await.get(key).cloned()
    }

    pub async fn route_keys(&self) -> Vec<String> {
        self.routes.read().await.keys().cloned().collect()
    }

    /// Whether the update loop of route `key` is alive
    pub fn is_route_loop_running(&self, key: &str) -> bool {
        lock(&self.tasks)
            .get(key)
            .is_some_and(|t| !t.worker.is_finished())
    }

    /// Start the service loop; the first update runs right away
    pub fn start(self: &Arc<Self>, period: Duration) {
        let mut slot = lock(&self.worker);
        if let Some(old) = slot.take() {
            old.stop();
        }
        *slot = Some(Worker::start(self.clone(), period));
        tracing::debug!(service = %self.link.service, ?period, "service loop started");
    }

    /// Stop the service loop and every route loop and drain task it spawned
    pub fn stop(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }
        for (_, tasks) in std::mem::take(&mut *lock(&self.tasks)) {
            tasks.worker.stop();
            tasks.drain.abort();
        }
    }

    /// Read the route list and fold it into the route map
    pub async fn update(&self, at: DateTime<Utc>) -> Result<()> {
        let url = jolokia::routes_url(&self.link.url);
        let body = self
            .link
            .fetcher
            .fetch(&url, self.link.authorization.as_ref())
            .await?;
        let list = jolokia::parse_route_list(&body)?;
        self.reconcile(list, at).await;
        Ok(())
    }

    async fn reconcile(&self, list: RouteListResponse, at: DateTime<Utc>) {
        let mut reported = HashSet::new();
        let mut live = Vec::with_capacity(list.value.len());

        for entry in list.value.values() {
            if entry.route_id.is_empty() {
                tracing::debug!(service = %self.link.service, "skipping route entry without id");
                continue;
            }
            let key = route_key(&entry.camel_management_name, &entry.route_id);

            let existing = self.routes.read().await.get(&key).cloned();
            let route = match existing {
                Some(route) => {
                    route.apply_report(entry).await;
                    self.revive(&key, &route);
                    route
                }
                None => match self.register(&key, entry).await {
                    Some(route) => route,
                    None => continue,
                },
            };
            reported.insert(key);
            live.push(route);
        }

        let vanished: Vec<Arc<Route>> = self
            .routes
            .read()
            .await
            .iter()
            .filter(|(key, _)| !reported.contains(*key))
            .map(|(_, route)| route.clone())
            .collect();
        for route in vanished {
            if route.mark_absent().await {
                tracing::info!(
                    env = %self.link.environment,
                    service = %self.link.service,
                    route = %route.key(),
                    "route no longer reported"
                );
            }
        }

        for route in live {
            route.record_metrics(&self.pipeline.prefix, at).await;
        }
    }

    async fn register(&self, key: &str, entry: &RouteEntry) -> Option<Arc<Route>> {
        let (queue, drain) = MetricQueue::spawn(
            self.pipeline.consumer.clone(),
            self.pipeline.backoff.clone(),
            self.pipeline.queue_capacity,
        );
        let Some(route) = Route::new(entry, self.link.clone(), queue) else {
            drain.abort();
            return None;
        };
        let route = Arc::new(route);

        self.routes
            .write()
            .await
            .insert(key.to_string(), route.clone());
        let worker = Worker::start(route.clone(), self.route_interval);
        lock(&self.tasks).insert(key.to_string(), RouteTasks { worker, drain });

        tracing::info!(
            env = %self.link.environment,
            service = %self.link.service,
            route = %key,
            "discovered route"
        );
        Some(route)
    }

    // A route that was retired and is reported again gets a fresh loop
    fn revive(&self, key: &str, route: &Arc<Route>) {
        let mut tasks = lock(&self.tasks);
        if let Some(t) = tasks.get_mut(key) {
            if t.worker.is_finished() {
                tracing::info!(
                    service = %self.link.service,
                    route = %key,
                    "route is back, restarting its loop"
                );
                t.worker = Worker::start(route.clone(), self.route_interval);
            }
        }
    }

    pub async fn snapshot(&self) -> ServiceSnapshot {
        let status = self.status().await;
        let routes: Vec<(String, Arc<Route>)> = self
            .routes
            .read()
            .await
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();

        let mut route_map = BTreeMap::new();
        for (key, route) in routes {
            route_map.insert(key, route.snapshot().await);
        }

        ServiceSnapshot {
            name: self.link.service.clone(),
            url: self.link.url.clone(),
            route_map,
            last_updated: status.last_updated,
            error: status.error,
            color: self.color.clone(),
            updating_state: status.updating,
        }
    }
}

#[async_trait]
impl Job for Service {
    fn label(&self) -> String {
        format!("{}:{}", self.link.environment, self.link.service)
    }

    async fn on_tick(&self) -> TickAction {
        TickAction::for_state(self.status.read().await.updating)
    }

    async fn run(&self, at: DateTime<Utc>) {
        self.status.write().await.begin();
        let outcome = self.update(at).await;

        let mut status = self.status.write().await;
        match outcome {
            Ok(()) => status.succeed(at),
            Err(e) => {
                tracing::warn!(
                    env = %self.link.environment,
                    service = %self.link.service,
                    error = %e,
                    "service update failed"
                );
                status.fail(e);
            }
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
