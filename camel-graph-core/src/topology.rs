//! Instance -> Environment -> Service aggregate
//!
//! Built once at startup from [`GraphConfig`]; the set of environments and
//! services never changes afterwards, only the routes inside each service do.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, GraphConfig};
use crate::fetch::Fetcher;
use crate::metrics::{LinearBackoff, MetricConsumer};
use crate::service::{MetricsPipeline, Service};
use crate::snapshot::{EnvironmentSnapshot, InstanceSnapshot};

/// A named group of services
pub struct Environment {
    name: String,
    services: Vec<Arc<Service>>,
}

impl Environment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.iter().find(|s| s.name() == name)
    }

    pub async fn snapshot(&self) -> EnvironmentSnapshot {
        let mut snap = EnvironmentSnapshot {
            name: self.name.clone(),
            ..Default::default()
        };
        for svc in &self.services {
            snap.service_map.insert(svc.name().to_string(), svc.snapshot().await);
        }
        snap
    }
}

/// Every environment this process polls
pub struct Instance {
    environments: Vec<Environment>,
    service_interval: Duration,
}

impl Instance {
    pub fn build(
        config: &GraphConfig,
        fetcher: Arc<dyn Fetcher>,
        consumer: Arc<dyn MetricConsumer>,
    ) -> Result<Self, ConfigError> {
        let backoff = Arc::new(LinearBackoff::new(Duration::from_secs(
            config.metrics.retry_base_delay_seconds,
        )));
        let pipeline = MetricsPipeline::new(consumer, backoff, config.metrics.prefix.clone());

        let mut names = BTreeSet::new();
        let mut environments = Vec::with_capacity(config.environments.len());
        for env in &config.environments {
            if env.name.trim().is_empty() {
                return Err(ConfigError::EmptyEnvironmentName);
            }
            if !names.insert(env.name.as_str()) {
                return Err(ConfigError::DuplicateEnvironment(env.name.clone()));
            }
            let mut service_names = BTreeSet::new();
            let duplicate = env
                .services
                .iter()
                .find(|s| !service_names.insert(s.name.as_str()));
            if let Some(dup) = duplicate {
                return Err(ConfigError::DuplicateService {
                    environment: env.name.clone(),
                    service: dup.name.clone(),
                });
            }

            let services = env
                .services
                .iter()
                .map(|svc| {
                    Service::new(
                        &env.name,
                        svc,
                        fetcher.clone(),
                        pipeline.clone(),
                        config.route_interval(),
                    )
                    .map(Arc::new)
                })
                .collect::<Result<Vec<_>, _>>()?;

            environments.push(Environment {
                name: env.name.clone(),
                services,
            });
        }

        Ok(Self {
            environments,
            service_interval: config.service_interval(),
        })
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    pub fn service_count(&self) -> usize {
        self.environments.iter().map(|e| e.services.len()).sum()
    }

    /// Start the update loop of every service
    pub fn start(&self) {
        for env in &self.environments {
            for svc in &env.services {
                svc.start(self.service_interval);
            }
        }
        tracing::info!(
            environments = self.environments.len(),
            services = self.service_count(),
            interval_secs = self.service_interval.as_secs(),
            "polling started"
        );
    }

    /// Stop every service loop along with its route loops and drain tasks
    pub fn stop(&self) {
        for env in &self.environments {
            for svc in &env.services {
                svc.stop();
            }
        }
        tracing::info!("polling stopped");
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        let mut environments = Vec::with_capacity(self.environments.len());
        for env in &self.environments {
            environments.push(env.snapshot().await);
        }
        InstanceSnapshot { environments }
    }
}
