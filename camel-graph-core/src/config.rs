use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Basic-auth credentials for a service's management API
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Authorization {
    #[serde(alias = "Login")]
    pub login: String,
    #[serde(alias = "Pass", alias = "password")]
    pub pass: String,
}

/// One polled service
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default, alias = "Name")]
    pub name: String,

    /// Base URL of the service; the Jolokia paths are appended to it
    #[serde(default, alias = "Url")]
    pub url: String,

    /// Display hint for the UI
    #[serde(default, alias = "Color")]
    pub color: Option<String>,

    #[serde(default, alias = "Authorization")]
    pub authorization: Option<Authorization>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Services")]
    pub services: Vec<ServiceConfig>,
}

/// Where and how route metrics are shipped
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Root segment of every metric name
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// `host:port` of a Graphite plaintext listener; metrics are discarded when unset
    #[serde(default, alias = "graphite_url")]
    pub graphite_url: Option<String>,

    /// Treat "no connection available" as a failed send (retried) instead of dropping the metric
    #[serde(default, alias = "repeat_send_on_fail")]
    pub repeat_send_on_fail: bool,

    #[serde(default = "default_pool_min", alias = "pool_min")]
    pub pool_min: usize,

    #[serde(default = "default_pool_max", alias = "pool_max")]
    pub pool_max: usize,

    #[serde(default = "default_retry_base", alias = "retry_base_delay_seconds")]
    pub retry_base_delay_seconds: u64,
}

fn default_prefix() -> String {
    "camel-graph".into()
}
fn default_pool_min() -> usize {
    5
}
fn default_pool_max() -> usize {
    30
}
fn default_retry_base() -> u64 {
    5
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            graphite_url: None,
            repeat_send_on_fail: false,
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            retry_base_delay_seconds: default_retry_base(),
        }
    }
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphConfig {
    #[serde(default, alias = "Environments")]
    pub environments: Vec<EnvironmentConfig>,

    #[serde(
        default = "default_interval",
        alias = "service_update_interval_seconds",
        alias = "ServiceUpdateIntervalSeconds"
    )]
    pub service_update_interval_seconds: u64,

    #[serde(
        default = "default_interval",
        alias = "route_update_interval_seconds",
        alias = "RouteUpdateIntervalSeconds"
    )]
    pub route_update_interval_seconds: u64,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_interval() -> u64 {
    60
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment name must not be empty")]
    EmptyEnvironmentName,
    #[error("environment '{0}' is declared twice")]
    DuplicateEnvironment(String),
    #[error("service '{service}' is declared twice in environment '{environment}'")]
    DuplicateService { environment: String, service: String },
    #[error("service name must not be empty (environment '{environment}')")]
    EmptyServiceName { environment: String },
    #[error("service url must not be empty (service '{service}')")]
    EmptyServiceUrl { service: String },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

impl GraphConfig {
    /// Load configuration from a YAML or JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string (useful for testing)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: GraphConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search for a config file: `CAMEL_GRAPH_CONFIG` first, then the well-known names in `dir`
    pub fn discover(dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let names = ["services.yaml", "services.yml", "services.json"];
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var("CAMEL_GRAPH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        for name in &names {
            let path = dir.join(name);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        Err(ConfigError::NotFound { searched })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for env in &self.environments {
            if env.name.is_empty() {
                return Err(ConfigError::EmptyEnvironmentName);
            }
            if !seen.insert(env.name.as_str()) {
                return Err(ConfigError::DuplicateEnvironment(env.name.clone()));
            }
            let mut services = BTreeSet::new();
            for svc in &env.services {
                if svc.name.is_empty() {
                    return Err(ConfigError::EmptyServiceName {
                        environment: env.name.clone(),
                    });
                }
                if svc.url.is_empty() {
                    return Err(ConfigError::EmptyServiceUrl {
                        service: svc.name.clone(),
                    });
                }
                if !services.insert(svc.name.as_str()) {
                    return Err(ConfigError::DuplicateService {
                        environment: env.name.clone(),
                        service: svc.name.clone(),
                    });
                }
            }
        }

        if self.service_update_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "serviceUpdateIntervalSeconds",
                reason: "must be at least 1".into(),
            });
        }
        if self.route_update_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "routeUpdateIntervalSeconds",
                reason: "must be at least 1".into(),
            });
        }
        if self.metrics.pool_max == 0 || self.metrics.pool_max < self.metrics.pool_min {
            return Err(ConfigError::Invalid {
                key: "metrics.poolMax",
                reason: format!(
                    "must be >= poolMin ({}) and non-zero",
                    self.metrics.pool_min
                ),
            });
        }

        Ok(())
    }

    pub fn service_interval(&self) -> Duration {
        Duration::from_secs(self.service_update_interval_seconds)
    }

    pub fn route_interval(&self) -> Duration {
        Duration::from_secs(self.route_update_interval_seconds)
    }
}
