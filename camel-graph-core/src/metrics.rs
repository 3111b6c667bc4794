//! Route metrics pipeline
//!
//! Every route owns a bounded FIFO of [`Metric`]s and a drain task that hands
//! them, one at a time and in order, to the configured [`MetricConsumer`].
//! Failed sends are retried according to a [`Backoff`] policy and then
//! dropped: delivery is best effort.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Deep enough for many reconciliation bursts of eleven samples
pub const METRIC_QUEUE_CAPACITY: usize = 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// One sample bound for the time-series sink
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }
}

/// Base name shared by all samples of one route:
/// `<prefix>.<env>.<service>.<context>_<route>`, the route part flattened so
/// it stays a single path segment
pub fn route_metric_base(
    prefix: &str,
    environment: &str,
    service: &str,
    context: &str,
    route_id: &str,
) -> String {
    let route = format!("{}_{}", context.replace(' ', "_"), route_id.replace(' ', "_"))
        .replace('.', "_");
    format!(
        "{}.{}.{}.{}",
        prefix,
        environment.replace(' ', "_"),
        service.replace(' ', "_"),
        route
    )
}

/// Destination of route metrics
#[async_trait]
pub trait MetricConsumer: Send + Sync {
    /// Hand one metric to the sink. An error means "try again later".
    async fn consume_metric(&self, metric: &Metric) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Discards everything
pub struct StubConsumer;

#[async_trait]
impl MetricConsumer for StubConsumer {
    async fn consume_metric(&self, _metric: &Metric) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// How often and how patiently a failed send is retried
pub trait Backoff: Send + Sync {
    /// Total attempts, the first one included
    fn max_attempts(&self) -> u32;
    /// Pause after failed attempt number `attempt` (1-based)
    fn delay(&self, attempt: u32) -> Duration;
}

/// Attempt `n` is followed by a pause of `n * base_delay`
#[derive(Clone, Debug)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl LinearBackoff {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            max_attempts: 4,
            base_delay,
        }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Backoff for LinearBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Outcome of pushing one metric through retries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    Dropped,
}

/// Send `metric`, retrying with `backoff`; the metric is dropped (and logged) once attempts run out
pub async fn deliver(
    consumer: &dyn MetricConsumer,
    backoff: &dyn Backoff,
    metric: &Metric,
) -> Delivery {
    let max = backoff.max_attempts().max(1);
    let mut attempt = 1;
    loop {
        match consumer.consume_metric(metric).await {
            Ok(()) => return Delivery::Delivered { attempts: attempt },
            Err(e) if attempt >= max => {
                tracing::warn!(
                    metric = %metric.name,
                    consumer = consumer.name(),
                    attempts = attempt,
                    error = %e,
                    "dropping metric"
                );
                return Delivery::Dropped;
            }
            Err(e) => {
                let pause = backoff.delay(attempt);
                tracing::debug!(
                    metric = %metric.name,
                    attempt,
                    of = max - 1,
                    pause_ms = pause.as_millis() as u64,
                    error = %e,
                    "metric send failed, will retry"
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
        }
    }
}

/// Producer side of a route's metric queue
#[derive(Clone)]
pub struct MetricQueue {
    tx: mpsc::Sender<Metric>,
}

impl MetricQueue {
    /// Create a queue and spawn its drain task
    pub fn spawn(
        consumer: Arc<dyn MetricConsumer>,
        backoff: Arc<dyn Backoff>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Metric>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(metric) = rx.recv().await {
                deliver(consumer.as_ref(), backoff.as_ref(), &metric).await;
            }
        });
        (Self { tx }, handle)
    }

    /// Enqueue, waiting for room when the queue is full
    pub async fn push(&self, metric: Metric) {
        if self.tx.send(metric).await.is_err() {
            tracing::debug!("metric queue closed, sample discarded");
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
