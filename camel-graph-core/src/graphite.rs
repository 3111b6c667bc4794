//! Graphite plaintext sink
//!
//! One metric per write: `"<name> <value> <unix_seconds>\r\n\r\n"` over a
//! pooled TCP connection.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::metrics::{Metric, MetricConsumer};
use crate::pool::ConnectionPool;

pub const LINE_TERMINATOR: &str = "\r\n\r\n";

pub fn format_line(metric: &Metric) -> String {
    format!(
        "{} {} {}{}",
        metric.name,
        metric.value,
        metric.timestamp.timestamp(),
        LINE_TERMINATOR
    )
}

pub struct GraphiteConsumer {
    pool: ConnectionPool,
    /// When no connection can be obtained: `true` fails the send (and the drain loop retries),
    /// `false` drops the metric and reports success
    repeat_send_on_fail: bool,
}

impl GraphiteConsumer {
    pub fn new(pool: ConnectionPool, repeat_send_on_fail: bool) -> Self {
        Self {
            pool,
            repeat_send_on_fail,
        }
    }

    /// Build the pool for `addr` and pre-open its minimum connections
    pub async fn connect(addr: &str, min: usize, max: usize, repeat_send_on_fail: bool) -> Self {
        let pool = ConnectionPool::new(addr, min, max);
        let opened = pool.warm().await;
        tracing::info!(addr, opened, max, "graphite sink ready");
        Self::new(pool, repeat_send_on_fail)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[async_trait]
impl MetricConsumer for GraphiteConsumer {
    async fn consume_metric(&self, metric: &Metric) -> Result<()> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) if self.repeat_send_on_fail => {
                tracing::debug!(
                    addr = self.pool.addr(),
                    error = %e,
                    "could not connect to graphite"
                );
                return Err(Error::Delivery(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    addr = self.pool.addr(),
                    metric = %metric.name,
                    error = %e,
                    "could not connect to graphite, metric will be lost"
                );
                return Ok(());
            }
        };

        let line = format_line(metric);
        if let Err(e) = conn.write_all(line.as_bytes()).await {
            tracing::warn!(
                addr = self.pool.addr(),
                error = %e,
                "graphite connection broken, closing it"
            );
            conn.mark_unusable();
            return Err(Error::Delivery(e.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "graphite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn sample() -> Metric {
        Metric::new(
            "camel-graph.prod.orders.ctx_r1.exchanges_total",
            5i64,
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn test_format_line() {
        assert_eq!(
            format_line(&sample()),
            "camel-graph.prod.orders.ctx_r1.exchanges_total 5 1700000000\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_metric_written_to_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sink = GraphiteConsumer::connect(&addr, 0, 2, true).await;

        sink.consume_metric(&sample()).await.unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let expected = format_line(&sample());
        let mut buf = vec![0u8; expected.len()];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
        // connection went back to the pool
        assert_eq!(sink.pool().idle_len(), 1);
    }

    #[tokio::test]
    async fn test_busy_pool_waits_instead_of_dropping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sink = GraphiteConsumer::new(ConnectionPool::new(&addr, 0, 1), false);

        let first = sample();
        let mut second = sample();
        second.name = "camel-graph.prod.orders.ctx_r2.exchanges_total".into();
        let (a, b) = tokio::join!(sink.consume_metric(&first), sink.consume_metric(&second));
        a.unwrap();
        b.unwrap();

        // both lines went over the single pooled connection
        let (mut socket, _) = listener.accept().await.unwrap();
        let expected = format_line(&first).len() + format_line(&second).len();
        let mut buf = vec![0u8; expected];
        socket.read_exact(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(&format_line(&first)));
        assert!(text.contains(&format_line(&second)));
        assert_eq!(sink.pool().live(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_sink_policy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dropping = GraphiteConsumer::new(ConnectionPool::new(&addr, 0, 1), false);
        assert!(dropping.consume_metric(&sample()).await.is_ok());

        let retrying = GraphiteConsumer::new(ConnectionPool::new(&addr, 0, 1), true);
        let err = retrying.consume_metric(&sample()).await.unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
    }
}
