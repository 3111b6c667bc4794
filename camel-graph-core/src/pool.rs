//! Bounded pool of outbound TCP connections
//!
//! Connections are handed out as [`PooledConnection`] guards that go back to
//! the idle set on drop, unless they were marked unusable after a failed
//! write, in which case they are closed. At most `max` connections are lent
//! out at once; further callers wait for one to come back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds both the wait for a free slot and the TCP connect
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("all {max} connections to {addr} stayed in use")]
    Exhausted { addr: String, max: usize },
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to {addr}")]
    Timeout { addr: String },
}

struct Inner {
    addr: String,
    min: usize,
    max: usize,
    timeout: Duration,
    // one permit per lent-out connection; new connections are only opened
    // when the idle set is empty, so idle + lent never exceeds `max`
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<TcpStream>>,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<Inner>,
}

impl ConnectionPool {
    pub fn new(addr: impl Into<String>, min: usize, max: usize) -> Self {
        Self::with_timeout(addr, min, max, ACQUIRE_TIMEOUT)
    }

    pub fn with_timeout(
        addr: impl Into<String>,
        min: usize,
        max: usize,
        timeout: Duration,
    ) -> Self {
        let max = max.max(1);
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                min: min.min(max),
                max,
                timeout,
                slots: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Open connections until `min` are idle. Failures are logged, not fatal:
    /// the pool fills lazily once the sink comes up.
    pub async fn warm(&self) -> usize {
        let mut opened = 0;
        while self.idle_len() < self.inner.min {
            let permit = match self.acquire_slot().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            match self.connect().await {
                Ok(stream) => {
                    drop(PooledConnection::new(stream, permit, self.inner.clone()));
                    opened += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        addr = %self.inner.addr,
                        error = %e,
                        "could not pre-open metrics connection"
                    );
                    break;
                }
            }
        }
        opened
    }

    /// Take an idle connection or open a new one, waiting for a free slot
    /// when `max` connections are already lent out
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        let permit = self.acquire_slot().await?;
        let reused = self.lock_idle().pop();
        let stream = match reused {
            Some(stream) => stream,
            None => self.connect().await?,
        };
        Ok(PooledConnection::new(stream, permit, self.inner.clone()))
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        let exhausted = || PoolError::Exhausted {
            addr: self.inner.addr.clone(),
            max: self.inner.max,
        };
        let slot = self.inner.slots.clone().acquire_owned();
        match tokio::time::timeout(self.inner.timeout, slot).await {
            Ok(Ok(permit)) => Ok(permit),
            // the semaphore is never closed
            Ok(Err(_)) | Err(_) => Err(exhausted()),
        }
    }

    async fn connect(&self) -> Result<TcpStream, PoolError> {
        let connect = TcpStream::connect(&self.inner.addr);
        match tokio::time::timeout(self.inner.timeout, connect).await {
            Ok(Ok(stream)) => {
                tracing::debug!(addr = %self.inner.addr, "opened metrics connection");
                Ok(stream)
            }
            Ok(Err(source)) => Err(PoolError::Connect {
                addr: self.inner.addr.clone(),
                source,
            }),
            Err(_) => Err(PoolError::Timeout {
                addr: self.inner.addr.clone(),
            }),
        }
    }

    pub fn idle_len(&self) -> usize {
        self.lock_idle().len()
    }

    /// Idle plus lent-out connections
    pub fn live(&self) -> usize {
        self.idle_len() + self.lent()
    }

    pub fn lent(&self) -> usize {
        self.inner.max - self.inner.slots.available_permits()
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<TcpStream>> {
        lock_idle(&self.inner)
    }
}

fn lock_idle(inner: &Inner) -> std::sync::MutexGuard<'_, Vec<TcpStream>> {
    // a panic while holding the lock cannot leave the Vec half-updated
    inner.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A connection lent out by the pool
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: Arc<Inner>,
    usable: bool,
    // released after the stream is back in the idle set
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(stream: TcpStream, permit: OwnedSemaphorePermit, pool: Arc<Inner>) -> Self {
        Self {
            stream: Some(stream),
            pool,
            usable: true,
            _permit: permit,
        }
    }

    /// Do not return this connection to the pool
    pub fn mark_unusable(&mut self) {
        self.usable = false;
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if self.usable {
                lock_idle(&self.pool).push(stream);
            } else {
                tracing::debug!(addr = %self.pool.addr, "evicting broken metrics connection");
            }
        }
    }
}
