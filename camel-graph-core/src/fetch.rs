//! Remote fetcher for management endpoints
//!
//! One GET, optional basic auth, fixed timeout. Retrying is the business of
//! the update loops, which already come back on every tick.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Authorization;
use crate::error::{Error, Result};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Anything that can read a management URL.
///
/// - `HttpFetcher`: the real client
/// - test fakes serving canned bodies per URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, returning the full body of a 200 response
    async fn fetch(&self, url: &str, authorization: Option<&Authorization>) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher, shared by every loop (the client pools connections)
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, authorization: Option<&Authorization>) -> Result<Vec<u8>> {
        let mut req = self.client.get(url);
        if let Some(auth) = authorization {
            req = req.basic_auth(&auth.login, Some(&auth.pass));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::RemoteStatus(format!("Status {}", status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }
}
