//! Errors raised while polling services and delivering metrics.
//!
//! None of these are fatal: a failed cycle is recorded on the entity that ran
//! it and retried on the next tick, a failed delivery is retried by the drain
//! loop and then dropped. Startup failures live in [`crate::config::ConfigError`].

/// Per-cycle and per-delivery failures
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The remote endpoint could not be reached (connect, timeout, body read)
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote answered, but not with success (HTTP status or Jolokia envelope)
    #[error("remote status: {0}")]
    RemoteStatus(String),
    /// The payload was not valid JSON/XML
    #[error("parse error: {0}")]
    Parse(String),
    /// The metrics sink refused or could not take a metric
    #[error("delivery error: {0}")]
    Delivery(String),
}

impl Error {
    pub fn parse(what: &str, err: impl std::fmt::Display) -> Self {
        Error::Parse(format!("{}: {}", what, err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
