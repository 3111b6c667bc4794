pub mod config;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod jolokia;

// Entities and their update loops
pub mod route;
pub mod service;
pub mod topology;
pub mod worker;

// Metrics pipeline and sinks
pub mod graphite;
pub mod metrics;
pub mod pool;

// Read-only views for the query layer
pub mod snapshot;

pub use error::{Error, Result};
