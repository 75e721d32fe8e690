//! es-exporter - Elasticsearch Prometheus Exporter
//!
//! This crate polls the Elasticsearch stats APIs on every scrape and exposes
//! the results in the Prometheus text exposition format. It can be used as a
//! library by other Rust projects, or run as a standalone binary with the
//! `es-exporter` executable.
//!
//! # Architecture
//!
//! - **Collectors**: One per stats endpoint (cluster health, nodes, indices)
//! - **Registry**: Binds metrics paths to collectors
//! - **Server**: Axum router serving each active path
//! - **Config**: YAML file with CLI and environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use es_exporter::{ClusterHealth, CollectorRegistry, Target, TracingLog, create_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let target = Target::from_url("http://localhost:9200", Duration::from_secs(10))?;
//!     let mut registry = CollectorRegistry::new();
//!     registry.activate("/health_metrics", ClusterHealth::new(target, TracingLog::shared())?)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8005").await?;
//!     axum::serve(listener, create_router(Arc::new(registry))).await?;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod logging;
pub mod server;

#[cfg(test)]
mod test_support;

pub use collector::{
    ClusterHealth, Collector, CollectorError, CollectorRegistry, IndicesStats, NodesStats,
    RegistrationError, Target,
};
pub use config::{AppConfig, ConfigError};
pub use logging::{LogSink, TracingLog};
pub use server::create_router;
