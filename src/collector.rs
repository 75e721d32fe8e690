//! Collector Layer
//!
//! Collectors poll one Elasticsearch stats endpoint per scrape and turn the
//! decoded response into labeled Prometheus samples.
//!
//! # Architecture
//!
//! - [`Collector`]: Two-phase contract (`describe`, `collect`)
//! - [`MetricDef`]: Declarative field-to-metric mapping
//! - [`Target`]: Upstream fetcher with a bounded timeout
//! - [`CollectorRegistry`]: Binds URL paths to collectors, one isolated
//!   descriptor namespace per path
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use es_exporter::collector::{ClusterHealth, CollectorRegistry, Target};
//! use es_exporter::logging::TracingLog;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let target = Target::from_url("http://localhost:9200", Duration::from_secs(10))?;
//! let mut registry = CollectorRegistry::new();
//! registry.activate("/health_metrics", ClusterHealth::new(target, TracingLog::shared())?)?;
//! let body = registry.scrape("/health_metrics").await;
//! # Ok(())
//! # }
//! ```

pub mod fetch;
pub mod health;
pub mod indices;
pub mod metric;
pub mod nodes;
mod registry;
mod traits;

pub use fetch::{Target, build_client};
pub use health::ClusterHealth;
pub use indices::IndicesStats;
pub use metric::{Liveness, MetricDef, Sample, ValueType, encode_text};
pub use nodes::NodesStats;
pub use registry::{CollectorRegistry, MetricsRegistry, RegistrationError};
pub use traits::{Collector, CollectorError, ContractViolation, NAMESPACE, check_contract};
