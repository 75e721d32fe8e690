//! Configuration module for the exporter.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Upstream settings (base URL, request timeout)
//! - Server settings (listen address)
//! - Metrics paths (one per collector kind)

mod app;
mod validation;

pub use app::{AppConfig, CollectorKind, PathsConfig, ServerConfig, UpstreamConfig};
pub use validation::{ConfigError, parse_duration, parse_listen_address};

// Re-export constants
pub use app::{
    DEFAULT_HEALTH_PATH, DEFAULT_INDICES_PATH, DEFAULT_LISTEN_ADDRESS, DEFAULT_NODES_PATH,
    DEFAULT_TIMEOUT, DEFAULT_UPSTREAM_URL, RESERVED_PATHS,
};
