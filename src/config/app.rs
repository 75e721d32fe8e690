//! Application configuration structures.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, parse_listen_address};

// =============================================================================
// Constants
// =============================================================================

/// Default upstream address.
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:9200";

/// Default upstream request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8005";

/// Default path for cluster health metrics.
pub const DEFAULT_HEALTH_PATH: &str = "/health_metrics";

/// Default path for node metrics.
pub const DEFAULT_NODES_PATH: &str = "/node_metrics";

/// Default path for index metrics.
pub const DEFAULT_INDICES_PATH: &str = "/indice_metrics";

/// Paths served by the exporter itself.
pub const RESERVED_PATHS: &[&str] = &["/", "/healthz"];

// =============================================================================
// Upstream Configuration
// =============================================================================

/// Elasticsearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL (default: "http://localhost:9200"). Its path is ignored.
    pub url: String,

    /// Timeout for each stats request (default: 10s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (default: "0.0.0.0:8005"). `:port` is accepted.
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

// =============================================================================
// Metrics Paths
// =============================================================================

/// Collector bound to a metrics path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Health,
    Nodes,
    Indices,
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Nodes => "nodes",
            Self::Indices => "indices",
        }
    }
}

impl std::fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL path per collector kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Cluster health metrics (default: "/health_metrics").
    pub health: String,

    /// Node metrics (default: "/node_metrics").
    pub nodes: String,

    /// Index metrics (default: "/indice_metrics").
    pub indices: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            health: DEFAULT_HEALTH_PATH.to_string(),
            nodes: DEFAULT_NODES_PATH.to_string(),
            indices: DEFAULT_INDICES_PATH.to_string(),
        }
    }
}

impl PathsConfig {
    /// `(kind, path)` pairs.
    pub fn entries(&self) -> [(CollectorKind, &str); 3] {
        [
            (CollectorKind::Health, self.health.as_str()),
            (CollectorKind::Nodes, self.nodes.as_str()),
            (CollectorKind::Indices, self.indices.as_str()),
        ]
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Upstream connection settings.
    pub elasticsearch: UpstreamConfig,

    /// Web server configuration.
    pub server: ServerConfig,

    /// Metrics paths.
    pub paths: PathsConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Values are not validated here; call [`AppConfig::validate`] once CLI
    /// and environment overrides have been applied.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate upstream URL
        self.upstream_url()?;

        // Validate timeout
        if self.elasticsearch.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "elasticsearch timeout must be non-zero".to_string(),
            ));
        }

        // Validate listen address
        self.listen_address()?;

        // Validate metrics paths
        let mut seen = HashSet::new();
        for (kind, path) in self.paths.entries() {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "{} metrics path must start with '/': '{}'",
                    kind, path
                )));
            }
            if RESERVED_PATHS.contains(&path) {
                return Err(ConfigError::ValidationError(format!(
                    "{} metrics path '{}' is reserved",
                    kind, path
                )));
            }
            if !seen.insert(path) {
                return Err(ConfigError::ValidationError(format!(
                    "metrics path '{}' is used more than once",
                    path
                )));
            }
        }

        Ok(())
    }

    /// Parsed upstream base URL.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` unless the URL is http(s).
    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.elasticsearch.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid elasticsearch url '{}': {}",
                self.elasticsearch.url, e
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::ValidationError(format!(
                "unsupported elasticsearch url scheme '{}'",
                other
            ))),
        }
    }

    /// Parsed listen address.
    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        parse_listen_address(&self.server.listen_address).map_err(ConfigError::ValidationError)
    }
}
