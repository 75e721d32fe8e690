//! es-exporter Binary Entry Point
//!
//! Runs the exporter HTTP server. Core functionality is provided by the
//! `es_exporter` library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use es_exporter::{
    collector::{
        ClusterHealth, Collector, CollectorRegistry, IndicesStats, NodesStats, Target, build_client,
    },
    config::{AppConfig, CollectorKind, parse_duration},
    logging::{self, LogSink, TracingLog},
    server::create_router,
};

/// Elasticsearch Prometheus Exporter
#[derive(Parser, Debug)]
#[command(name = "es-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, env = "ES_EXPORTER_CONFIG")]
    config: Option<String>,

    /// Elasticsearch base URL (overrides config file)
    #[arg(long, env = "ES_EXPORTER_ES_URL")]
    es_url: Option<String>,

    /// Upstream request timeout, e.g. "10s" (overrides config file)
    #[arg(long, env = "ES_EXPORTER_ES_TIMEOUT", value_parser = parse_duration)]
    es_timeout: Option<Duration>,

    /// Listen address, e.g. ":8005" (overrides config file)
    #[arg(long, env = "ES_EXPORTER_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Cluster health metrics path (overrides config file)
    #[arg(long, env = "ES_EXPORTER_HEALTH_METRICS_PATH")]
    health_metrics_path: Option<String>,

    /// Node metrics path (overrides config file)
    #[arg(long, env = "ES_EXPORTER_NODE_METRICS_PATH")]
    node_metrics_path: Option<String>,

    /// Index metrics path (overrides config file)
    #[arg(long, env = "ES_EXPORTER_INDICE_METRICS_PATH")]
    indice_metrics_path: Option<String>,
}

impl Cli {
    /// Apply CLI/env overrides (CLI > ENV > config file).
    fn apply(self, config: &mut AppConfig) {
        if let Some(url) = self.es_url {
            config.elasticsearch.url = url;
        }
        if let Some(timeout) = self.es_timeout {
            config.elasticsearch.timeout = timeout;
        }
        if let Some(addr) = self.listen_address {
            config.server.listen_address = addr;
        }
        if let Some(path) = self.health_metrics_path {
            config.paths.health = path;
        }
        if let Some(path) = self.node_metrics_path {
            config.paths.nodes = path;
        }
        if let Some(path) = self.indice_metrics_path {
            config.paths.indices = path;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    tracing::info!("Elasticsearch Prometheus Exporter {}", env!("CARGO_PKG_VERSION"));

    // Parse CLI arguments
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        "Upstream: {} (timeout {:?}), listen: {}",
        config.elasticsearch.url,
        config.elasticsearch.timeout,
        config.server.listen_address,
    );

    // One connection pool shared by every collector
    let client = build_client(config.elasticsearch.timeout)?;
    let base = config.upstream_url()?;

    let mut registry = CollectorRegistry::new();
    for (kind, path) in config.paths.entries() {
        let target = Target::new(client.clone(), base.clone(), config.elasticsearch.timeout);
        let log: Arc<dyn LogSink> = Arc::new(TracingLog::with_source(kind.as_str()));

        let collector = match build_collector(kind, target, log) {
            Ok(collector) => collector,
            Err(e) => {
                tracing::error!("Failed to build {} collector: {}", kind, e);
                continue;
            }
        };
        // Failure only disables this path; the registry logs the reason
        if registry.activate_shared(path, collector).is_err() {
            continue;
        }
    }

    if registry.is_empty() {
        tracing::warn!("No metrics path is active");
    }

    // Build Axum router
    let app = create_router(Arc::new(registry));

    let addr = config.listen_address()?;
    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Construct the collector for one configured path kind.
fn build_collector(
    kind: CollectorKind,
    target: Target,
    log: Arc<dyn LogSink>,
) -> prometheus::Result<Arc<dyn Collector>> {
    let collector: Arc<dyn Collector> = match kind {
        CollectorKind::Health => Arc::new(ClusterHealth::new(target, log)?),
        CollectorKind::Nodes => Arc::new(NodesStats::new(target, log)?),
        CollectorKind::Indices => Arc::new(IndicesStats::new(target, log)?),
    };
    Ok(collector)
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down web server...");
}
