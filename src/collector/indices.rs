//! Per-index statistics collector (`/_all/_stats`).

use std::sync::Arc;

use indexmap::IndexMap;
use prometheus::core::Desc;
use serde::Deserialize;
use tracing::Level;

use crate::collector::fetch::Target;
use crate::collector::metric::{Liveness, MetricDef, Sample};
use crate::collector::Collector;
use crate::logging::LogSink;

const SUBSYSTEM: &str = "indices";

/// Upstream sub-path.
pub const INDICES_PATH: &str = "/_all/_stats";

const INDEX_LABELS: &[&str] = &["index"];

/// Decoded `/_all/_stats` body.
///
/// Indices are keyed by name; iteration follows upstream order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndicesStatsResponse {
    pub indices: IndexMap<String, IndexStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexStats {
    pub primaries: ShardStats,
    pub total: ShardStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShardStats {
    pub docs: DocsStats,
    pub store: StoreStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocsStats {
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreStats {
    pub size_in_bytes: u64,
}

/// One index: its name and its stats.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: String,
    pub stats: IndexStats,
}

fn index_label(entry: &IndexEntry) -> Vec<String> {
    vec![entry.name.clone()]
}

fn index_metrics() -> prometheus::Result<Vec<MetricDef<IndexEntry>>> {
    Ok(vec![
        MetricDef::gauge(
            SUBSYSTEM,
            "docs_primary",
            "Count of documents with only primary shards",
            INDEX_LABELS,
            |e| e.stats.primaries.docs.count as f64,
            index_label,
        )?,
        MetricDef::gauge(
            SUBSYSTEM,
            "store_size_bytes_primary",
            "Current total size of stored index data in bytes with only primary shards on all nodes.",
            INDEX_LABELS,
            |e| e.stats.primaries.store.size_in_bytes as f64,
            index_label,
        )?,
        MetricDef::gauge(
            SUBSYSTEM,
            "store_size_bytes_total",
            "Current total size of stored index data in bytes with all shards on all nodes.",
            INDEX_LABELS,
            |e| e.stats.total.store.size_in_bytes as f64,
            index_label,
        )?,
    ])
}

/// Per-index statistics collector.
pub struct IndicesStats {
    target: Target,
    log: Arc<dyn LogSink>,
    up: Liveness,
    metrics: Vec<MetricDef<IndexEntry>>,
}

impl IndicesStats {
    /// Create a collector for `target`.
    ///
    /// # Errors
    /// Returns a `prometheus::Error` if a metric descriptor is invalid.
    pub fn new(target: Target, log: Arc<dyn LogSink>) -> prometheus::Result<Self> {
        Ok(Self {
            target,
            log,
            up: Liveness::new(SUBSYSTEM, "cluster alive")?,
            metrics: index_metrics()?,
        })
    }
}

impl std::fmt::Debug for IndicesStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicesStats")
            .field("target", &self.target.base().as_str())
            .field("metrics", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for IndicesStats {
    fn name(&self) -> &str {
        SUBSYSTEM
    }

    fn describe(&self) -> Vec<Arc<Desc>> {
        self.metrics
            .iter()
            .map(|m| Arc::clone(m.desc()))
            .chain(std::iter::once(self.up.desc()))
            .collect()
    }

    fn liveness(&self) -> &Liveness {
        &self.up
    }

    async fn collect(&self) -> Vec<Sample> {
        let response = match self.target.fetch::<IndicesStatsResponse>(INDICES_PATH).await {
            Ok(response) => response,
            Err(e) => {
                self.log
                    .log(Level::WARN, &format!("get indices info failed {}", e));
                return vec![self.up.record(false)];
            }
        };

        let mut samples = Vec::with_capacity(response.indices.len() * self.metrics.len() + 1);
        for (name, stats) in response.indices {
            let entry = IndexEntry { name, stats };
            samples.extend(self.metrics.iter().map(|m| m.sample(&entry)));
        }
        samples.push(self.up.record(true));
        samples
    }
}
