//! Per-node statistics collector (`/_nodes/stats`).

use std::sync::Arc;

use indexmap::IndexMap;
use prometheus::core::Desc;
use serde::Deserialize;
use tracing::Level;

use crate::collector::fetch::Target;
use crate::collector::metric::{Liveness, MetricDef, Sample};
use crate::collector::Collector;
use crate::logging::LogSink;

const SUBSYSTEM: &str = "nodes";

/// Upstream sub-path.
pub const NODES_PATH: &str = "/_nodes/stats";

const NODE_LABELS: &[&str] = &["cluster", "node_id", "node", "host"];

/// Decoded `/_nodes/stats` body. Nodes are keyed by node id, in upstream order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodesStatsResponse {
    pub cluster_name: String,
    pub nodes: IndexMap<String, NodeStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeStats {
    pub name: String,
    pub host: String,
    pub indices: NodeIndicesStats,
    pub jvm: JvmStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeIndicesStats {
    pub docs: CountStats,
    pub store: SizeStats,
    pub indexing: IndexingStats,
    pub search: SearchStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CountStats {
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SizeStats {
    pub size_in_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexingStats {
    pub index_total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchStats {
    pub query_total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JvmStats {
    pub mem: JvmMemStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JvmMemStats {
    pub heap_used_in_bytes: u64,
    pub heap_max_in_bytes: u64,
}

/// One node together with its id and the cluster it reports for.
///
/// Names and hosts can repeat across nodes; the id cannot.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub cluster: String,
    pub id: String,
    pub stats: NodeStats,
}

fn node_labels(entry: &NodeEntry) -> Vec<String> {
    vec![
        entry.cluster.clone(),
        entry.id.clone(),
        entry.stats.name.clone(),
        entry.stats.host.clone(),
    ]
}

fn node_metrics() -> prometheus::Result<Vec<MetricDef<NodeEntry>>> {
    Ok(vec![
        MetricDef::gauge(
            SUBSYSTEM,
            "docs_count",
            "Count of documents on this node.",
            NODE_LABELS,
            |e| e.stats.indices.docs.count as f64,
            node_labels,
        )?,
        MetricDef::gauge(
            SUBSYSTEM,
            "store_size_bytes",
            "Current size of stored index data in bytes on this node.",
            NODE_LABELS,
            |e| e.stats.indices.store.size_in_bytes as f64,
            node_labels,
        )?,
        MetricDef::counter(
            SUBSYSTEM,
            "indexing_index_total",
            "Total index calls handled by this node.",
            NODE_LABELS,
            |e| e.stats.indices.indexing.index_total as f64,
            node_labels,
        )?,
        MetricDef::counter(
            SUBSYSTEM,
            "search_query_total",
            "Total search queries handled by this node.",
            NODE_LABELS,
            |e| e.stats.indices.search.query_total as f64,
            node_labels,
        )?,
        MetricDef::gauge(
            SUBSYSTEM,
            "jvm_heap_used_bytes",
            "JVM heap currently in use, in bytes.",
            NODE_LABELS,
            |e| e.stats.jvm.mem.heap_used_in_bytes as f64,
            node_labels,
        )?,
        MetricDef::gauge(
            SUBSYSTEM,
            "jvm_heap_max_bytes",
            "Maximum JVM heap available, in bytes.",
            NODE_LABELS,
            |e| e.stats.jvm.mem.heap_max_in_bytes as f64,
            node_labels,
        )?,
    ])
}

/// Per-node statistics collector.
pub struct NodesStats {
    target: Target,
    log: Arc<dyn LogSink>,
    up: Liveness,
    metrics: Vec<MetricDef<NodeEntry>>,
}

impl NodesStats {
    /// Create a collector for `target`.
    ///
    /// # Errors
    /// Returns a `prometheus::Error` if a metric descriptor is invalid.
    pub fn new(target: Target, log: Arc<dyn LogSink>) -> prometheus::Result<Self> {
        Ok(Self {
            target,
            log,
            up: Liveness::new(SUBSYSTEM, "nodes stats reachable")?,
            metrics: node_metrics()?,
        })
    }
}

impl std::fmt::Debug for NodesStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodesStats")
            .field("target", &self.target.base().as_str())
            .field("metrics", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for NodesStats {
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
        let response = match self.target.fetch::<NodesStatsResponse>(NODES_PATH).await {
            Ok(response) => response,
            Err(e) => {
                self.log
                    .log(Level::WARN, &format!("get nodes stats failed {}", e));
                return vec![self.up.record(false)];
            }
        };

        let cluster = response.cluster_name;
        let mut samples = Vec::with_capacity(response.nodes.len() * self.metrics.len() + 1);
        for (id, stats) in response.nodes {
            let entry = NodeEntry {
                cluster: cluster.clone(),
                id,
                stats,
            };
            samples.extend(self.metrics.iter().map(|m| m.sample(&entry)));
        }
        samples.push(self.up.record(true));
        samples
    }
}
