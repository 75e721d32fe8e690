//! Cluster health collector (`/_cluster/health`).

use std::sync::Arc;

use prometheus::core::Desc;
use serde::Deserialize;
use tracing::Level;

use crate::collector::fetch::Target;
use crate::collector::metric::{Liveness, MetricDef, Sample, ValueType, new_desc};
use crate::collector::Collector;
use crate::logging::LogSink;

const SUBSYSTEM: &str = "cluster_health";

/// Upstream sub-path.
pub const HEALTH_PATH: &str = "/_cluster/health";

/// Every color the upstream can report, in emission order.
pub const COLORS: [&str; 3] = ["green", "yellow", "red"];

const CLUSTER_LABELS: &[&str] = &["cluster"];

/// Decoded `/_cluster/health` body. Missing fields decode as zero.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterHealthResponse {
    pub cluster_name: String,
    pub status: String,
    pub timed_out: bool,
    pub number_of_nodes: u64,
    pub number_of_data_nodes: u64,
    pub active_primary_shards: u64,
    pub active_shards: u64,
    pub relocating_shards: u64,
    pub initializing_shards: u64,
    pub unassigned_shards: u64,
    pub delayed_unassigned_shards: u64,
    pub number_of_pending_tasks: u64,
    pub number_of_in_flight_fetch: u64,
}

fn cluster_label(h: &ClusterHealthResponse) -> Vec<String> {
    vec![h.cluster_name.clone()]
}

fn health_metrics() -> prometheus::Result<Vec<MetricDef<ClusterHealthResponse>>> {
    let gauge = |name: &str, help: &str, value: fn(&ClusterHealthResponse) -> f64| {
        MetricDef::gauge(SUBSYSTEM, name, help, CLUSTER_LABELS, value, cluster_label)
    };

    Ok(vec![
        gauge(
            "active_primary_shards",
            "The number of active primary shards.",
            |h| h.active_primary_shards as f64,
        )?,
        gauge(
            "active_shards",
            "The total number of all active shards.",
            |h| h.active_shards as f64,
        )?,
        gauge(
            "delayed_unassigned_shards",
            "Shards delayed to reduce reallocation overhead.",
            |h| h.delayed_unassigned_shards as f64,
        )?,
        gauge(
            "initializing_shards",
            "Count of shards that are being freshly created.",
            |h| h.initializing_shards as f64,
        )?,
        gauge(
            "number_of_data_nodes",
            "Number of data nodes in the cluster.",
            |h| h.number_of_data_nodes as f64,
        )?,
        gauge(
            "number_of_in_flight_fetch",
            "The number of ongoing shard info requests.",
            |h| h.number_of_in_flight_fetch as f64,
        )?,
        gauge(
            "number_of_nodes",
            "Number of nodes in the cluster.",
            |h| h.number_of_nodes as f64,
        )?,
        gauge(
            "number_of_pending_tasks",
            "Cluster level changes which have not yet been executed.",
            |h| h.number_of_pending_tasks as f64,
        )?,
        gauge(
            "relocating_shards",
            "The number of shards that are currently moving from one node to another node.",
            |h| h.relocating_shards as f64,
        )?,
        gauge(
            "timed_out",
            "Number of cluster health checks timed out.",
            |h| if h.timed_out { 1.0 } else { 0.0 },
        )?,
        gauge(
            "unassigned_shards",
            "The number of shards that exist in the cluster state, but cannot be found in the cluster itself.",
            |h| h.unassigned_shards as f64,
        )?,
    ])
}

/// One-hot health color: a sample per color, 1 for the reported one.
///
/// An unrecognized status matches nothing, so every color reports 0.
#[derive(Debug)]
struct StatusMetric {
    desc: Arc<Desc>,
}

impl StatusMetric {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            desc: Arc::new(new_desc(
                SUBSYSTEM,
                "status",
                "Whether all shards are allocated",
                &["cluster", "color"],
            )?),
        })
    }

    fn samples(&self, health: &ClusterHealthResponse) -> impl Iterator<Item = Sample> + '_ {
        let cluster = health.cluster_name.clone();
        let status = health.status.clone();
        COLORS.iter().map(move |color| Sample {
            desc: Arc::clone(&self.desc),
            value_type: ValueType::Gauge,
            label_values: vec![cluster.clone(), color.to_string()],
            value: if status == *color { 1.0 } else { 0.0 },
        })
    }
}

/// Cluster health collector.
pub struct ClusterHealth {
    target: Target,
    log: Arc<dyn LogSink>,
    up: Liveness,
    metrics: Vec<MetricDef<ClusterHealthResponse>>,
    status: StatusMetric,
}

impl ClusterHealth {
    /// Create a collector for `target`.
    ///
    /// # Errors
    /// Returns a `prometheus::Error` if a metric descriptor is invalid.
    pub fn new(target: Target, log: Arc<dyn LogSink>) -> prometheus::Result<Self> {
        Ok(Self {
            target,
            log,
            up: Liveness::new(SUBSYSTEM, "cluster alive")?,
            metrics: health_metrics()?,
            status: StatusMetric::new()?,
        })
    }
}

impl std::fmt::Debug for ClusterHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHealth")
            .field("target", &self.target.base().as_str())
            .field("metrics", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for ClusterHealth {
    fn name(&self) -> &str {
        SUBSYSTEM
    }

    fn describe(&self) -> Vec<Arc<Desc>> {
        self.metrics
            .iter()
            .map(|m| Arc::clone(m.desc()))
            .chain([Arc::clone(&self.status.desc), self.up.desc()])
            .collect()
    }

    fn liveness(&self) -> &Liveness {
        &self.up
    }

    async fn collect(&self) -> Vec<Sample> {
        let health = match self.target.fetch::<ClusterHealthResponse>(HEALTH_PATH).await {
            Ok(health) => health,
            Err(e) => {
                self.log.log(
                    Level::WARN,
                    &format!("Can not get metric from elasticsearch, err {}", e),
                );
                return vec![self.up.record(false)];
            }
        };

        let mut samples: Vec<Sample> = self.metrics.iter().map(|m| m.sample(&health)).collect();
        samples.extend(self.status.samples(&health));
        samples.push(self.up.record(true));
        samples
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};

    use super::*;
    use crate::collector::check_contract;
    use crate::test_support::{RecordingLog, spawn_upstream};

    const FIXTURE: &str = r#"{"cluster_name":"es","status":"green","timed_out":false,"number_of_nodes":65,"number_of_data_nodes":62,"active_primary_shards":11331,"active_shards":21882,"relocating_shards":2,"initializing_shards":0,"unassigned_shards":0,"delayed_unassigned_shards":0,"number_of_pending_tasks":0,"number_of_in_flight_fetch":0,"task_max_waiting_in_queue_millis":0,"active_shards_percent_as_number":100.0}"#;

    async fn collector_for(body: &'static str) -> (ClusterHealth, Arc<RecordingLog>) {
        let base =
            spawn_upstream(Router::new().route(HEALTH_PATH, get(move || async move { body }))).await;
        let log = RecordingLog::new();
        let target = Target::from_url(base.as_str(), Duration::from_secs(2)).unwrap();
        (ClusterHealth::new(target, log.clone()).unwrap(), log)
    }

    /// Upstream alternating between the fixture (even requests) and a 503.
    async fn flapping_collector() -> ClusterHealth {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(Router::new().route(
            HEALTH_PATH,
            get(move || {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        FIXTURE.into_response()
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    }
                }
            }),
        ))
        .await;
        let target = Target::from_url(base.as_str(), Duration::from_secs(2)).unwrap();
        ClusterHealth::new(target, RecordingLog::new()).unwrap()
    }

    fn described(c: &ClusterHealth) -> Vec<(u64, String, String, Vec<String>)> {
        c.describe()
            .iter()
            .map(|d| (d.id, d.fq_name.clone(), d.help.clone(), d.variable_labels.clone()))
            .collect()
    }

    fn find<'a>(samples: &'a [Sample], name: &str, labels: &[(&str, &str)]) -> Option<&'a Sample> {
        samples.iter().find(|s| {
            s.name() == name && labels.iter().all(|(k, v)| s.label(k) == Some(*v))
        })
    }

    #[tokio::test]
    async fn test_collect_fixture() {
        let (collector, log) = collector_for(FIXTURE).await;
        let samples = collector.collect().await;

        check_contract(&collector, &samples).unwrap();
        assert!(log.entries().is_empty());

        let primary = find(
            &samples,
            "elasticsearch_cluster_health_active_primary_shards",
            &[("cluster", "es")],
        )
        .unwrap();
        assert_eq!(primary.value, 11331.0);

        let nodes = find(&samples, "elasticsearch_cluster_health_number_of_nodes", &[]).unwrap();
        assert_eq!(nodes.value, 65.0);

        let timed_out = find(&samples, "elasticsearch_cluster_health_timed_out", &[]).unwrap();
        assert_eq!(timed_out.value, 0.0);

        for (color, expected) in [("green", 1.0), ("yellow", 0.0), ("red", 0.0)] {
            let s = find(
                &samples,
                "elasticsearch_cluster_health_status",
                &[("cluster", "es"), ("color", color)],
            )
            .unwrap();
            assert_eq!(s.value, expected, "color {color}");
        }

        let up = samples.last().unwrap();
        assert_eq!(up.name(), "elasticsearch_cluster_health_up");
        assert_eq!(up.value, 1.0);
        assert_eq!(collector.liveness().get(), 1.0);

        // 11 table metrics + 3 colors + up
        assert_eq!(samples.len(), 15);
    }

    #[tokio::test]
    async fn test_collect_is_reproducible() {
        let (collector, _log) = collector_for(FIXTURE).await;
        let first: Vec<_> = collector
            .collect()
            .await
            .into_iter()
            .map(|s| (s.name().to_string(), s.label_values, s.value))
            .collect();
        let second: Vec<_> = collector
            .collect()
            .await
            .into_iter()
            .map(|s| (s.name().to_string(), s.label_values, s.value))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_status_one_hot() {
        let cases = [
            ("green", Some("green")),
            ("yellow", Some("yellow")),
            ("red", Some("red")),
            ("purple", None),
        ];
        for (status, hot) in cases {
            let health = ClusterHealthResponse {
                cluster_name: "es".into(),
                status: status.into(),
                ..Default::default()
            };
            let metric = StatusMetric::new().unwrap();
            let samples: Vec<_> = metric.samples(&health).collect();
            assert_eq!(samples.len(), COLORS.len());

            let ones: Vec<_> = samples.iter().filter(|s| s.value == 1.0).collect();
            match hot {
                Some(color) => {
                    assert_eq!(ones.len(), 1);
                    assert_eq!(ones[0].label("color"), Some(color));
                }
                None => assert!(ones.is_empty()),
            }
        }
    }

    #[tokio::test]
    async fn test_collect_status_error_reports_down() {
        let base = spawn_upstream(Router::new().route(
            HEALTH_PATH,
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let log = RecordingLog::new();
        let target = Target::from_url(base.as_str(), Duration::from_secs(2)).unwrap();
        let collector = ClusterHealth::new(target, log.clone()).unwrap();

        let samples = collector.collect().await;
        check_contract(&collector, &samples).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "elasticsearch_cluster_health_up");
        assert_eq!(samples[0].value, 0.0);

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Level::WARN);
        assert!(entries[0].1.contains("503"));
    }

    #[tokio::test]
    async fn test_collect_decode_error_reports_down() {
        let (collector, log) = collector_for("not json").await;
        let samples = collector.collect().await;

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 0.0);
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_liveness_recovers() {
        let (collector, _log) = collector_for(FIXTURE).await;
        collector.up.record(false);
        assert_eq!(collector.liveness().get(), 0.0);

        collector.collect().await;
        assert_eq!(collector.liveness().get(), 1.0);
    }

    #[test]
    fn test_describe_is_stable() {
        let target = Target::from_url("http://127.0.0.1:1", Duration::from_millis(100)).unwrap();
        let collector = ClusterHealth::new(target, RecordingLog::new()).unwrap();

        let ids = |c: &ClusterHealth| c.describe().iter().map(|d| d.id).collect::<Vec<_>>();
        let first = ids(&collector);
        assert_eq!(first.len(), 13);
        assert_eq!(first, ids(&collector));

        let names: Vec<_> = collector
            .describe()
            .iter()
            .map(|d| d.fq_name.clone())
            .collect();
        assert!(names.contains(&"elasticsearch_cluster_health_status".to_string()));
        assert!(names.contains(&"elasticsearch_cluster_health_up".to_string()));
    }

    #[tokio::test]
    async fn test_describe_unaffected_by_collect_outcome() {
        let collector = flapping_collector().await;
        let before = described(&collector);

        let ok = collector.collect().await;
        assert_eq!(ok.last().unwrap().value, 1.0);
        assert_eq!(described(&collector), before);

        let failed = collector.collect().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].value, 0.0);
        assert_eq!(described(&collector), before);
    }

    #[tokio::test]
    async fn test_concurrent_collects_each_complete() {
        let collector = flapping_collector().await;

        let (a, b, c, d) = tokio::join!(
            collector.collect(),
            collector.collect(),
            collector.collect(),
            collector.collect()
        );

        let mut ups = Vec::new();
        for samples in [&a, &b, &c, &d] {
            check_contract(&collector, samples).unwrap();
            let up = samples.last().unwrap().value;
            // a successful attempt carries the whole table
            let expected_len = if up == 1.0 { 15 } else { 1 };
            assert_eq!(samples.len(), expected_len);
            ups.push(up);
        }

        // two of four requests hit the 503
        assert_eq!(ups.iter().filter(|v| **v == 1.0).count(), 2);
        // last writer wins: the stored value is one of the recorded outcomes
        assert!(ups.contains(&collector.liveness().get()));
    }
}
