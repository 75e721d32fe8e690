//! Core collector traits and types.

use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Desc;
use thiserror::Error;

use crate::collector::metric::{Liveness, Sample};

/// Metric namespace shared by every collector.
pub const NAMESPACE: &str = "elasticsearch";

/// Errors that can occur while fetching from the upstream service.
///
/// Every variant is absorbed at the collector boundary: a failed fetch is
/// reported as `up = 0`, never as a scrape error.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Connection refused, DNS failure, or transport error.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("timeout elapsed after {0:?}")]
    Timeout(Duration),

    /// The upstream answered with a status other than 200.
    #[error("HTTP request failed with code {0}")]
    Status(u16),

    /// The body was not valid JSON or did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid target or metric configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl CollectorError {
    /// True for transport-level failures, including timeouts.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Two-phase collector contract.
///
/// # Describe
///
/// [`Collector::describe`] is pure. It must return the same descriptors on
/// every call, before or after any fetch, whether or not the upstream is
/// reachable. A registry accepts or rejects a collector based on this set.
///
/// # Collect
///
/// [`Collector::collect`] performs exactly one upstream fetch and returns the
/// samples for this cycle. Post-conditions:
///
/// - Every sample's descriptor is one of those returned by `describe`.
/// - The liveness sample (`*_up`) is always the last sample and appears
///   exactly once: `1` when the fetch succeeded, `0` otherwise.
/// - On a failed fetch, the liveness sample is the only sample, and the
///   failure is reported once to the collector's log sink.
/// - Label values are in the order of the descriptor's label names.
/// - Ordering is deterministic for a given upstream response.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Short identifier used in logs (e.g. "cluster_health").
    fn name(&self) -> &str;

    /// Every descriptor this collector can ever emit, liveness included.
    fn describe(&self) -> Vec<Arc<Desc>>;

    /// The collector's liveness gauge.
    fn liveness(&self) -> &Liveness;

    /// Perform one collection cycle.
    async fn collect(&self) -> Vec<Sample>;
}

/// A broken post-condition of [`Collector::collect`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("sample '{0}' was never described")]
    Undeclared(String),

    #[error("sample '{name}' has {actual} label values, expected {expected}")]
    LabelArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("liveness sample emitted {0} times")]
    LivenessCount(usize),

    #[error("liveness sample is not the last sample")]
    LivenessNotLast,
}

/// Check one `collect` result against the collector's own descriptors.
pub fn check_contract(
    collector: &dyn Collector,
    samples: &[Sample],
) -> Result<(), ContractViolation> {
    let described = collector.describe();
    let up_id = collector.liveness().desc().id;

    for sample in samples {
        if !described.iter().any(|d| d.id == sample.desc.id) {
            return Err(ContractViolation::Undeclared(sample.name().to_string()));
        }
        let expected = sample.desc.variable_labels.len();
        if sample.label_values.len() != expected {
            return Err(ContractViolation::LabelArity {
                name: sample.name().to_string(),
                expected,
                actual: sample.label_values.len(),
            });
        }
    }

    let up_count = samples.iter().filter(|s| s.desc.id == up_id).count();
    if up_count != 1 {
        return Err(ContractViolation::LivenessCount(up_count));
    }
    if samples.last().map(|s| s.desc.id) != Some(up_id) {
        return Err(ContractViolation::LivenessNotLast);
    }
    Ok(())
}
