//! Path-to-collector dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use prometheus::Registry;
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use thiserror::Error;

use crate::collector::metric::{Sample, encode_text};
use crate::collector::Collector;

/// Errors raised while binding a collector to a path.
///
/// Each error only affects the path being activated.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Path does not start with `/`.
    #[error("invalid metrics path '{0}': must start with '/'")]
    InvalidPath(String),

    /// Path already serves another collector.
    #[error("path '{0}' is already bound to a collector")]
    DuplicatePath(String),

    /// Same descriptor registered twice.
    #[error("duplicate metrics collector registration attempted: {0}")]
    DuplicateDescriptor(String),

    /// Same name registered with different label names or help text.
    #[error("descriptor '{0}' is inconsistent with a previously registered descriptor")]
    InconsistentDescriptor(String),
}

/// Declares one descriptor to a `prometheus::Registry`.
///
/// Carries no values; samples are rendered by [`encode_text`].
struct Declared(Arc<Desc>);

impl prometheus::core::Collector for Declared {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.0]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        Vec::new()
    }
}

/// Descriptor namespace owned by one path, backed by a `prometheus::Registry`.
///
/// The registry rejects a descriptor registered twice, and a name reused with
/// a different label set or help string.
#[derive(Default)]
pub struct MetricsRegistry {
    registry: Registry,
    descs: Vec<Arc<Desc>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field(
                "descs",
                &self.descs.iter().map(|d| &d.fq_name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every descriptor, or none of them.
    ///
    /// Validation runs against a scratch registry that only replaces the
    /// current one once every descriptor is accepted.
    pub fn register(&mut self, descs: &[Arc<Desc>]) -> Result<(), RegistrationError> {
        let scratch = Registry::new();
        for desc in self.descs.iter().chain(descs) {
            scratch
                .register(Box::new(Declared(Arc::clone(desc))))
                .map_err(|e| registration_error(desc, e))?;
        }

        self.registry = scratch;
        self.descs.extend(descs.iter().cloned());
        Ok(())
    }

    /// Whether `desc` was registered here.
    pub fn contains(&self, desc: &Desc) -> bool {
        self.descs.iter().any(|d| d.id == desc.id)
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// The underlying registry holding every accepted descriptor.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn registration_error(desc: &Desc, err: prometheus::Error) -> RegistrationError {
    match err {
        prometheus::Error::AlreadyReg => RegistrationError::DuplicateDescriptor(desc.fq_name.clone()),
        _ => RegistrationError::InconsistentDescriptor(desc.fq_name.clone()),
    }
}

struct Route {
    collector: Arc<dyn Collector>,
    metrics: MetricsRegistry,
}

/// Binds URL paths to collectors.
///
/// Each path gets its own [`MetricsRegistry`], so collectors on different
/// paths never share a descriptor namespace.
#[derive(Default)]
pub struct CollectorRegistry {
    routes: BTreeMap<String, Route>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("paths", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `collector`'s descriptors and expose it under `path`.
    ///
    /// On error the path stays inactive and existing paths are untouched.
    pub fn activate<C: Collector>(
        &mut self,
        path: &str,
        collector: C,
    ) -> Result<(), RegistrationError> {
        self.activate_shared(path, Arc::new(collector))
    }

    /// Like [`CollectorRegistry::activate`] for an already shared collector.
    pub fn activate_shared(
        &mut self,
        path: &str,
        collector: Arc<dyn Collector>,
    ) -> Result<(), RegistrationError> {
        let name = collector.name().to_string();
        self.try_activate(path, collector).inspect_err(|e| {
            tracing::warn!(path = %path, collector = %name, error = %e, "Collector failed to register");
        })?;
        tracing::info!(path = %path, collector = %name, "Collector registered");
        Ok(())
    }

    fn try_activate(
        &mut self,
        path: &str,
        collector: Arc<dyn Collector>,
    ) -> Result<(), RegistrationError> {
        if !path.starts_with('/') {
            return Err(RegistrationError::InvalidPath(path.to_string()));
        }
        if self.routes.contains_key(path) {
            return Err(RegistrationError::DuplicatePath(path.to_string()));
        }

        let mut metrics = MetricsRegistry::new();
        metrics.register(&collector.describe())?;
        self.routes
            .insert(path.to_string(), Route { collector, metrics });
        Ok(())
    }

    /// Activated paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn is_active(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run one collection for `path`. `None` if the path is not active.
    ///
    /// Samples whose descriptor was never registered are dropped.
    pub async fn collect(&self, path: &str) -> Option<Vec<Sample>> {
        let route = self.routes.get(path)?;
        let mut samples = route.collector.collect().await;

        let before = samples.len();
        samples.retain(|s| route.metrics.contains(&s.desc));
        if samples.len() != before {
            tracing::warn!(
                path = %path,
                collector = %route.collector.name(),
                dropped = before - samples.len(),
                "Dropped samples with undeclared descriptors"
            );
        }
        Some(samples)
    }

    /// Collect `path` and encode the result in the text exposition format.
    pub async fn scrape(&self, path: &str) -> Option<prometheus::Result<String>> {
        let samples = self.collect(path).await?;
        Some(encode_text(&samples))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::collector::metric::{Liveness, MetricDef};

    /// Collector with a fixed table and no upstream.
    struct StaticCollector {
        up: Liveness,
        metrics: Vec<MetricDef<f64>>,
        extra: Option<Arc<Desc>>,
    }

    impl StaticCollector {
        fn new(subsystem: &str) -> Self {
            Self {
                up: Liveness::new(subsystem, "static alive").unwrap(),
                metrics: vec![
                    MetricDef::gauge(subsystem, "value", "A value.", &[], |v: &f64| *v, |_| Vec::new())
                        .unwrap(),
                ],
                extra: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl Collector for StaticCollector {
        fn name(&self) -> &str {
            "static"
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            self.metrics
                .iter()
                .map(|m| Arc::clone(m.desc()))
                .chain(self.extra.clone())
                .chain(std::iter::once(self.up.desc()))
                .collect()
        }

        fn liveness(&self) -> &Liveness {
            &self.up
        }

        async fn collect(&self) -> Vec<Sample> {
            let mut samples: Vec<_> = self.metrics.iter().map(|m| m.sample(&3.0)).collect();
            samples.push(self.up.record(true));
            samples
        }
    }

    /// Emits a sample it never described.
    struct RogueCollector {
        inner: StaticCollector,
        rogue: MetricDef<f64>,
    }

    #[async_trait::async_trait]
    impl Collector for RogueCollector {
        fn name(&self) -> &str {
            "rogue"
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            self.inner.describe()
        }

        fn liveness(&self) -> &Liveness {
            self.inner.liveness()
        }

        async fn collect(&self) -> Vec<Sample> {
            let mut samples = vec![self.rogue.sample(&1.0)];
            samples.extend(self.inner.collect().await);
            samples
        }
    }

    #[test]
    fn test_metrics_registry_rejects_duplicates() {
        let collector = StaticCollector::new("static");
        let descs = collector.describe();

        let mut registry = MetricsRegistry::new();
        registry.register(&descs).unwrap();
        assert_eq!(registry.len(), 2);

        let err = registry.register(&descs).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateDescriptor(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_metrics_registry_rejects_duplicate_within_one_call() {
        let collector = StaticCollector::new("static");
        let desc = Arc::clone(collector.metrics[0].desc());

        let mut registry = MetricsRegistry::new();
        let err = registry
            .register(&[Arc::clone(&desc), desc])
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateDescriptor(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_metrics_registry_backs_prometheus_registry() {
        let collector = StaticCollector::new("static");
        let descs = collector.describe();

        let mut registry = MetricsRegistry::new();
        registry.register(&descs).unwrap();

        let again = registry
            .registry()
            .register(Box::new(Declared(Arc::clone(&descs[0]))));
        assert!(matches!(again, Err(prometheus::Error::AlreadyReg)));
    }

    #[test]
    fn test_metrics_registry_rejects_inconsistent_labels() {
        let plain = Desc::new(
            "elasticsearch_static_value".into(),
            "A value.".into(),
            Vec::new(),
            HashMap::new(),
        )
        .unwrap();
        // Distinct id through the const label, same name with another label set.
        let sharded = Desc::new(
            "elasticsearch_static_value".into(),
            "A value.".into(),
            vec!["shard".into()],
            HashMap::from([("node".to_string(), "a".to_string())]),
        )
        .unwrap();
        assert_ne!(plain.id, sharded.id);

        let mut registry = MetricsRegistry::new();
        let err = registry
            .register(&[Arc::new(plain), Arc::new(sharded)])
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InconsistentDescriptor(_)));
        // all or nothing
        assert!(registry.is_empty());
    }

    #[test]
    fn test_metrics_registry_same_name_same_id_is_duplicate() {
        let a: MetricDef<f64> =
            MetricDef::gauge("static", "value", "A value.", &[], |v: &f64| *v, |_| Vec::new()).unwrap();
        let b: MetricDef<f64> = MetricDef::gauge(
            "static",
            "value",
            "A value.",
            &["shard"],
            |v: &f64| *v,
            |_| vec!["0".into()],
        )
        .unwrap();

        let mut registry = MetricsRegistry::new();
        let err = registry
            .register(&[Arc::clone(a.desc()), Arc::clone(b.desc())])
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateDescriptor(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_activate_and_scrape() {
        let mut registry = CollectorRegistry::new();
        registry
            .activate("/static_metrics", StaticCollector::new("static"))
            .unwrap();

        assert!(registry.is_active("/static_metrics"));
        assert_eq!(registry.paths(), vec!["/static_metrics".to_string()]);

        let text = registry.scrape("/static_metrics").await.unwrap().unwrap();
        assert!(text.contains("# HELP elasticsearch_static_value A value."));
        assert!(text.contains("elasticsearch_static_value 3"));
        assert!(text.contains("elasticsearch_static_up 1"));

        assert!(registry.scrape("/missing").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_registration_isolated_to_path() {
        let mut registry = CollectorRegistry::new();
        registry
            .activate("/good", StaticCollector::new("static"))
            .unwrap();

        let mut broken = StaticCollector::new("broken");
        broken.extra = Some(Arc::clone(broken.metrics[0].desc()));
        let err = registry.activate("/broken", broken).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateDescriptor(_)));

        assert!(!registry.is_active("/broken"));
        assert!(registry.scrape("/good").await.unwrap().is_ok());
    }

    #[test]
    fn test_same_collector_kind_on_two_paths() {
        let mut registry = CollectorRegistry::new();
        registry.activate("/a", StaticCollector::new("static")).unwrap();
        registry.activate("/b", StaticCollector::new("static")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_and_invalid_paths() {
        let mut registry = CollectorRegistry::new();
        registry.activate("/a", StaticCollector::new("static")).unwrap();

        let err = registry
            .activate("/a", StaticCollector::new("other"))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicatePath(_)));

        let err = registry
            .activate("relative", StaticCollector::new("other"))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_undeclared_samples_dropped() {
        let collector = RogueCollector {
            inner: StaticCollector::new("static"),
            rogue: MetricDef::gauge("static", "rogue", "Undeclared.", &[], |v: &f64| *v, |_| Vec::new())
                .unwrap(),
        };
        let mut registry = CollectorRegistry::new();
        registry.activate("/rogue", collector).unwrap();

        let samples = registry.collect("/rogue").await.unwrap();
        assert!(samples.iter().all(|s| s.name() != "elasticsearch_static_rogue"));
        assert_eq!(samples.len(), 2);
    }
}
