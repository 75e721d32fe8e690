//! Metric definition tables, samples, and text exposition.
//!
//! A collector owns a fixed table of [`MetricDef`] entries built once at
//! construction. Each entry maps one decoded entity to one [`Sample`].

use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::sync::Arc;

use prometheus::core::Desc;
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::collector::traits::NAMESPACE;

/// Kind of value a metric carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Counter,
    Gauge,
}

/// Build `{namespace}_{subsystem}_{name}`.
pub fn fq_name(subsystem: &str, name: &str) -> String {
    Opts::new(name, "")
        .namespace(NAMESPACE)
        .subsystem(subsystem)
        .fq_name()
}

pub(crate) fn new_desc(
    subsystem: &str,
    name: &str,
    help: &str,
    label_names: &[&str],
) -> prometheus::Result<Desc> {
    Desc::new(
        fq_name(subsystem, name),
        help.to_string(),
        label_names.iter().map(|l| l.to_string()).collect(),
        HashMap::new(),
    )
}

/// One concrete emission: descriptor, label values, and value.
#[derive(Debug, Clone)]
pub struct Sample {
    pub desc: Arc<Desc>,
    pub value_type: ValueType,
    /// Values in the order of `desc.variable_labels`.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    /// Fully-qualified metric name.
    pub fn name(&self) -> &str {
        &self.desc.fq_name
    }

    /// Value of the label called `name`, if declared.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .variable_labels
            .iter()
            .position(|l| l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }
}

/// Declarative mapping from an entity `E` to one labeled sample.
pub struct MetricDef<E> {
    desc: Arc<Desc>,
    value_type: ValueType,
    value: fn(&E) -> f64,
    labels: fn(&E) -> Vec<String>,
}

impl<E> MetricDef<E> {
    /// Gauge definition under `elasticsearch_{subsystem}_{name}`.
    pub fn gauge(
        subsystem: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
        value: fn(&E) -> f64,
        labels: fn(&E) -> Vec<String>,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            desc: Arc::new(new_desc(subsystem, name, help, label_names)?),
            value_type: ValueType::Gauge,
            value,
            labels,
        })
    }

    /// Counter definition under `elasticsearch_{subsystem}_{name}`.
    pub fn counter(
        subsystem: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
        value: fn(&E) -> f64,
        labels: fn(&E) -> Vec<String>,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            value_type: ValueType::Counter,
            ..Self::gauge(subsystem, name, help, label_names, value, labels)?
        })
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.desc
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Evaluate this definition against one entity.
    pub fn sample(&self, entity: &E) -> Sample {
        Sample {
            desc: Arc::clone(&self.desc),
            value_type: self.value_type,
            label_values: (self.labels)(entity),
            value: (self.value)(entity),
        }
    }
}

impl<E> std::fmt::Debug for MetricDef<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricDef")
            .field("name", &self.desc.fq_name)
            .field("labels", &self.desc.variable_labels)
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}

/// Liveness gauge (`elasticsearch_{subsystem}_up`).
///
/// Written once at the end of every collection attempt. The write is a
/// single atomic store, so concurrent scrapes are last-writer-wins.
#[derive(Debug, Clone)]
pub struct Liveness {
    gauge: Gauge,
    desc: Arc<Desc>,
}

impl Liveness {
    pub fn new(subsystem: &str, help: &str) -> prometheus::Result<Self> {
        let gauge = Gauge::with_opts(
            Opts::new("up", help)
                .namespace(NAMESPACE)
                .subsystem(subsystem),
        )?;
        Ok(Self {
            gauge,
            desc: Arc::new(new_desc(subsystem, "up", help, &[])?),
        })
    }

    pub fn desc(&self) -> Arc<Desc> {
        Arc::clone(&self.desc)
    }

    /// Last recorded value (0 before the first attempt).
    pub fn get(&self) -> f64 {
        self.gauge.get()
    }

    /// Store the outcome of this attempt and return its sample.
    pub fn record(&self, up: bool) -> Sample {
        let value = if up { 1.0 } else { 0.0 };
        self.gauge.set(value);
        Sample {
            desc: self.desc(),
            value_type: ValueType::Gauge,
            label_values: Vec::new(),
            value,
        }
    }
}

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn new(desc: &Desc, value_type: ValueType) -> prometheus::Result<Self> {
        let opts = Opts::new(desc.fq_name.clone(), desc.help.clone());
        let labels: Vec<&str> = desc.variable_labels.iter().map(String::as_str).collect();
        Ok(match value_type {
            ValueType::Gauge => Self::Gauge(GaugeVec::new(opts, labels.as_slice())?),
            ValueType::Counter => Self::Counter(CounterVec::new(opts, labels.as_slice())?),
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        match self {
            Self::Gauge(v) => registry.register(Box::new(v.clone())),
            Self::Counter(v) => registry.register(Box::new(v.clone())),
        }
    }

    fn observe(&self, sample: &Sample) -> prometheus::Result<()> {
        let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
        match self {
            Self::Gauge(v) => v.get_metric_with_label_values(values.as_slice())?.set(sample.value),
            Self::Counter(v) => {
                let counter = v.get_metric_with_label_values(values.as_slice())?;
                // Counters cannot go negative; NaN also lands here.
                let value = if sample.value >= 0.0 { sample.value } else { 0.0 };
                counter.reset();
                counter.inc_by(value);
            }
        }
        Ok(())
    }
}

/// Render samples in the Prometheus text exposition format.
///
/// Samples are grouped into one family per descriptor, so each metric name
/// gets a single HELP/TYPE header. Fails if a sample's label values do not
/// match its descriptor's label names, or if two samples share a descriptor
/// and label values.
pub fn encode_text(samples: &[Sample]) -> prometheus::Result<String> {
    let registry = Registry::new();
    let mut families: HashMap<u64, Family> = HashMap::new();
    let mut seen: HashSet<(u64, &[String])> = HashSet::with_capacity(samples.len());

    for sample in samples {
        if !seen.insert((sample.desc.id, sample.label_values.as_slice())) {
            return Err(prometheus::Error::Msg(format!(
                "duplicate sample for {} with label values {:?}",
                sample.desc.fq_name, sample.label_values
            )));
        }
        let family = match families.entry(sample.desc.id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let family = Family::new(&sample.desc, sample.value_type)?;
                family.register(&registry)?;
                e.insert(family)
            }
        };
        family.observe(sample)?;
    }

    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
