// Sink module - the shared metric output written to by every collector
//
// This module is responsible for:
// 1. Describing metrics (fully qualified name, help text, label names)
// 2. Accepting constant gauge/counter samples from concurrent collector tasks
// 3. Grouping samples into Prometheus metric families for exposition
//
// A sink lives for exactly one scrape. Collectors never see the HTTP layer,
// they only write samples here.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use tracing::warn;

/// Namespace prefixed to every metric this exporter produces
pub const NAMESPACE: &str = "frr";

/// Static description of one metric: name, help text and label names.
///
/// Descriptions are built once when a collector is constructed and reused
/// across scrapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desc {
    fq_name: String,
    help: String,
    labels: Vec<String>,
}

impl Desc {
    /// Describes a metric directly under the namespace, e.g. `frr_scrapes_total`
    pub fn new(name: &str, help: &str, labels: &[&str]) -> Self {
        Desc {
            fq_name: format!("{}_{}", NAMESPACE, name),
            help: help.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Describes a metric under a subsystem, e.g. `frr_bgp_peer_state`
    pub fn subsystem(subsystem: &str, name: &str, help: &str, labels: &[&str]) -> Self {
        Desc::new(&format!("{}_{}", subsystem, name), help, labels)
    }

    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Kind of a constant sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Gauge,
    Counter,
}

/// Thread-safe metric output shared by all collector tasks of one scrape.
///
/// # Ordering
/// Families are rendered sorted by name. Inside a family, samples keep the
/// order in which they were written, so one collector's own writes are
/// rendered in its issuing order. Interleaving between collectors is
/// unspecified.
#[derive(Default)]
pub struct MetricSink {
    families: Mutex<BTreeMap<String, MetricFamily>>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a constant gauge sample
    pub fn gauge(&self, desc: &Desc, value: f64, labels: &[&str]) {
        self.write(desc, ValueKind::Gauge, value, labels);
    }

    /// Writes a constant counter sample
    pub fn counter(&self, desc: &Desc, value: f64, labels: &[&str]) {
        self.write(desc, ValueKind::Counter, value, labels);
    }

    fn write(&self, desc: &Desc, kind: ValueKind, value: f64, labels: &[&str]) {
        if labels.len() != desc.labels().len() {
            // Label arity is fixed by the description; a mismatch is a bug in
            // the calling collector and the sample would be unrenderable.
            warn!(
                metric = desc.fq_name(),
                expected = desc.labels().len(),
                got = labels.len(),
                "dropping sample with wrong number of label values"
            );
            return;
        }

        let pairs: Vec<LabelPair> = desc
            .labels()
            .iter()
            .zip(labels)
            .map(|(name, value)| {
                let mut pair = LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.to_string());
                pair
            })
            .collect();

        let mut metric = Metric::default();
        metric.set_label(pairs.into());
        match kind {
            ValueKind::Gauge => {
                let mut gauge = Gauge::default();
                gauge.set_value(value);
                metric.set_gauge(gauge);
            }
            ValueKind::Counter => {
                let mut counter = Counter::default();
                counter.set_value(value);
                metric.set_counter(counter);
            }
        }

        let mut families = self
            .families
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let family = families.entry(desc.fq_name().to_string()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(desc.fq_name().to_string());
            family.set_help(desc.help.clone());
            family.set_field_type(match kind {
                ValueKind::Gauge => MetricType::GAUGE,
                ValueKind::Counter => MetricType::COUNTER,
            });
            family
        });
        family.mut_metric().push(metric);
    }

    /// Returns all metric families written so far, sorted by name
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.families
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|family| !family.get_metric().is_empty())
            .cloned()
            .collect()
    }

    /// Renders the collected samples in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Flattens the sink into `name{label=value,...} -> value` pairs.
    ///
    /// Labels are sorted by name so keys are stable across runs.
    #[cfg(test)]
    pub fn values(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for family in self.gather() {
            for metric in family.get_metric() {
                let mut labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}={}", l.get_name(), l.get_value()))
                    .collect();
                labels.sort();
                let value = match family.get_field_type() {
                    MetricType::COUNTER => metric.get_counter().get_value(),
                    _ => metric.get_gauge().get_value(),
                };
                out.insert(
                    format!("{}{{{}}}", family.get_name(), labels.join(",")),
                    value,
                );
            }
        }
        out
    }
}
