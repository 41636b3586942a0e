// Exporter module - runs every enabled collector once per scrape
//
// This module implements the scrape orchestration using Tokio tasks.
//
// # Architecture
// - Collectors are resolved once, when the exporter is built
// - Each scrape spawns one task per enabled collector
// - All tasks are joined before the scrape returns
// - Failures (and panics) in one collector don't affect the others

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::collectors::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};

/// Result of one collector's run within one scrape
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub duration: Duration,
    pub error: Option<String>,
}

impl ScrapeOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Descriptions of the metrics the exporter itself produces
struct ScrapeDescs {
    scrapes_total: Desc,
    scrape_duration: Desc,
    collector_up: Desc,
}

impl ScrapeDescs {
    fn new() -> Self {
        ScrapeDescs {
            scrapes_total: Desc::new(
                "scrapes_total",
                "Total number of times FRR has been scraped.",
                &[],
            ),
            scrape_duration: Desc::new(
                "scrape_duration_seconds",
                "Time it took for a collector's scrape to complete.",
                &["collector"],
            ),
            collector_up: Desc::new(
                "collector_up",
                "Whether the collector's last scrape was successful (1 = successful, 0 = unsuccessful).",
                &["collector"],
            ),
        }
    }
}

/// Scrape orchestrator holding the resolved set of enabled collectors.
///
/// Built once at startup and shared by every scrape request. The collector
/// list is never modified after construction, so scrapes need no locking
/// beyond the sink's own.
pub struct Exporter {
    /// Enabled collectors in registration order
    collectors: Vec<(&'static str, Arc<dyn Collector>)>,

    /// Monotonic scrape counter for the process lifetime
    scrapes: AtomicU64,

    descs: ScrapeDescs,
}

impl Exporter {
    /// Resolves the enabled collectors from the registry.
    ///
    /// # Errors
    /// Any collector factory error; the exporter must not start with a
    /// misconfigured collector.
    pub fn new(registry: &Registry, ctx: &CollectorContext) -> Result<Self, CollectorError> {
        Ok(Self::with_collectors(registry.resolve_enabled(ctx)?))
    }

    pub fn with_collectors(collectors: Vec<(&'static str, Arc<dyn Collector>)>) -> Self {
        Exporter {
            collectors,
            scrapes: AtomicU64::new(0),
            descs: ScrapeDescs::new(),
        }
    }

    pub fn collector_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.collectors.iter().map(|(name, _)| *name)
    }

    /// Performs one scrape into `sink`.
    ///
    /// Emits the scrape counter, then for every collector its own metrics,
    /// `frr_scrape_duration_seconds{collector}` and `frr_collector_up{collector}`.
    /// Returns once every collector task has finished.
    pub async fn collect(&self, sink: &Arc<MetricSink>) {
        let scrapes = self.scrapes.fetch_add(1, Ordering::Relaxed) + 1;
        sink.counter(&self.descs.scrapes_total, scrapes as f64, &[]);

        let started = Instant::now();
        let mut handles = Vec::with_capacity(self.collectors.len());
        for (name, collector) in &self.collectors {
            let collector = Arc::clone(collector);
            let sink = Arc::clone(sink);
            let handle = tokio::spawn(async move { run_collector(collector, &sink).await });
            handles.push((*name, handle));
        }

        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ScrapeOutcome {
                    duration: started.elapsed(),
                    error: Some(format!("collector task failed: {}", e)),
                },
            };
            self.record(sink, name, &outcome);
        }
    }

    /// Emits the duration and up/down metrics for one collector and logs the outcome
    fn record(&self, sink: &MetricSink, name: &str, outcome: &ScrapeOutcome) {
        let duration_seconds = outcome.duration.as_secs_f64();
        sink.gauge(&self.descs.scrape_duration, duration_seconds, &[name]);

        match &outcome.error {
            Some(err) => error!(collector = name, duration_seconds, error = %err, "collector scrape failed"),
            None => debug!(collector = name, duration_seconds, "collector succeeded"),
        }
        let up = if outcome.succeeded() { 1.0 } else { 0.0 };
        sink.gauge(&self.descs.collector_up, up, &[name]);
    }
}

/// Runs one collector and times it
async fn run_collector(collector: Arc<dyn Collector>, sink: &MetricSink) -> ScrapeOutcome {
    let start = Instant::now();
    let result = collector.update(sink).await;
    ScrapeOutcome {
        duration: start.elapsed(),
        error: result.err().map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorSettings;
    use crate::collectors::testutil::{socket_dispatcher, vtysh_dispatcher};
    use crate::collectors::default_registry;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::path::PathBuf;

    /// Test collector writing one sample, optionally failing afterwards
    struct Fake {
        desc: Desc,
        label: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Collector for Fake {
        async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
            sink.gauge(&self.desc, 1.0, &[self.label]);
            if self.fail {
                return Err(CollectorError::Transport(TransportError::Socket {
                    path: PathBuf::from("/var/run/frr/bgpd.vty"),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                }));
            }
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Collector for Panicking {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            panic!("parser bug");
        }
    }

    struct Slow;

    #[async_trait]
    impl Collector for Slow {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    fn fake(label: &'static str, fail: bool) -> Arc<dyn Collector> {
        Arc::new(Fake {
            desc: Desc::new("fake_value", "Fake.", &["source"]),
            label,
            fail,
        })
    }

    #[tokio::test]
    async fn test_failing_collector_is_isolated() {
        let exporter = Exporter::with_collectors(vec![
            ("a", fake("a", false)),
            ("b", fake("b", true)),
            ("c", fake("c", false)),
        ]);

        let sink = Arc::new(MetricSink::new());
        exporter.collect(&sink).await;
        let values = sink.values();

        for name in ["a", "b", "c"] {
            assert!(values.contains_key(&format!(
                "frr_scrape_duration_seconds{{collector={}}}",
                name
            )));
            assert!(values.contains_key(&format!("frr_fake_value{{source={}}}", name)));
        }
        assert_eq!(values["frr_collector_up{collector=a}"], 1.0);
        assert_eq!(values["frr_collector_up{collector=b}"], 0.0);
        assert_eq!(values["frr_collector_up{collector=c}"], 1.0);
        assert_eq!(values["frr_scrapes_total{}"], 1.0);
    }

    #[tokio::test]
    async fn test_panicking_collector_reports_down() {
        let exporter = Exporter::with_collectors(vec![
            ("ok", fake("ok", false)),
            ("broken", Arc::new(Panicking)),
        ]);

        let sink = Arc::new(MetricSink::new());
        exporter.collect(&sink).await;
        let values = sink.values();

        assert_eq!(values["frr_collector_up{collector=ok}"], 1.0);
        assert_eq!(values["frr_collector_up{collector=broken}"], 0.0);
    }

    #[tokio::test]
    async fn test_scrape_counter_increments() {
        let exporter = Exporter::with_collectors(vec![("a", fake("a", true))]);

        for expected in 1..=3 {
            let sink = Arc::new(MetricSink::new());
            exporter.collect(&sink).await;
            assert_eq!(sink.values()["frr_scrapes_total{}"], expected as f64);
        }
    }

    #[tokio::test]
    async fn test_collectors_run_concurrently() {
        let exporter = Exporter::with_collectors(
            (0..10)
                .map(|_| ("slow", Arc::new(Slow) as Arc<dyn Collector>))
                .collect(),
        );

        let sink = Arc::new(MetricSink::new());
        let start = Instant::now();
        exporter.collect(&sink).await;

        // Ten sequential runs would take at least 500ms
        assert!(start.elapsed() < Duration::from_millis(400));
        let durations = sink.values()["frr_scrape_duration_seconds{collector=slow}"];
        assert!(durations >= 0.05);
    }

    #[tokio::test]
    async fn test_exporter_from_registry() {
        fn build(_ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
            Ok(fake("registered", false))
        }

        let mut registry = Registry::new();
        registry.register("registered", true, build);
        registry.register("disabled", false, build);
        let ctx = CollectorContext {
            dispatcher: socket_dispatcher("/var/run/frr"),
            settings: CollectorSettings::default(),
        };

        let exporter = Exporter::new(&registry, &ctx).unwrap();
        assert_eq!(exporter.collector_names().collect::<Vec<_>>(), vec!["registered"]);
    }

    #[test]
    fn test_startup_rejects_ospf_instances_with_vtysh() {
        let registry = default_registry();
        let ctx = CollectorContext {
            dispatcher: vtysh_dispatcher(),
            settings: CollectorSettings {
                ospf_instances: "1".to_string(),
                ..CollectorSettings::default()
            },
        };

        let result = Exporter::new(&registry, &ctx);
        assert!(matches!(
            result,
            Err(CollectorError::Config { collector: "ospf", .. })
        ));
    }
}
