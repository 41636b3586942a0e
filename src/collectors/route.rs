// Route collector - RIB/FIB route counts per VRF from zebra

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "route";

/// Address families queried, with the command for each
const SUMMARIES: [(&str, &str); 2] = [
    ("ipv4", "show ip route vrf all summary json"),
    ("ipv6", "show ipv6 route vrf all summary json"),
];

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, true, RouteCollector::build);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSummary {
    #[serde(default)]
    routes: Vec<RouteType>,
    #[serde(default)]
    routes_total: u32,
    #[serde(default)]
    routes_total_fib: u32,
}

#[derive(Debug, Deserialize)]
struct RouteType {
    #[serde(default)]
    fib: u32,
    #[serde(default)]
    rib: u32,
    #[serde(default, rename = "fibOffLoaded")]
    fib_offloaded: u32,
    #[serde(default, rename = "fibTrapped")]
    fib_trapped: u32,
    #[serde(rename = "type")]
    route_type: String,
}

struct RouteDescs {
    total: Desc,
    total_fib: Desc,
    fib_count: Desc,
    fib_offloaded_count: Desc,
    fib_trapped_count: Desc,
    rib_count: Desc,
}

impl RouteDescs {
    fn new() -> Self {
        let labels = ["afi", "route_type", "vrf"];
        let total_labels = ["afi", "vrf"];
        RouteDescs {
            total: Desc::subsystem(SUBSYSTEM, "total", "Total number of routes", &total_labels),
            total_fib: Desc::subsystem(SUBSYSTEM, "total_fib", "Total number of routes in FIB", &total_labels),
            fib_count: Desc::subsystem(SUBSYSTEM, "fib_count", "Number of routes of route type in FIB", &labels),
            fib_offloaded_count: Desc::subsystem(
                SUBSYSTEM,
                "fib_offloaded_count",
                "Number of offloaded routes of route type in FIB",
                &labels,
            ),
            fib_trapped_count: Desc::subsystem(
                SUBSYSTEM,
                "fib_trapped_count",
                "Number of trapped routes of route type in FIB",
                &labels,
            ),
            rib_count: Desc::subsystem(SUBSYSTEM, "rib_count", "Number of routes of route type in RIB", &labels),
        }
    }
}

/// Route summary collector; per-type counts only with `--collector.route.detailed-routes`
pub struct RouteCollector {
    dispatcher: Arc<Dispatcher>,
    descs: RouteDescs,
    detailed_routes: bool,
}

impl RouteCollector {
    pub fn new(dispatcher: Arc<Dispatcher>, detailed_routes: bool) -> Self {
        RouteCollector {
            dispatcher,
            descs: RouteDescs::new(),
            detailed_routes,
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(
            Arc::clone(&ctx.dispatcher),
            ctx.settings.detailed_routes,
        )))
    }

    fn process_summaries(
        &self,
        sink: &MetricSink,
        output: &[u8],
        afi: &str,
    ) -> Result<(), serde_json::Error> {
        let summaries: BTreeMap<String, RouteSummary> = serde_json::from_slice(output)?;

        for (vrf, summary) in &summaries {
            let labels = [afi, vrf.as_str()];
            sink.gauge(&self.descs.total, summary.routes_total as f64, &labels);
            sink.gauge(&self.descs.total_fib, summary.routes_total_fib as f64, &labels);

            if self.detailed_routes {
                for route in &summary.routes {
                    let labels = [afi, route.route_type.as_str(), vrf.as_str()];
                    sink.gauge(&self.descs.fib_count, route.fib as f64, &labels);
                    sink.gauge(&self.descs.fib_offloaded_count, route.fib_offloaded as f64, &labels);
                    sink.gauge(&self.descs.fib_trapped_count, route.fib_trapped as f64, &labels);
                    sink.gauge(&self.descs.rib_count, route.rib as f64, &labels);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for RouteCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        for (afi, command) in SUMMARIES {
            let output = self.dispatcher.zebra(command).await?;
            self.process_summaries(sink, &output, afi)
                .map_err(|e| CollectorError::output(command, &output, e))?;
        }
        Ok(())
    }
}
