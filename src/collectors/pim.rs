// PIM collector - neighbor counts and neighbor uptimes per VRF

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use super::{parse_hms, Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "pim";
const COMMAND: &str = "show ip pim vrf all neighbor json";

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, false, PimCollector::build);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PimNeighbor {
    #[serde(default)]
    up_time: String,
}

pub struct PimCollector {
    dispatcher: Arc<Dispatcher>,
    neighbor_count: Desc,
    uptime: Desc,
}

impl PimCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        PimCollector {
            dispatcher,
            neighbor_count: Desc::subsystem(
                SUBSYSTEM,
                "neighbor_count_total",
                "Number of neighbors detected",
                &["vrf"],
            ),
            uptime: Desc::subsystem(
                SUBSYSTEM,
                "neighbor_uptime_seconds",
                "How long has the peer been up.",
                &["vrf", "iface", "neighbor"],
            ),
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher))))
    }

    /// Walks `vrf -> interface -> neighbor address -> neighbor`.
    ///
    /// Every neighbor counts towards the VRF total, even when its uptime
    /// cannot be parsed.
    fn process_neighbors(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        type Neighbors = BTreeMap<String, PimNeighbor>;
        let vrfs: BTreeMap<String, BTreeMap<String, Neighbors>> = serde_json::from_slice(output)?;

        for (vrf, ifaces) in &vrfs {
            let vrf_label = vrf.to_lowercase();
            let mut count = 0usize;
            for (iface, neighbors) in ifaces {
                let iface = iface.to_lowercase();
                for (address, neighbor) in neighbors {
                    count += 1;
                    match parse_hms(&neighbor.up_time) {
                        Some(seconds) => sink.gauge(
                            &self.uptime,
                            seconds as f64,
                            &[vrf_label.as_str(), iface.as_str(), address.as_str()],
                        ),
                        None => error!(
                            vrf = %vrf,
                            neighbor = %address,
                            uptime = %neighbor.up_time,
                            "cannot parse PIM neighbor uptime"
                        ),
                    }
                }
            }
            sink.gauge(&self.neighbor_count, count as f64, &[vrf.as_str()]);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for PimCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let output = self.dispatcher.pim(COMMAND).await?;
        self.process_neighbors(sink, &output)
            .map_err(|e| CollectorError::output(COMMAND, &output, e))
    }
}
