// OSPF collector - neighbor and adjacency counts per interface

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "ospf";
const COMMAND: &str = "show ip ospf vrf all interface json";

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, true, OspfCollector::build);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OspfInterface {
    #[serde(default)]
    nbr_count: u32,
    #[serde(default)]
    nbr_adjacent_count: u32,
    #[serde(default)]
    area: String,
}

/// Collects per-interface neighbor counts from ospfd, or from each
/// configured OSPF instance daemon
pub struct OspfCollector {
    dispatcher: Arc<Dispatcher>,
    instances: Vec<u16>,
    neighbors: Desc,
    adjacencies: Desc,
}

impl OspfCollector {
    pub fn new(dispatcher: Arc<Dispatcher>, instances: Vec<u16>) -> Self {
        let mut labels = vec!["vrf", "iface", "area"];
        if !instances.is_empty() {
            labels.push("instance");
        }
        OspfCollector {
            dispatcher,
            instances,
            neighbors: Desc::subsystem(SUBSYSTEM, "neighbors", "Number of neighbors detected.", &labels),
            adjacencies: Desc::subsystem(
                SUBSYSTEM,
                "neighbor_adjacencies",
                "Number of neighbor adjacencies formed.",
                &labels,
            ),
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        let instances = parse_instances(&ctx.settings.ospf_instances)?;
        if !instances.is_empty() && !ctx.dispatcher.supports_instances() {
            return Err(CollectorError::Config {
                collector: SUBSYSTEM,
                reason: "OSPF instances are not supported with --frr.vtysh".to_string(),
            });
        }
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher), instances)))
    }

    /// Writes neighbor metrics for one daemon's interface listing.
    ///
    /// Older FRR releases put interfaces directly next to `vrfName`/`vrfId`,
    /// newer ones nest them under `interfaces`; both are accepted.
    fn process_interfaces(
        &self,
        sink: &MetricSink,
        output: &[u8],
        instance: Option<u16>,
    ) -> Result<(), serde_json::Error> {
        let vrfs: BTreeMap<String, BTreeMap<String, Value>> = serde_json::from_slice(output)?;
        let instance = instance.map(|id| id.to_string());

        for (vrf, entries) in vrfs {
            let vrf = vrf.to_lowercase();
            for (key, value) in entries {
                match key.as_str() {
                    "vrfName" | "vrfId" => {}
                    "interfaces" => {
                        let ifaces: BTreeMap<String, OspfInterface> = serde_json::from_value(value)?;
                        for (name, iface) in &ifaces {
                            self.write_interface(sink, &vrf, name, iface, instance.as_deref());
                        }
                    }
                    _ => {
                        let iface: OspfInterface = serde_json::from_value(value)?;
                        self.write_interface(sink, &vrf, &key, &iface, instance.as_deref());
                    }
                }
            }
        }
        Ok(())
    }

    fn write_interface(
        &self,
        sink: &MetricSink,
        vrf: &str,
        name: &str,
        iface: &OspfInterface,
        instance: Option<&str>,
    ) {
        let mut labels = vec![vrf, name, iface.area.as_str()];
        labels.extend(instance);
        sink.gauge(&self.neighbors, iface.nbr_count as f64, &labels);
        sink.gauge(&self.adjacencies, iface.nbr_adjacent_count as f64, &labels);
    }
}

#[async_trait]
impl Collector for OspfCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        if self.instances.is_empty() {
            let output = self.dispatcher.ospf(COMMAND).await?;
            return self
                .process_interfaces(sink, &output, None)
                .map_err(|e| CollectorError::output(COMMAND, &output, e));
        }

        for &instance in &self.instances {
            let output = self.dispatcher.ospf_instance(instance, COMMAND).await?;
            self.process_interfaces(sink, &output, Some(instance))
                .map_err(|e| CollectorError::output(COMMAND, &output, e))?;
        }
        Ok(())
    }
}

/// Parses `--collector.ospf.instances`, e.g. `1,2,5`
fn parse_instances(raw: &str) -> Result<Vec<u16>, CollectorError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>().map_err(|e| CollectorError::Config {
                collector: SUBSYSTEM,
                reason: format!("invalid OSPF instance ID {:?}: {}", s, e),
            })
        })
        .collect()
}
