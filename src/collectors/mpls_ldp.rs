// MPLS LDP collector - label bindings, IGP sync, interfaces, neighbors and
// discovery adjacencies reported by ldpd

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{parse_hms, Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "mpls_ldp";

const BINDING_COMMAND: &str = "show mpls ldp binding json";
const IGP_SYNC_COMMAND: &str = "show mpls ldp igp-sync json";
const INTERFACE_COMMAND: &str = "show mpls ldp interface json";
const NEIGHBOR_COMMAND: &str = "show mpls ldp neighbor json";
const DISCOVERY_COMMAND: &str = "show mpls ldp discovery json";

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, true, MplsLdpCollector::build);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Binding {
    #[serde(default)]
    address_family: String,
}

#[derive(Debug, Deserialize)]
struct Bindings {
    #[serde(default)]
    bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IgpSync {
    #[serde(default)]
    state: String,
    #[serde(default)]
    peer_ldp_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LdpInterface {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address_family: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    hello_interval: f64,
    #[serde(default)]
    hello_holdtime: f64,
    #[serde(default)]
    adjacency_count: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Neighbor {
    #[serde(default)]
    address_family: String,
    #[serde(default)]
    neighbor_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    up_time: String,
}

#[derive(Debug, Deserialize)]
struct Neighbors {
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Adjacency {
    #[serde(default)]
    address_family: String,
    #[serde(default)]
    neighbor_id: String,
    #[serde(default)]
    interface: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Discovery {
    #[serde(default)]
    adjacencies: Vec<Adjacency>,
}

pub struct MplsLdpCollector {
    dispatcher: Arc<Dispatcher>,
    binding_count: Desc,
    igp_sync_state: Desc,
    interface_state: Desc,
    interface_hello_interval: Desc,
    interface_hello_holdtime: Desc,
    interface_adjacency_count: Desc,
    neighbor_state: Desc,
    neighbor_uptime: Desc,
    discovery_adjacency_count: Desc,
}

impl MplsLdpCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let interface_labels = ["name", "address_family"];
        let neighbor_labels = ["address_family", "neighbor_id"];
        MplsLdpCollector {
            dispatcher,
            binding_count: Desc::subsystem(
                SUBSYSTEM,
                "binding_count",
                "Number of MPLS LDP bindings.",
                &["address_family"],
            ),
            igp_sync_state: Desc::subsystem(
                SUBSYSTEM,
                "igp_sync_state",
                "State of MPLS LDP IGP sync (1=Ready/Complete, 0=Not Complete).",
                &["interface", "peer_ldp_id"],
            ),
            interface_state: Desc::subsystem(
                SUBSYSTEM,
                "interface_state",
                "State of MPLS LDP interface (1=Active, 0=Inactive).",
                &interface_labels,
            ),
            interface_hello_interval: Desc::subsystem(
                SUBSYSTEM,
                "interface_hello_interval_seconds",
                "Hello interval for the interface.",
                &interface_labels,
            ),
            interface_hello_holdtime: Desc::subsystem(
                SUBSYSTEM,
                "interface_hello_holdtime_seconds",
                "Hello holdtime for the interface.",
                &interface_labels,
            ),
            interface_adjacency_count: Desc::subsystem(
                SUBSYSTEM,
                "interface_adjacency_count",
                "Number of adjacencies on the interface.",
                &interface_labels,
            ),
            neighbor_state: Desc::subsystem(
                SUBSYSTEM,
                "neighbor_state",
                "State of MPLS LDP neighbor (1=Operational, 0=Other).",
                &neighbor_labels,
            ),
            neighbor_uptime: Desc::subsystem(
                SUBSYSTEM,
                "neighbor_uptime_seconds",
                "Uptime of MPLS LDP neighbor in seconds.",
                &neighbor_labels,
            ),
            discovery_adjacency_count: Desc::subsystem(
                SUBSYSTEM,
                "discovery_adjacency_count",
                "Number of discovery adjacencies.",
                &["address_family", "neighbor_id", "interface", "type"],
            ),
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher))))
    }

    /// One sample per address family
    fn process_bindings(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let data: Bindings = serde_json::from_slice(output)?;

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for binding in &data.bindings {
            *counts.entry(binding.address_family.as_str()).or_default() += 1;
        }
        for (family, count) in counts {
            sink.gauge(&self.binding_count, count as f64, &[family]);
        }
        Ok(())
    }

    /// Keyed by interface name. Anything but "not complete" counts as synced.
    fn process_igp_sync(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let data: BTreeMap<String, IgpSync> = serde_json::from_slice(output)?;

        for (iface, sync) in &data {
            let state: String = sync
                .state
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            let value = if state.contains("notcomplete") { 0.0 } else { 1.0 };
            sink.gauge(&self.igp_sync_state, value, &[iface.as_str(), sync.peer_ldp_id.as_str()]);
        }
        Ok(())
    }

    fn process_interfaces(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let data: BTreeMap<String, LdpInterface> = serde_json::from_slice(output)?;

        for (key, iface) in &data {
            let name = if iface.name.is_empty() { key } else { &iface.name };
            let labels = [name.as_str(), iface.address_family.as_str()];
            let active = if iface.state.eq_ignore_ascii_case("active") { 1.0 } else { 0.0 };
            sink.gauge(&self.interface_state, active, &labels);
            sink.gauge(&self.interface_hello_interval, iface.hello_interval, &labels);
            sink.gauge(&self.interface_hello_holdtime, iface.hello_holdtime, &labels);
            sink.gauge(&self.interface_adjacency_count, iface.adjacency_count, &labels);
        }
        Ok(())
    }

    /// Neighbors whose uptime is not `HH:MM:SS` only get a state sample
    fn process_neighbors(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let data: Neighbors = serde_json::from_slice(output)?;

        for neighbor in &data.neighbors {
            let labels = [neighbor.address_family.as_str(), neighbor.neighbor_id.as_str()];
            let operational = if neighbor.state.eq_ignore_ascii_case("operational") {
                1.0
            } else {
                0.0
            };
            sink.gauge(&self.neighbor_state, operational, &labels);

            match parse_hms(&neighbor.up_time) {
                Some(seconds) => sink.gauge(&self.neighbor_uptime, seconds as f64, &labels),
                None => warn!(
                    neighbor = %neighbor.neighbor_id,
                    uptime = %neighbor.up_time,
                    "cannot parse LDP neighbor uptime"
                ),
            }
        }
        Ok(())
    }

    fn process_discovery(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let data: Discovery = serde_json::from_slice(output)?;

        let mut counts: BTreeMap<[&str; 4], usize> = BTreeMap::new();
        for adjacency in &data.adjacencies {
            let key = [
                adjacency.address_family.as_str(),
                adjacency.neighbor_id.as_str(),
                adjacency.interface.as_str(),
                adjacency.kind.as_str(),
            ];
            *counts.entry(key).or_default() += 1;
        }
        for (labels, count) in counts {
            sink.gauge(&self.discovery_adjacency_count, count as f64, &labels);
        }
        Ok(())
    }

    async fn query(
        &self,
        sink: &MetricSink,
        command: &str,
        process: fn(&Self, &MetricSink, &[u8]) -> Result<(), serde_json::Error>,
    ) -> Result<(), CollectorError> {
        let output = self.dispatcher.ldp(command).await?;
        process(self, sink, &output).map_err(|e| CollectorError::output(command, &output, e))
    }
}

#[async_trait]
impl Collector for MplsLdpCollector {
    /// Runs the five queries in order; the first failure ends the update
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        self.query(sink, BINDING_COMMAND, Self::process_bindings).await?;
        self.query(sink, IGP_SYNC_COMMAND, Self::process_igp_sync).await?;
        self.query(sink, INTERFACE_COMMAND, Self::process_interfaces).await?;
        self.query(sink, NEIGHBOR_COMMAND, Self::process_neighbors).await?;
        self.query(sink, DISCOVERY_COMMAND, Self::process_discovery).await
    }
}
