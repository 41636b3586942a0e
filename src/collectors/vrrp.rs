// VRRP collector - state machine status and advertisement counters

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "vrrp";
const COMMAND: &str = "show vrrp json";

/// Every state is emitted, exactly one of them with value 1
const STATES: [&str; 3] = ["Initialize", "Master", "Backup"];

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, false, VrrpCollector::build);
}

#[derive(Debug, Deserialize)]
struct VirtualRouter {
    vrid: u32,
    #[serde(default)]
    interface: String,
    #[serde(default)]
    v4: InstanceInfo,
    #[serde(default)]
    v6: InstanceInfo,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceInfo {
    #[serde(default)]
    interface: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    stats: InstanceStats,
}

/// Counters are optional; FRR omits those that do not apply to a family
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceStats {
    adver_tx: Option<u64>,
    adver_rx: Option<u64>,
    garp_tx: Option<u64>,
    neighbor_adver_tx: Option<u64>,
    transitions: Option<u64>,
}

struct VrrpDescs {
    state: Desc,
    adver_tx: Desc,
    adver_rx: Desc,
    garp_tx: Desc,
    neighbor_adver_tx: Desc,
    transitions: Desc,
}

pub struct VrrpCollector {
    dispatcher: Arc<Dispatcher>,
    descs: VrrpDescs,
}

impl VrrpCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let labels = ["proto", "vrid", "interface", "subinterface"];
        let state_labels = ["proto", "vrid", "interface", "subinterface", "state"];
        VrrpCollector {
            dispatcher,
            descs: VrrpDescs {
                state: Desc::subsystem(SUBSYSTEM, "state", "Status of the VRRP state machine.", &state_labels),
                adver_tx: Desc::subsystem(SUBSYSTEM, "adverTx_total", "Advertisements sent total.", &labels),
                adver_rx: Desc::subsystem(SUBSYSTEM, "adverRx_total", "Advertisements received total.", &labels),
                garp_tx: Desc::subsystem(SUBSYSTEM, "garpTx_total", "Gratuitous ARP sent total.", &labels),
                neighbor_adver_tx: Desc::subsystem(
                    SUBSYSTEM,
                    "neighborAdverTx_total",
                    "Neighbor Advertisements sent total.",
                    &labels,
                ),
                transitions: Desc::subsystem(
                    SUBSYSTEM,
                    "state_transitions_total",
                    "Number of transitions of the VRRP state machine in total.",
                    &labels,
                ),
            },
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher))))
    }

    fn process_routers(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let routers: Vec<VirtualRouter> = serde_json::from_slice(output)?;
        for router in &routers {
            let vrid = router.vrid.to_string();
            self.process_instance(sink, "v4", &vrid, &router.interface, &router.v4);
            self.process_instance(sink, "v6", &vrid, &router.interface, &router.v6);
        }
        Ok(())
    }

    fn process_instance(&self, sink: &MetricSink, proto: &str, vrid: &str, iface: &str, info: &InstanceInfo) {
        let labels = [proto, vrid, iface, info.interface.as_str()];

        for state in STATES {
            let value = if info.status.eq_ignore_ascii_case(state) { 1.0 } else { 0.0 };
            sink.gauge(&self.descs.state, value, &[proto, vrid, iface, info.interface.as_str(), state]);
        }

        let stats = &info.stats;
        let counters = [
            (&self.descs.adver_tx, stats.adver_tx),
            (&self.descs.adver_rx, stats.adver_rx),
            (&self.descs.garp_tx, stats.garp_tx),
            (&self.descs.neighbor_adver_tx, stats.neighbor_adver_tx),
            (&self.descs.transitions, stats.transitions),
        ];
        for (desc, value) in counters {
            if let Some(value) = value {
                sink.counter(desc, value as f64, &labels);
            }
        }
    }
}

#[async_trait]
impl Collector for VrrpCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let output = self.dispatcher.vrrp(COMMAND).await?;
        self.process_routers(sink, &output)
            .map_err(|e| CollectorError::output(COMMAND, &output, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{mock_daemon, socket_dispatcher};

    const ROUTERS: &str = r#"[
  {
    "vrid": 1,
    "version": 3,
    "interface": "gw_extnet",
    "v4": {
      "interface": "extnet_v4_1",
      "status": "Backup",
      "stats": {"adverTx": 6, "adverRx": 1548196, "garpTx": 4, "transitions": 9}
    },
    "v6": {
      "interface": "extnet_v6_1",
      "status": "Backup",
      "stats": {"adverTx": 2, "adverRx": 1548195, "neighborAdverTx": 5, "transitions": 11}
    }
  },
  {
    "vrid": 2,
    "interface": "gw_extnet",
    "v4": {
      "interface": "extnet_v4_2",
      "status": "MASTER",
      "stats": {"adverTx": 100}
    },
    "v6": {
      "interface": "extnet_v6_2",
      "status": "Initialize",
      "stats": {}
    }
  }
]"#;

    #[test]
    fn test_process_states() {
        let collector = VrrpCollector::new(socket_dispatcher("/nonexistent"));
        let sink = MetricSink::new();
        collector.process_routers(&sink, ROUTERS.as_bytes()).unwrap();
        let values = sink.values();

        let state = |proto: &str, vrid: u32, sub: &str, state: &str| {
            values[&format!(
                "frr_vrrp_state{{interface=gw_extnet,proto={},state={},subinterface={},vrid={}}}",
                proto, state, sub, vrid
            )]
        };
        assert_eq!(state("v4", 1, "extnet_v4_1", "Backup"), 1.0);
        assert_eq!(state("v4", 1, "extnet_v4_1", "Master"), 0.0);
        assert_eq!(state("v4", 1, "extnet_v4_1", "Initialize"), 0.0);
        // Status matching ignores case
        assert_eq!(state("v4", 2, "extnet_v4_2", "Master"), 1.0);
        assert_eq!(state("v6", 2, "extnet_v6_2", "Initialize"), 1.0);
    }

    #[test]
    fn test_process_optional_counters() {
        let collector = VrrpCollector::new(socket_dispatcher("/nonexistent"));
        let sink = MetricSink::new();
        collector.process_routers(&sink, ROUTERS.as_bytes()).unwrap();
        let values = sink.values();

        let v4 = "interface=gw_extnet,proto=v4,subinterface=extnet_v4_1,vrid=1";
        let v6 = "interface=gw_extnet,proto=v6,subinterface=extnet_v6_1,vrid=1";
        assert_eq!(values[&format!("frr_vrrp_adverRx_total{{{}}}", v4)], 1548196.0);
        assert_eq!(values[&format!("frr_vrrp_garpTx_total{{{}}}", v4)], 4.0);
        assert!(!values.contains_key(&format!("frr_vrrp_neighborAdverTx_total{{{}}}", v4)));
        assert_eq!(values[&format!("frr_vrrp_neighborAdverTx_total{{{}}}", v6)], 5.0);
        assert_eq!(values[&format!("frr_vrrp_state_transitions_total{{{}}}", v6)], 11.0);

        // 4 instances * 3 states + 4 + 4 + 1 counters
        assert_eq!(values.len(), 12 + 9);
    }

    #[test]
    fn test_process_invalid_output() {
        let collector = VrrpCollector::new(socket_dispatcher("/nonexistent"));
        assert!(collector.process_routers(&MetricSink::new(), b"{}").is_err());
    }

    #[tokio::test]
    async fn test_update_from_vrrpd() {
        let dir = tempfile::tempdir().unwrap();
        mock_daemon(dir.path(), "vrrpd", &[(COMMAND, "[]")]);
        let collector = VrrpCollector::new(socket_dispatcher(dir.path()));
        let sink = MetricSink::new();

        collector.update(&sink).await.unwrap();
        assert!(sink.values().is_empty());
    }
}
