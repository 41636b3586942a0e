// BGP collector - per-VRF process stats and per-peer session metrics
//
// One implementation serves three registered collectors, one per address
// family: `bgp` (IPv4 unicast), `bgp6` (IPv6 unicast) and `bgpl2vpn`
// (L2VPN EVPN, which also reports zebra's VNI table).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::config::BgpSettings;
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "bgp";
const PEER_SUBSYSTEM: &str = "bgp_peer";
const L2VPN_SUBSYSTEM: &str = "bgp_l2vpn_evpn";

const RUNNING_CONFIG_COMMAND: &str = "show running-config";
const VNI_COMMAND: &str = "show evpn vni json";

pub fn register(registry: &mut Registry) {
    registry.register("bgp", true, |ctx| BgpCollector::build(ctx, AddressFamily::Ipv4Unicast));
    registry.register("bgp6", false, |ctx| BgpCollector::build(ctx, AddressFamily::Ipv6Unicast));
    registry.register("bgpl2vpn", false, |ctx| BgpCollector::build(ctx, AddressFamily::L2vpnEvpn));
}

/// The AFI/SAFI pair a collector instance summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4Unicast,
    Ipv6Unicast,
    L2vpnEvpn,
}

impl AddressFamily {
    pub fn afi(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4Unicast => "ipv4",
            AddressFamily::Ipv6Unicast => "ipv6",
            AddressFamily::L2vpnEvpn => "l2vpn",
        }
    }

    pub fn safi(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4Unicast | AddressFamily::Ipv6Unicast => "unicast",
            AddressFamily::L2vpnEvpn => "evpn",
        }
    }

    fn summary_command(&self) -> String {
        format!("show bgp vrf all {} {} summary json", self.afi(), self.safi())
    }

    fn advertised_routes_command(&self, vrf: &str, peer: &str) -> String {
        if vrf.eq_ignore_ascii_case("default") {
            format!("show bgp {} {} neighbors {} advertised-routes json", self.afi(), self.safi(), peer)
        } else {
            format!(
                "show bgp vrf {} {} {} neighbors {} advertised-routes json",
                vrf,
                self.afi(),
                self.safi(),
                peer
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BgpVrf {
    #[serde(default, rename = "as")]
    local_as: i64,
    #[serde(default)]
    rib_count: f64,
    #[serde(default)]
    rib_memory: f64,
    #[serde(default)]
    peer_count: f64,
    #[serde(default)]
    peer_memory: f64,
    #[serde(default)]
    peer_group_count: f64,
    #[serde(default)]
    peer_group_memory: f64,
    #[serde(default)]
    peers: BTreeMap<String, BgpPeer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BgpPeer {
    #[serde(default)]
    state: String,
    #[serde(default)]
    remote_as: i64,
    #[serde(default)]
    msg_rcvd: f64,
    #[serde(default)]
    msg_sent: f64,
    #[serde(default)]
    peer_uptime_msec: f64,
    /// Older FRR releases
    #[serde(default)]
    prefix_received_count: f64,
    #[serde(default)]
    pfx_rcd: f64,
    /// Missing on FRR releases predating advertised prefix counts in the summary
    pfx_snt: Option<f64>,
}

impl BgpPeer {
    fn prefixes_received(&self) -> f64 {
        if self.prefix_received_count != 0.0 {
            self.prefix_received_count
        } else {
            self.pfx_rcd
        }
    }

    /// 2 = administratively down, 1 = established, 0 = anything else
    fn state_value(&self) -> f64 {
        match self.state.to_lowercase().as_str() {
            "established" => 1.0,
            "idle (admin)" => 2.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvertisedRoutes {
    #[serde(default)]
    total_prefix_counter: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VniStats {
    vni: u32,
    #[serde(default, rename = "type")]
    vni_type: String,
    #[serde(default)]
    vxlan_if: String,
    #[serde(default)]
    num_macs: f64,
    #[serde(default)]
    num_arp_nd: f64,
    /// Can be a non-numeric value such as "n/a"
    #[serde(default)]
    num_remote_vteps: Value,
    #[serde(default)]
    tenant_vrf: String,
}

/// Neighbor descriptions from the BGP running config, keyed by peer
#[derive(Debug, Default)]
struct PeerDescriptions {
    /// Descriptions that are JSON objects, e.g. `{"desc":"fw1","type":"transit"}`
    json: HashMap<String, HashMap<String, String>>,
    text: HashMap<String, String>,
}

impl PeerDescriptions {
    fn json_value(&self, peer: &str, key: &str) -> Option<&str> {
        self.json
            .get(peer)
            .and_then(|fields| fields.get(key))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

struct BgpDescs {
    rib_count: Desc,
    rib_memory: Desc,
    peer_count: Desc,
    peer_memory: Desc,
    peer_group_count: Desc,
    peer_group_memory: Desc,
    msg_rcvd: Desc,
    msg_sent: Desc,
    prefixes_received: Desc,
    prefixes_advertised: Desc,
    state: Desc,
    uptime: Desc,
    peer_types_up: Desc,
}

impl BgpDescs {
    fn new(with_peer_desc: bool) -> Self {
        let labels = ["vrf", "afi", "safi", "local_as"];
        let mut peer_labels = vec!["vrf", "afi", "safi", "local_as", "peer", "peer_as"];
        if with_peer_desc {
            peer_labels.push("peer_desc");
        }
        let vrf = |name: &str, help: &str| Desc::subsystem(SUBSYSTEM, name, help, &labels);
        let peer = |name: &str, help: &str| Desc::subsystem(PEER_SUBSYSTEM, name, help, &peer_labels);

        BgpDescs {
            rib_count: vrf("rib_count_total", "Number of routes in the RIB."),
            rib_memory: vrf("rib_memory_bytes", "Memory consumed by the RIB."),
            peer_count: vrf("peers_count_total", "Number peers configured."),
            peer_memory: vrf("peers_memory_bytes", "Memory consumed by peers."),
            peer_group_count: vrf("peer_groups_count_total", "Number of peer groups configured."),
            peer_group_memory: vrf("peer_groups_memory_bytes", "Memory consumed by peer groups."),
            msg_rcvd: peer("message_received_total", "Number of received messages."),
            msg_sent: peer("message_sent_total", "Number of sent messages."),
            prefixes_received: peer("prefixes_received_count_total", "Number of prefixes received."),
            prefixes_advertised: peer("prefixes_advertised_count_total", "Number of prefixes advertised."),
            state: peer(
                "state",
                "State of the peer (2 = Administratively Down, 1 = Established, 0 = Down).",
            ),
            uptime: peer("uptime_seconds", "How long has the peer been up."),
            peer_types_up: Desc::subsystem(
                PEER_SUBSYSTEM,
                "types_up",
                "Total Number of Peer Types that are Up.",
                &["type", "afi", "safi"],
            ),
        }
    }
}

struct VniDescs {
    mac_count: Desc,
    arp_nd_count: Desc,
    remote_vtep_count: Desc,
}

impl VniDescs {
    fn new() -> Self {
        let labels = ["vni", "type", "vxlanIf", "tenantVrf"];
        VniDescs {
            mac_count: Desc::subsystem(L2VPN_SUBSYSTEM, "mac_count_total", "Number of known MAC addresses", &labels),
            arp_nd_count: Desc::subsystem(L2VPN_SUBSYSTEM, "arp_nd_count_total", "Number of ARP / ND entries", &labels),
            remote_vtep_count: Desc::subsystem(
                L2VPN_SUBSYSTEM,
                "remote_vtep_count_total",
                "Number of known remote VTEPs. A value of -1 indicates a non-integer output from FRR, such as n/a.",
                &labels,
            ),
        }
    }
}

/// An advertised-routes query still to run for a peer lacking `pfxSnt`
#[derive(Debug, PartialEq)]
struct AdvertisedQuery {
    command: String,
    labels: Vec<String>,
}

pub struct BgpCollector {
    dispatcher: Arc<Dispatcher>,
    family: AddressFamily,
    settings: BgpSettings,
    descs: BgpDescs,
    vni_descs: Option<VniDescs>,
    description_re: Regex,
}

impl BgpCollector {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        family: AddressFamily,
        settings: BgpSettings,
    ) -> Result<Self, CollectorError> {
        let description_re = Regex::new(r".*neighbor (.*) description (.*)\n").map_err(|e| {
            CollectorError::Config {
                collector: SUBSYSTEM,
                reason: e.to_string(),
            }
        })?;
        let vni_descs = (family == AddressFamily::L2vpnEvpn).then(VniDescs::new);

        Ok(BgpCollector {
            dispatcher,
            family,
            descs: BgpDescs::new(settings.peer_descriptions),
            settings,
            vni_descs,
            description_re,
        })
    }

    fn build(ctx: &CollectorContext, family: AddressFamily) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(
            Arc::clone(&ctx.dispatcher),
            family,
            ctx.settings.bgp.clone(),
        )?))
    }

    fn uses_json_descriptions(&self) -> bool {
        self.settings.peer_types || (self.settings.peer_descriptions && !self.settings.peer_descriptions_plain_text)
    }

    /// Extracts `neighbor <peer> description <text>` lines.
    ///
    /// JSON decoding of a description is best effort: a peer whose text is
    /// not a JSON object still gets its plain-text description.
    fn parse_descriptions(&self, running_config: &[u8]) -> PeerDescriptions {
        let text = String::from_utf8_lossy(running_config);
        let mut descriptions = PeerDescriptions::default();

        for captures in self.description_re.captures_iter(&text) {
            let peer = captures[1].to_string();
            let description = captures[2].to_string();
            match serde_json::from_str::<HashMap<String, String>>(&description) {
                Ok(fields) => {
                    descriptions.json.insert(peer.clone(), fields);
                }
                Err(e) if self.uses_json_descriptions() => {
                    warn!(peer = %peer, description = %description, error = %e, "cannot decode BGP peer description as JSON");
                }
                Err(_) => {}
            }
            descriptions.text.insert(peer, description);
        }
        descriptions
    }

    /// Writes process and peer metrics for every VRF that has peers.
    ///
    /// Returns the advertised-routes queries needed for peers whose summary
    /// lacks `pfxSnt`, when that fallback is enabled.
    fn process_summary(
        &self,
        sink: &MetricSink,
        output: &[u8],
        descriptions: &PeerDescriptions,
    ) -> Result<Vec<AdvertisedQuery>, serde_json::Error> {
        let vrfs: BTreeMap<String, BgpVrf> = serde_json::from_slice(output)?;
        let afi = self.family.afi();
        let safi = self.family.safi();
        let mut peer_types: BTreeMap<String, f64> = BTreeMap::new();
        let mut queries = Vec::new();

        for (vrf_name, vrf) in &vrfs {
            if vrf.peer_count == 0.0 {
                continue;
            }
            let vrf_label = vrf_name.to_lowercase();
            let local_as = vrf.local_as.to_string();
            let labels = [vrf_label.as_str(), afi, safi, local_as.as_str()];

            sink.gauge(&self.descs.rib_count, vrf.rib_count, &labels);
            sink.gauge(&self.descs.rib_memory, vrf.rib_memory, &labels);
            sink.gauge(&self.descs.peer_count, vrf.peer_count, &labels);
            sink.gauge(&self.descs.peer_memory, vrf.peer_memory, &labels);
            sink.gauge(&self.descs.peer_group_count, vrf.peer_group_count, &labels);
            sink.gauge(&self.descs.peer_group_memory, vrf.peer_group_memory, &labels);

            for (peer_ip, peer) in &vrf.peers {
                let remote_as = peer.remote_as.to_string();
                let mut peer_labels = vec![
                    vrf_label.as_str(),
                    afi,
                    safi,
                    local_as.as_str(),
                    peer_ip.as_str(),
                    remote_as.as_str(),
                ];
                if self.settings.peer_descriptions {
                    let description = if self.settings.peer_descriptions_plain_text {
                        descriptions.text.get(peer_ip).map(String::as_str)
                    } else {
                        descriptions.json_value(peer_ip, "desc")
                    };
                    peer_labels.push(description.unwrap_or(""));
                }

                match peer.pfx_snt {
                    Some(sent) => sink.gauge(&self.descs.prefixes_advertised, sent, &peer_labels),
                    None if self.settings.advertised_prefixes => queries.push(AdvertisedQuery {
                        command: self.family.advertised_routes_command(vrf_name, peer_ip),
                        labels: peer_labels.iter().map(|l| l.to_string()).collect(),
                    }),
                    None => {}
                }

                sink.counter(&self.descs.msg_rcvd, peer.msg_rcvd, &peer_labels);
                sink.counter(&self.descs.msg_sent, peer.msg_sent, &peer_labels);
                sink.gauge(&self.descs.uptime, peer.peer_uptime_msec * 0.001, &peer_labels);
                sink.gauge(&self.descs.prefixes_received, peer.prefixes_received(), &peer_labels);

                let state = peer.state_value();
                if self.settings.peer_types {
                    for key in &self.settings.peer_type_keys {
                        if let Some(peer_type) = descriptions.json_value(peer_ip, key) {
                            let up = peer_types.entry(peer_type.to_string()).or_insert(0.0);
                            if state == 1.0 {
                                *up += 1.0;
                            }
                        }
                    }
                }
                sink.gauge(&self.descs.state, state, &peer_labels);
            }
        }

        for (peer_type, up) in &peer_types {
            sink.gauge(&self.descs.peer_types_up, *up, &[peer_type.as_str(), afi, safi]);
        }
        Ok(queries)
    }

    /// Runs the advertised-routes fallback queries concurrently.
    ///
    /// Every query that succeeds is written; the first failure is returned
    /// once all of them have finished.
    async fn collect_advertised(&self, sink: &MetricSink, queries: Vec<AdvertisedQuery>) -> Result<(), CollectorError> {
        let results = join_all(queries.iter().map(|query| self.dispatcher.bgp(&query.command))).await;

        let mut first_error = None;
        for (query, result) in queries.iter().zip(results) {
            let parsed = match result {
                Ok(output) => serde_json::from_slice::<AdvertisedRoutes>(&output)
                    .map_err(|e| CollectorError::output(&query.command, &output, e)),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(routes) => {
                    let labels: Vec<&str> = query.labels.iter().map(String::as_str).collect();
                    sink.gauge(&self.descs.prefixes_advertised, routes.total_prefix_counter, &labels);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn process_vnis(&self, sink: &MetricSink, descs: &VniDescs, output: &[u8]) -> Result<(), serde_json::Error> {
        let vnis: BTreeMap<String, VniStats> = serde_json::from_slice(output)?;

        for stats in vnis.values() {
            let vni = stats.vni.to_string();
            let labels = [
                vni.as_str(),
                stats.vni_type.as_str(),
                stats.vxlan_if.as_str(),
                stats.tenant_vrf.as_str(),
            ];
            sink.gauge(&descs.mac_count, stats.num_macs, &labels);
            sink.gauge(&descs.arp_nd_count, stats.num_arp_nd, &labels);
            let remote_vteps = stats.num_remote_vteps.as_f64().unwrap_or(-1.0);
            sink.gauge(&descs.remote_vtep_count, remote_vteps, &labels);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for BgpCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let command = self.family.summary_command();
        let output = self.dispatcher.bgp(&command).await?;

        let descriptions = if self.settings.needs_descriptions() {
            let config = self.dispatcher.bgp(RUNNING_CONFIG_COMMAND).await?;
            self.parse_descriptions(&config)
        } else {
            PeerDescriptions::default()
        };

        let queries = self
            .process_summary(sink, &output, &descriptions)
            .map_err(|e| CollectorError::output(&command, &output, e))?;
        if !queries.is_empty() {
            self.collect_advertised(sink, queries).await?;
        }

        if let Some(vni_descs) = &self.vni_descs {
            let output = self.dispatcher.zebra(VNI_COMMAND).await?;
            self.process_vnis(sink, vni_descs, &output)
                .map_err(|e| CollectorError::output(VNI_COMMAND, &output, e))?;
        }
        Ok(())
    }
}
