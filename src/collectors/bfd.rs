// BFD collector - session count, uptime and state per peer
//
// Queried through vtysh whatever the transport, see `Dispatcher::bfd`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "bfd";
const COMMAND: &str = "show bfd peers json";

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, true, BfdCollector::build);
}

/// Down sessions report `downtime` instead of `uptime`, hence the defaults
#[derive(Debug, Deserialize)]
struct BfdPeer {
    peer: String,
    #[serde(default)]
    local: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    uptime: u64,
}

pub struct BfdCollector {
    dispatcher: Arc<Dispatcher>,
    peer_count: Desc,
    peer_uptime: Desc,
    peer_state: Desc,
}

impl BfdCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let labels = ["local", "peer"];
        BfdCollector {
            dispatcher,
            peer_count: Desc::subsystem(SUBSYSTEM, "peer_count", "Number of peers detected.", &[]),
            peer_uptime: Desc::subsystem(SUBSYSTEM, "peer_uptime", "Uptime of bfd peer", &labels),
            peer_state: Desc::subsystem(SUBSYSTEM, "peer_state", "State of the bfd peer", &labels),
        }
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher))))
    }

    fn process_peers(&self, sink: &MetricSink, output: &[u8]) -> Result<(), serde_json::Error> {
        let peers: Vec<BfdPeer> = serde_json::from_slice(output)?;

        sink.gauge(&self.peer_count, peers.len() as f64, &[]);
        for peer in &peers {
            let labels = [peer.local.as_str(), peer.peer.as_str()];
            sink.gauge(&self.peer_uptime, peer.uptime as f64, &labels);
            let state = if peer.status == "up" { 1.0 } else { 0.0 };
            sink.gauge(&self.peer_state, state, &labels);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for BfdCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let output = self.dispatcher.bfd(COMMAND).await?;
        self.process_peers(sink, &output)
            .map_err(|e| CollectorError::output(COMMAND, &output, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{fake_vtysh, mock_daemon, socket_dispatcher, socket_dispatcher_with_vtysh};
    use std::collections::BTreeMap;

    const PEERS: &str = r#"[
  {"multihop": false, "peer": "10.10.141.61", "local": "10.10.141.81", "vrf": "default",
   "id": 869087474, "remote-id": 533345668, "status": "up", "uptime": 847716, "diagnostic": "ok"},
  {"multihop": false, "peer": "10.10.141.62", "local": "10.10.141.81", "vrf": "default",
   "id": 2809641312, "remote-id": 3617154307, "status": "up", "uptime": 847595},
  {"multihop": false, "peer": "10.10.141.63", "local": "10.10.141.81", "vrf": "default",
   "id": 2809641313, "status": "down", "downtime": 120}
]"#;

    #[test]
    fn test_process_peers() {
        let collector = BfdCollector::new(socket_dispatcher("/nonexistent"));
        let sink = MetricSink::new();
        collector.process_peers(&sink, PEERS.as_bytes()).unwrap();

        let expected: BTreeMap<String, f64> = [
            ("frr_bfd_peer_count{}", 3.0),
            ("frr_bfd_peer_uptime{local=10.10.141.81,peer=10.10.141.61}", 847716.0),
            ("frr_bfd_peer_uptime{local=10.10.141.81,peer=10.10.141.62}", 847595.0),
            ("frr_bfd_peer_uptime{local=10.10.141.81,peer=10.10.141.63}", 0.0),
            ("frr_bfd_peer_state{local=10.10.141.81,peer=10.10.141.61}", 1.0),
            ("frr_bfd_peer_state{local=10.10.141.81,peer=10.10.141.62}", 1.0),
            ("frr_bfd_peer_state{local=10.10.141.81,peer=10.10.141.63}", 0.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(sink.values(), expected);
    }

    #[test]
    fn test_process_no_peers() {
        let collector = BfdCollector::new(socket_dispatcher("/nonexistent"));
        let sink = MetricSink::new();
        collector.process_peers(&sink, b"[]").unwrap();
        assert_eq!(sink.values()["frr_bfd_peer_count{}"], 0.0);
    }

    #[tokio::test]
    async fn test_update_uses_vtysh_with_socket_transport() {
        let dir = tempfile::tempdir().unwrap();
        // bfdd's own socket does not know the command
        mock_daemon(dir.path(), "bfdd", &[]);
        let vtysh = fake_vtysh(dir.path(), &format!("cat <<'EOF'\n{}\nEOF", PEERS));
        let collector = BfdCollector::new(socket_dispatcher_with_vtysh(dir.path(), vtysh));

        let sink = MetricSink::new();
        collector.update(&sink).await.unwrap();
        assert_eq!(sink.values()["frr_bfd_peer_count{}"], 3.0);
    }

    #[tokio::test]
    async fn test_update_reports_bad_output() {
        let dir = tempfile::tempdir().unwrap();
        let vtysh = fake_vtysh(dir.path(), "echo '% Unknown command: show bfd peers json'");
        let collector = BfdCollector::new(socket_dispatcher_with_vtysh(dir.path(), vtysh));

        let err = collector.update(&MetricSink::new()).await.unwrap_err();
        assert!(matches!(err, CollectorError::Output { .. }));
        assert!(err.to_string().contains("% Unknown command: show bfd peers json"));
    }

    #[tokio::test]
    async fn test_update_reports_vtysh_failure() {
        let dir = tempfile::tempdir().unwrap();
        let vtysh = fake_vtysh(dir.path(), "echo 'bfdd is not running' >&2\nexit 1");
        let collector = BfdCollector::new(socket_dispatcher_with_vtysh(dir.path(), vtysh));

        let err = collector.update(&MetricSink::new()).await.unwrap_err();
        assert!(matches!(err, CollectorError::Transport(_)));
        assert!(err.to_string().contains("bfdd is not running"));
    }
}
