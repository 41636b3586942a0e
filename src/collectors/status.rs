// Status collector - whether FRR answers at all, with its version and OS

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::error;

use super::{Collector, CollectorContext, CollectorError, Registry};
use crate::sink::{Desc, MetricSink};
use crate::transport::Dispatcher;

const SUBSYSTEM: &str = "status";
const COMMAND: &str = "show version";

pub fn register(registry: &mut Registry) {
    registry.register(SUBSYSTEM, true, StatusCollector::build);
}

/// Reports `frr_status_up{version, os}`.
///
/// Unlike the other collectors this one never fails: an unreachable zebra
/// or unparsable output is itself the observation, reported as 0 with
/// `unknown` labels.
pub struct StatusCollector {
    dispatcher: Arc<Dispatcher>,
    up: Desc,
    version_re: Regex,
    os_re: Regex,
}

impl StatusCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Result<Self, CollectorError> {
        let invalid = |e: regex::Error| CollectorError::Config {
            collector: SUBSYSTEM,
            reason: e.to_string(),
        };
        Ok(StatusCollector {
            dispatcher,
            up: Desc::subsystem(
                SUBSYSTEM,
                "up",
                "FRR status (1 = up and responding, 0 = down or unreachable)",
                &["version", "os"],
            ),
            version_re: Regex::new(r"FRRouting (\S+)").map_err(invalid)?,
            os_re: Regex::new(r"on (.+)\.$").map_err(invalid)?,
        })
    }

    fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.dispatcher))?))
    }

    /// Extracts `(version, os)` from the first line of `show version`
    fn parse_version(&self, output: &[u8]) -> Result<(String, String), String> {
        let text = String::from_utf8_lossy(output);
        let first_line = text.lines().next().unwrap_or("").trim_end();
        if first_line.is_empty() {
            return Err("empty output".to_string());
        }

        let version = self
            .version_re
            .captures(first_line)
            .map(|c| c[1].to_string())
            .ok_or_else(|| format!("could not extract version from: {}", first_line))?;
        let os = self
            .os_re
            .captures(first_line)
            .map(|c| c[1].to_string())
            .ok_or_else(|| format!("could not extract OS from: {}", first_line))?;

        Ok((version, os))
    }
}

#[async_trait]
impl Collector for StatusCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let parsed = match self.dispatcher.zebra(COMMAND).await {
            Ok(output) => self.parse_version(&output).map_err(|e| {
                error!(error = %e, output = %String::from_utf8_lossy(&output), "failed to parse show version output");
            }),
            Err(e) => {
                error!(error = %e, timed_out = e.is_timeout(), "failed to execute show version command");
                Err(())
            }
        };

        match parsed {
            Ok((version, os)) => sink.gauge(&self.up, 1.0, &[version.as_str(), os.as_str()]),
            Err(()) => sink.gauge(&self.up, 0.0, &["unknown", "unknown"]),
        }
        Ok(())
    }
}
