// Collectors module - the uniform contract every FRR subsystem implements
//
// Each subsystem (BGP, OSPF, PIM, ...) lives in its own module, registers
// itself with the `Registry` under a stable name, and implements
// `Collector`. The exporter only ever sees that contract: "given a sink,
// write your metrics or return an error".

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::CollectorSettings;
use crate::sink::MetricSink;
use crate::transport::{Dispatcher, TransportError};

pub mod bfd;
pub mod bgp;
pub mod mpls_ldp;
pub mod ospf;
pub mod pim;
pub mod registry;
pub mod route;
pub mod status;
pub mod vrrp;

pub use registry::Registry;

/// Errors a collector can report for one scrape, or reject its construction with
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Daemon output could not be decoded into the expected shape
    #[error("cannot process output of {command}: {message}: command output: {output}")]
    Output {
        command: String,
        message: String,
        output: String,
    },

    /// The collector's factory refused its configuration
    #[error("invalid configuration for collector {collector}: {reason}")]
    Config {
        collector: &'static str,
        reason: String,
    },
}

impl CollectorError {
    /// Wraps a parse failure together with the command and its raw output
    pub fn output(command: &str, output: &[u8], err: impl Display) -> Self {
        CollectorError::Output {
            command: command.to_string(),
            message: err.to_string(),
            output: String::from_utf8_lossy(output).into_owned(),
        }
    }
}

/// Core trait that all FRR subsystem collectors implement.
///
/// Instances are built once by their factory and reused for every scrape,
/// so anything expensive to derive (descriptions, parsed settings) belongs
/// in the struct, not in `update`.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Queries the subsystem and writes its metrics to `sink`.
    ///
    /// # Returns
    /// * `Ok(())` - metrics written, reported as `frr_collector_up 1`
    /// * `Err(CollectorError)` - reported as `frr_collector_up 0` and logged;
    ///   other collectors in the same scrape are unaffected
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError>;
}

/// Everything a factory needs to build its collector
#[derive(Clone)]
pub struct CollectorContext {
    /// Routes commands to the daemons over the configured transport
    pub dispatcher: Arc<Dispatcher>,

    /// Collector-specific flags
    pub settings: CollectorSettings,
}

impl CollectorContext {
    pub fn new(dispatcher: Dispatcher, settings: CollectorSettings) -> Self {
        CollectorContext {
            dispatcher: Arc::new(dispatcher),
            settings,
        }
    }
}

/// Builds the registry of every collector shipped with the exporter.
///
/// When adding a new subsystem:
/// 1. Create its module and implement `Collector`
/// 2. Give it a `register` function
/// 3. Call it here
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    bgp::register(&mut registry);
    ospf::register(&mut registry);
    pim::register(&mut registry);
    route::register(&mut registry);
    status::register(&mut registry);
    vrrp::register(&mut registry);
    bfd::register(&mut registry);
    mpls_ldp::register(&mut registry);
    registry
}

/// Converts an `HH:MM:SS` uptime into seconds
pub(crate) fn parse_hms(value: &str) -> Option<u64> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}
