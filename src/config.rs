// Configuration module - command-line flags and the validated exporter config
//
// This module is responsible for:
// 1. Declaring the exporter's flags (transport, web, collector options)
// 2. Generating `--collector.<name>` / `--no-collector.<name>` flags from
//    the collector registry
// 3. Producing an immutable `ExporterConfig` and the selected transport

use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use thiserror::Error;
use tracing::info;

use crate::collectors::Registry;
use crate::transport::{CommandTransport, Dispatcher, VtySocket, Vtysh};

/// Errors that can occur while building the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid command line: {0}")]
    Args(#[from] clap::Error),

    #[error("unknown collector: {0}")]
    UnknownCollector(String),

    #[error("invalid setting {flag}: {reason}")]
    InvalidSetting { flag: &'static str, reason: String },
}

/// Prometheus exporter for FRRouting daemons
#[derive(Parser, Debug, Clone)]
#[command(name = "frr-exporter", version)]
pub struct Cli {
    /// Address on which to expose metrics and web interface
    #[arg(long = "web.listen-address", default_value = ":9342")]
    pub listen_address: String,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub telemetry_path: String,

    /// Path of the localstatedir containing each daemon's Unix socket
    #[arg(long = "frr.socket.dir-path", default_value = "/var/run/frr")]
    pub socket_dir_path: PathBuf,

    /// Timeout when connecting to the FRR daemon Unix sockets
    #[arg(long = "frr.socket.timeout", default_value = "20s", value_parser = humantime::parse_duration)]
    pub socket_timeout: Duration,

    /// Use vtysh to query FRR instead of each daemon's Unix socket (not recommended)
    #[arg(long = "frr.vtysh")]
    pub vtysh: bool,

    /// Path of vtysh
    #[arg(long = "frr.vtysh.path", default_value = "/usr/bin/vtysh")]
    pub vtysh_path: PathBuf,

    /// Timeout when running vtysh commands
    #[arg(long = "frr.vtysh.timeout", default_value = "20s", value_parser = humantime::parse_duration)]
    pub vtysh_timeout: Duration,

    /// Enable sudo when executing vtysh commands
    #[arg(long = "frr.vtysh.sudo")]
    pub vtysh_sudo: bool,

    /// Additional options passed to vtysh, separated by spaces
    #[arg(long = "frr.vtysh.options", default_value = "", allow_hyphen_values = true)]
    pub vtysh_options: String,

    /// Comma-separated list of OSPF instance IDs to scrape (socket transport only)
    #[arg(long = "collector.ospf.instances", default_value = "")]
    pub ospf_instances: String,

    /// Enable detailed route count of each route type
    #[arg(long = "collector.route.detailed-routes")]
    pub detailed_routes: bool,

    /// Add the desc value of JSON formatted BGP peer descriptions as a label to peer metrics
    #[arg(long = "collector.bgp.peer-descriptions")]
    pub bgp_peer_descriptions: bool,

    /// Use the full text of the BGP peer description instead of its JSON desc key
    #[arg(long = "collector.bgp.peer-descriptions.plain-text")]
    pub bgp_peer_descriptions_plain_text: bool,

    /// Enable the frr_bgp_peer_types_up metric
    #[arg(long = "collector.bgp.peer-types")]
    pub bgp_peer_types: bool,

    /// Keys of the JSON formatted BGP peer description used by frr_bgp_peer_types_up
    #[arg(long = "collector.bgp.peer-types.keys", default_value = "type", value_delimiter = ',')]
    pub bgp_peer_type_keys: Vec<String>,

    /// Query advertised prefixes per peer, for FRR releases whose summary lacks pfxSnt
    #[arg(long = "collector.bgp.advertised-prefixes")]
    pub bgp_advertised_prefixes: bool,
}

/// BGP collector options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpSettings {
    pub peer_descriptions: bool,
    pub peer_descriptions_plain_text: bool,
    pub peer_types: bool,
    pub peer_type_keys: Vec<String>,
    pub advertised_prefixes: bool,
}

impl Default for BgpSettings {
    fn default() -> Self {
        BgpSettings {
            peer_descriptions: false,
            peer_descriptions_plain_text: false,
            peer_types: false,
            peer_type_keys: vec!["type".to_string()],
            advertised_prefixes: false,
        }
    }
}

impl BgpSettings {
    /// Whether the running config has to be fetched for peer descriptions
    pub fn needs_descriptions(&self) -> bool {
        self.peer_descriptions || self.peer_types
    }
}

/// Collector-specific settings handed to factories.
///
/// Kept raw where the collector owns the parsing (OSPF instance IDs), so a
/// bad value is rejected by the collector's factory at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Comma-separated OSPF instance IDs, empty for a single ospfd
    pub ospf_instances: String,

    pub detailed_routes: bool,

    pub bgp: BgpSettings,
}

/// Validated, immutable exporter configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub listen_address: String,
    pub telemetry_path: String,
    pub socket_dir_path: PathBuf,
    pub socket_timeout: Duration,
    pub vtysh: bool,
    pub vtysh_path: PathBuf,
    pub vtysh_timeout: Duration,
    pub vtysh_sudo: bool,
    pub vtysh_options: Vec<String>,
    pub collectors: CollectorSettings,
}

impl ExporterConfig {
    /// Parses the process arguments, applying collector toggles to `registry`
    pub fn from_env(registry: &mut Registry) -> Result<Self, ConfigError> {
        Self::parse_from(std::env::args_os(), registry)
    }

    /// Parses an explicit argument list (first item is the binary name)
    pub fn parse_from<I, T>(args: I, registry: &mut Registry) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = command(registry).try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        apply_collector_flags(&matches, registry)?;
        ExporterConfig::try_from(cli)
    }

    /// Listen address usable by a socket bind; `:9342` means all interfaces
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }

    /// vtysh invocation built from the `--frr.vtysh.*` flags
    pub fn vtysh(&self) -> Vtysh {
        Vtysh::new(
            self.vtysh_path.clone(),
            self.vtysh_sudo,
            self.vtysh_options.clone(),
            self.vtysh_timeout,
        )
    }

    /// Builds the transport selected by `--frr.vtysh`
    pub fn transport(&self) -> CommandTransport {
        if self.vtysh {
            info!(path = %self.vtysh_path.display(), sudo = self.vtysh_sudo, "using vtysh transport");
            CommandTransport::Vtysh(self.vtysh())
        } else {
            info!(dir = %self.socket_dir_path.display(), "using daemon socket transport");
            CommandTransport::Socket(VtySocket::new(
                self.socket_dir_path.clone(),
                self.socket_timeout,
            ))
        }
    }

    /// Dispatcher over the selected transport; BFD always uses vtysh
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.transport(), self.vtysh())
    }
}

impl TryFrom<Cli> for ExporterConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if !cli.telemetry_path.starts_with('/') {
            return Err(ConfigError::InvalidSetting {
                flag: "web.telemetry-path",
                reason: format!("{:?} must start with '/'", cli.telemetry_path),
            });
        }
        if cli.telemetry_path == "/" {
            return Err(ConfigError::InvalidSetting {
                flag: "web.telemetry-path",
                reason: "'/' is reserved for the landing page".to_string(),
            });
        }

        Ok(ExporterConfig {
            listen_address: cli.listen_address,
            telemetry_path: cli.telemetry_path,
            socket_dir_path: cli.socket_dir_path,
            socket_timeout: cli.socket_timeout,
            vtysh: cli.vtysh,
            vtysh_path: cli.vtysh_path,
            vtysh_timeout: cli.vtysh_timeout,
            vtysh_sudo: cli.vtysh_sudo,
            vtysh_options: cli
                .vtysh_options
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            collectors: CollectorSettings {
                ospf_instances: cli.ospf_instances,
                detailed_routes: cli.detailed_routes,
                bgp: BgpSettings {
                    peer_descriptions: cli.bgp_peer_descriptions,
                    peer_descriptions_plain_text: cli.bgp_peer_descriptions_plain_text,
                    peer_types: cli.bgp_peer_types,
                    peer_type_keys: cli.bgp_peer_type_keys,
                    advertised_prefixes: cli.bgp_advertised_prefixes,
                },
            },
        })
    }
}

fn enable_flag(name: &str) -> String {
    format!("collector.{}", name)
}

fn disable_flag(name: &str) -> String {
    format!("no-collector.{}", name)
}

/// The derived CLI plus one enable/disable flag pair per registered collector
fn command(registry: &Registry) -> Command {
    let mut cmd = Cli::command();
    for (name, enabled_by_default) in registry.entries() {
        let help = if enabled_by_default {
            format!(
                "Enable the {} collector (default: enabled, to disable use --{})",
                name,
                disable_flag(name)
            )
        } else {
            format!("Enable the {} collector (default: disabled)", name)
        };

        cmd = cmd
            .arg(
                Arg::new(enable_flag(name))
                    .long(enable_flag(name))
                    .action(ArgAction::SetTrue)
                    .help(help),
            )
            .arg(
                Arg::new(disable_flag(name))
                    .long(disable_flag(name))
                    .action(ArgAction::SetTrue)
                    .conflicts_with(enable_flag(name))
                    .hide(true),
            );
    }
    cmd
}

fn apply_collector_flags(matches: &ArgMatches, registry: &mut Registry) -> Result<(), ConfigError> {
    let names: Vec<&'static str> = registry.entries().map(|(name, _)| name).collect();
    for name in names {
        if matches.get_flag(&enable_flag(name)) {
            registry.set_enabled(name, true)?;
        } else if matches.get_flag(&disable_flag(name)) {
            registry.set_enabled(name, false)?;
        }
    }
    Ok(())
}
