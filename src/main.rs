// FRR Exporter - Prometheus exporter for the FRRouting suite
//
// Queries the FRR daemons (bgpd, ospfd, pimd, zebra, vrrpd, ldpd) over their
// Unix vty sockets, or through vtysh, and exposes the results in the
// Prometheus text format. BFD is always queried through vtysh.
//
// # Features
// - One collector per routing subsystem, each enabled or disabled by flag
// - Collectors run concurrently on every scrape; one failing collector
//   never hides the others
// - Per-collector scrape duration and up/down metrics
// - Systemd integration (JSON logs when run as a service)
//
// # Usage
// frr-exporter [--web.listen-address :9342] [--collector.<name>] [--no-collector.<name>]
//
// Example:
// frr-exporter --frr.socket.dir-path /run/frr --collector.bgp6 --no-collector.ospf

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Module declarations
mod collectors;
mod config;
mod exporter;
mod http;
mod sink;
mod transport;

use collectors::{default_registry, CollectorContext};
use config::{ConfigError, ExporterConfig};
use exporter::Exporter;

/// Application entry point
///
/// This function:
/// 1. Parses command-line flags (including per-collector toggles)
/// 2. Initializes logging
/// 3. Builds the transport and every enabled collector
/// 4. Serves scrapes until Ctrl+C
#[tokio::main]
async fn main() -> Result<()> {
    let mut registry = default_registry();
    let config = match ExporterConfig::from_env(&mut registry) {
        Ok(config) => config,
        // --help, --version and usage errors are printed by clap itself
        Err(ConfigError::Args(e)) => e.exit(),
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    init_logging();

    info!("=== FRR Exporter Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let ctx = CollectorContext::new(config.dispatcher(), config.collectors.clone());
    let exporter = Exporter::new(&registry, &ctx).context("Failed to initialize collectors")?;

    let enabled: Vec<&str> = exporter.collector_names().collect();
    if enabled.is_empty() {
        warn!("No collectors enabled, only exporter metrics will be served");
    } else {
        info!("Enabled collectors: {}", enabled.join(", "));
    }

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to listen on {}", address))?;

    info!("=== FRR Exporter Started Successfully ===");
    info!("Listening on {}, metrics at {}", address, config.telemetry_path);
    info!("Press Ctrl+C to stop");

    let app = http::router(Arc::new(exporter), &config.telemetry_path);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("=== FRR Exporter Stopped ===");
    Ok(())
}

/// Resolves on Ctrl+C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Colored, human-readable output when running in a terminal
/// - JSON output when running as a systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug frr-exporter ...  # Log every collector run
/// RUST_LOG=warn frr-exporter ...   # Only warnings and errors
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID environment variable
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
