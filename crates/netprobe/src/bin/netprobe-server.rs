//! Network diagnostics server binary.
//!
//! Serves DNS and HTTP egress probes and, when enabled, the cross-zone sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use netprobe::config::{Config, DEFAULT_LABEL_SELECTOR};
use netprobe::server::{self, AppState};
use netprobe::{DiagnosticsService, DiscoveryClient, OtelMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// On-demand network diagnostics server.
#[derive(Parser)]
#[command(name = "netprobe-server")]
#[command(version, about = "DNS, HTTP egress and cross-zone connectivity diagnostics")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "NETPROBE_LISTEN", default_value = "0.0.0.0:8888")]
    listen: SocketAddr,

    /// Timeout for each DNS or HTTP egress probe, in milliseconds.
    #[arg(long, env = "EGRESS_TIMEOUT_MS", default_value_t = 3000)]
    egress_timeout_ms: u64,

    /// Serve the cross-zone sweep (requires in-cluster Kubernetes access).
    #[arg(long, env = "ENABLE_CROSS_ZONE", default_value_t = false)]
    enable_cross_zone: bool,

    /// Label selector matching sibling instances.
    #[arg(long, env = "CROSS_ZONE_LABEL_SELECTOR", default_value = DEFAULT_LABEL_SELECTOR)]
    cross_zone_label_selector: String,

    /// Port every peer is probed on.
    #[arg(long, env = "CROSS_ZONE_TARGET_PORT", default_value_t = 8888)]
    cross_zone_target_port: u16,

    /// Timeout for each peer probe, in milliseconds.
    #[arg(long, env = "CROSS_ZONE_TIMEOUT_MS", default_value_t = 3000)]
    cross_zone_timeout_ms: u64,

    /// Record per-peer-pair probe latency. Cardinality grows with the
    /// square of the fleet size.
    #[arg(long, env = "CROSS_ZONE_PEER_METRICS", default_value_t = false)]
    cross_zone_peer_metrics: bool,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            listen: self.listen,
            egress_timeout: Duration::from_millis(self.egress_timeout_ms),
            enable_cross_zone: self.enable_cross_zone,
            cross_zone_label_selector: self.cross_zone_label_selector.clone(),
            cross_zone_target_port: self.cross_zone_target_port,
            cross_zone_timeout: Duration::from_millis(self.cross_zone_timeout_ms),
            cross_zone_peer_metrics: self.cross_zone_peer_metrics,
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("netprobe=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

/// Install an OTLP meter provider when a collector endpoint is configured.
fn init_metrics() -> Result<Option<SdkMeterProvider>> {
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_default()
        .is_empty()
    {
        info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, metrics export disabled");
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()
        .context("Failed to build OTLP metric exporter")?;
    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());

    info!("OTLP metrics export enabled");
    Ok(Some(provider))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.config();
    info!(
        listen = %config.listen,
        cross_zone = config.enable_cross_zone,
        "Starting netprobe server"
    );

    let meter_provider = init_metrics()?;

    let discovery = if config.enable_cross_zone {
        let client = DiscoveryClient::in_cluster()
            .await
            .context("Failed to create Kubernetes discovery client")?;
        Some(client)
    } else {
        info!("Cross-zone sweep disabled");
        None
    };

    let metrics = Arc::new(OtelMetrics::new(config.cross_zone_peer_metrics));
    let listen = config.listen;
    let service = DiagnosticsService::new(config, discovery, metrics);

    server::run_server(AppState::new(service), listen, server::shutdown_signal()).await?;

    if let Some(provider) = meter_provider {
        provider
            .shutdown()
            .context("Failed to flush metrics on shutdown")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    #[test]
    #[serial]
    fn test_metrics_export_disabled_without_endpoint() {
        std::env::remove_var(ENDPOINT_ENV);
        assert!(init_metrics().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_grpc_exporter_installed_with_endpoint() {
        // The gRPC channel connects lazily, so no collector is needed.
        std::env::set_var(ENDPOINT_ENV, "http://127.0.0.1:4317");
        let provider = init_metrics();
        std::env::remove_var(ENDPOINT_ENV);

        assert!(provider.unwrap().is_some());
    }

    #[test]
    fn test_cli_defaults_match_config() {
        let cli = Cli::parse_from(["netprobe-server"]);
        let config = cli.config();
        assert_eq!(config.listen, Config::default().listen);
        assert_eq!(config.cross_zone_label_selector, DEFAULT_LABEL_SELECTOR);
        assert!(!config.enable_cross_zone);
    }
}
