//! Configuration for the diagnostics service.

use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP listen port, also the port peers are probed on.
pub const DEFAULT_PORT: u16 = 8888;

/// Default selector matching sibling instances.
pub const DEFAULT_LABEL_SELECTOR: &str = "app.kubernetes.io/name=netprobe";

/// Default bound on a single egress probe.
pub const DEFAULT_EGRESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on a single peer probe.
pub const DEFAULT_CROSS_ZONE_TIMEOUT: Duration = Duration::from_secs(3);

/// Diagnostics service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP listen address.
    pub listen: SocketAddr,
    /// Timeout for DNS and HTTP egress probes.
    pub egress_timeout: Duration,
    /// Whether the cross-zone sweep is served at all.
    pub enable_cross_zone: bool,
    /// Label selector used to find sibling pods.
    pub cross_zone_label_selector: String,
    /// Port every peer is probed on.
    pub cross_zone_target_port: u16,
    /// Timeout for each peer probe.
    pub cross_zone_timeout: Duration,
    /// Record the per-peer-pair latency histogram.
    pub cross_zone_peer_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            egress_timeout: DEFAULT_EGRESS_TIMEOUT,
            enable_cross_zone: false,
            cross_zone_label_selector: DEFAULT_LABEL_SELECTOR.to_string(),
            cross_zone_target_port: DEFAULT_PORT,
            cross_zone_timeout: DEFAULT_CROSS_ZONE_TIMEOUT,
            cross_zone_peer_metrics: false,
        }
    }
}
