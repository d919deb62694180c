//! Cross-zone connectivity sweep.
//!
//! One sweep runs Precondition → Discover → Group → Filter → Fan-out →
//! Aggregate. Nothing survives between sweeps.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::{DiscoveryClient, UNKNOWN_ZONE};
use crate::error::ProbeError;
use crate::http::{self, Scheme};
use crate::metrics::ProbeMetrics;
use crate::models::{
    CrossZoneResponse, CrossZoneSummary, CrossZoneTestResult, PeerInfo, PeerList,
};
use crate::target::join_host_port;

/// Environment variable naming this instance's zone.
pub const ZONE_ENV: &str = "AVAILABILITY_ZONE";

/// Environment variables naming this instance, first non-empty wins.
pub const INSTANCE_ENV_VARS: [&str; 2] = ["POD_NAME", "K8S_POD_NAME"];

/// Zone and name of the instance running the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub zone: String,
    pub name: String,
}

impl Instance {
    /// Read identity from the process environment.
    pub fn from_env() -> Result<Self, ProbeError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read identity through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProbeError> {
        let zone = lookup(ZONE_ENV).filter(|v| !v.is_empty()).ok_or_else(|| {
            ProbeError::FailedPrecondition(format!("{ZONE_ENV} environment variable not set"))
        })?;

        let name = INSTANCE_ENV_VARS
            .iter()
            .find_map(|&key| lookup(key).filter(|v| !v.is_empty()))
            .ok_or_else(|| {
                ProbeError::FailedPrecondition(format!(
                    "{} environment variable not set",
                    INSTANCE_ENV_VARS[0]
                ))
            })?;

        Ok(Self { zone, name })
    }
}

/// Parameters of the fan-out step.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    pub target_port: u16,
    pub timeout: Duration,
}

/// Run a full sweep from this instance.
pub async fn cross_zone_sweep(
    cancel: &CancellationToken,
    config: &Config,
    discovery: Option<&DiscoveryClient>,
    metrics: &Arc<dyn ProbeMetrics>,
) -> Result<CrossZoneResponse, ProbeError> {
    if !config.enable_cross_zone {
        return Err(ProbeError::Unimplemented(
            "cross-zone endpoint is disabled. Enable with --enable-cross-zone".to_string(),
        ));
    }

    let Some(discovery) = discovery else {
        return Err(ProbeError::Internal(
            "Kubernetes client not initialized".to_string(),
        ));
    };

    let instance = Instance::from_env()?;

    let peers = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(ProbeError::Internal(
                "failed to discover peers: request cancelled".to_string(),
            ));
        }
        res = discovery.discover(&config.cross_zone_label_selector) => res
            .map_err(|e| ProbeError::Internal(format!("failed to discover peers: {e}")))?,
    };

    let fan_out = FanOut {
        target_port: config.cross_zone_target_port,
        timeout: config.cross_zone_timeout,
    };
    Ok(sweep_peers(cancel, &instance, peers, fan_out, metrics).await)
}

/// Group, filter, probe and aggregate an already discovered peer set.
pub async fn sweep_peers(
    cancel: &CancellationToken,
    instance: &Instance,
    peers: Vec<PeerInfo>,
    fan_out: FanOut,
    metrics: &Arc<dyn ProbeMetrics>,
) -> CrossZoneResponse {
    let discovered_peers = group_by_zone(&peers);
    for (zone, list) in &discovered_peers {
        metrics.record_peers_discovered(zone, list.peer_names.len() as u64);
    }

    let targets = filter_cross_zone(&peers, &instance.zone, &instance.name);
    info!(
        zone = %instance.zone,
        instance = %instance.name,
        discovered = peers.len(),
        zones = discovered_peers.len(),
        cross_zone = targets.len(),
        "Starting cross-zone sweep"
    );

    let cross_zone_tests = probe_peers(cancel, instance, targets, fan_out, metrics).await;
    let summary = summarize(peers.len(), discovered_peers.len(), &cross_zone_tests);

    info!(
        tested = summary.cross_zone_peers_tested,
        successful = summary.successful_tests,
        failed = summary.failed_tests,
        "Cross-zone sweep completed"
    );

    CrossZoneResponse {
        current_zone: instance.zone.clone(),
        current_instance: instance.name.clone(),
        discovered_peers,
        cross_zone_tests,
        summary,
    }
}

/// Peer names by zone, self included. An empty zone groups as `unknown`.
#[must_use]
pub fn group_by_zone(peers: &[PeerInfo]) -> BTreeMap<String, PeerList> {
    let mut groups: BTreeMap<String, PeerList> = BTreeMap::new();
    for peer in peers {
        let zone = if peer.zone.is_empty() {
            UNKNOWN_ZONE
        } else {
            peer.zone.as_str()
        };
        groups
            .entry(zone.to_string())
            .or_default()
            .peer_names
            .push(peer.name.clone());
    }
    groups
}

/// Peers outside `current_zone`, minus this instance, in discovery order.
#[must_use]
pub fn filter_cross_zone(
    peers: &[PeerInfo],
    current_zone: &str,
    current_instance: &str,
) -> Vec<PeerInfo> {
    peers
        .iter()
        .filter(|p| p.name != current_instance && p.zone != current_zone)
        .cloned()
        .collect()
}

/// Probe every peer concurrently.
///
/// Result `i` always belongs to `peers[i]`, whatever order the probes finish
/// in. A probe task that dies is reported as a failure for its own peer.
pub async fn probe_peers(
    cancel: &CancellationToken,
    source: &Instance,
    peers: Vec<PeerInfo>,
    fan_out: FanOut,
    metrics: &Arc<dyn ProbeMetrics>,
) -> Vec<CrossZoneTestResult> {
    let tasks = peers.iter().cloned().map(|peer| {
        let cancel = cancel.clone();
        let source = source.clone();
        let metrics = Arc::clone(metrics);
        tokio::spawn(async move {
            let start = Instant::now();
            let result = probe_peer(&cancel, &peer, fan_out).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            metrics.record_cross_zone_test(&source.zone, &peer.zone, result.success);
            metrics.record_cross_zone_duration(
                &source.zone,
                &source.name,
                &peer.zone,
                &peer.name,
                elapsed_ms,
            );
            result
        })
    });

    let joined = join_all(tasks).await;

    peers
        .into_iter()
        .zip(joined)
        .map(|(peer, outcome)| {
            outcome.unwrap_or_else(|e| {
                warn!(peer = %peer.name, error = %e, "Peer probe task failed");
                failed_result(&peer, format!("probe task failed: {e}"))
            })
        })
        .collect()
}

async fn probe_peer(
    cancel: &CancellationToken,
    peer: &PeerInfo,
    fan_out: FanOut,
) -> CrossZoneTestResult {
    let target = join_host_port(&peer.address, fan_out.target_port);
    match http::test_connection(
        cancel,
        &target,
        Scheme::Http,
        fan_out.target_port,
        false,
        fan_out.timeout,
    )
    .await
    {
        Ok(result) => CrossZoneTestResult {
            peer_name: peer.name.clone(),
            peer_address: peer.address.clone(),
            zone: peer.zone.clone(),
            success: result.success,
            status_code: result.status_code.unwrap_or(0),
            duration_ms: result.duration_ms,
            error: result.error.unwrap_or_default(),
        },
        Err(e) => failed_result(peer, e.to_string()),
    }
}

fn failed_result(peer: &PeerInfo, error: String) -> CrossZoneTestResult {
    CrossZoneTestResult {
        peer_name: peer.name.clone(),
        peer_address: peer.address.clone(),
        zone: peer.zone.clone(),
        success: false,
        status_code: 0,
        duration_ms: 0,
        error,
    }
}

/// Aggregate counts for a finished fan-out.
#[must_use]
pub fn summarize(
    total_peers: usize,
    total_zones: usize,
    results: &[CrossZoneTestResult],
) -> CrossZoneSummary {
    let successful_tests = results.iter().filter(|r| r.success).count();
    CrossZoneSummary {
        total_peers,
        total_zones,
        cross_zone_peers_tested: results.len(),
        successful_tests,
        failed_tests: results.len() - successful_tests,
    }
}
