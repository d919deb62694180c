//! The diagnostics service exposed to the transport layer.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crosszone;
use crate::discovery::DiscoveryClient;
use crate::dns;
use crate::error::ProbeError;
use crate::http;
use crate::metrics::ProbeMetrics;
use crate::models::{CrossZoneResponse, EgressResult};

/// Request-in, response-out diagnostic operations.
///
/// Cheap to clone; the server hands one clone to every request.
#[derive(Clone)]
pub struct DiagnosticsService {
    config: Arc<Config>,
    discovery: Option<DiscoveryClient>,
    metrics: Arc<dyn ProbeMetrics>,
}

impl DiagnosticsService {
    /// `discovery` is `None` when the cross-zone sweep is not configured.
    pub fn new(
        config: Config,
        discovery: Option<DiscoveryClient>,
        metrics: Arc<dyn ProbeMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            discovery,
            metrics,
        }
    }

    /// DNS lookup, `host` or `host@dns-server[:port]`.
    pub async fn resolve_host(
        &self,
        cancel: &CancellationToken,
        host: &str,
    ) -> Result<EgressResult, ProbeError> {
        dns::resolve_host(cancel, host, self.config.egress_timeout).await
    }

    pub async fn test_http(
        &self,
        cancel: &CancellationToken,
        target: &str,
    ) -> Result<EgressResult, ProbeError> {
        http::test_http(cancel, target, self.config.egress_timeout).await
    }

    pub async fn test_https(
        &self,
        cancel: &CancellationToken,
        target: &str,
    ) -> Result<EgressResult, ProbeError> {
        http::test_https(cancel, target, self.config.egress_timeout).await
    }

    /// HTTPS without certificate verification.
    pub async fn test_https_insecure(
        &self,
        cancel: &CancellationToken,
        target: &str,
    ) -> Result<EgressResult, ProbeError> {
        http::test_https_insecure(cancel, target, self.config.egress_timeout).await
    }

    /// Probe every sibling in another zone.
    pub async fn cross_zone_sweep(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CrossZoneResponse, ProbeError> {
        crosszone::cross_zone_sweep(cancel, &self.config, self.discovery.as_ref(), &self.metrics)
            .await
    }
}
