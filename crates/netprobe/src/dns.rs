//! DNS probe and the per-call resolver strategy.
//!
//! A lookup goes either to the platform resolver or, when the caller names a
//! DNS server, to that single server over UDP. There is no retry chain and
//! nothing is cached between calls.

use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProbeError;
use crate::models::EgressResult;
use crate::target::{normalize_dns_server, ProbeTarget};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resolver that queries exactly one DNS server over UDP.
#[derive(Clone)]
pub struct OverrideResolver {
    server: SocketAddr,
    resolver: TokioAsyncResolver,
}

impl OverrideResolver {
    /// Build a resolver for a raw, not yet normalized DNS override.
    pub async fn from_override(dns_override: &str, timeout: Duration) -> Result<Self, String> {
        let server = normalize_dns_server(dns_override)
            .map_err(|e| format!("invalid DNS server address {dns_override:?}: {e}"))?;
        Self::connect(&server, timeout).await
    }

    /// Build a resolver for an already normalized `host:port` server address.
    ///
    /// A server given by name is looked up through the platform resolver
    /// first, so callers bound this with their own timeout.
    pub async fn connect(server: &str, timeout: Duration) -> Result<Self, String> {
        let server_addr = tokio::net::lookup_host(server)
            .await
            .map_err(|e| format!("failed to resolve DNS server {server}: {e}"))?
            .next()
            .ok_or_else(|| format!("failed to resolve DNS server {server}: no addresses"))?;

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server_addr, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        // `attempts` counts retries
        opts.attempts = 0;
        opts.cache_size = 0;
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        Ok(Self {
            server: server_addr,
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| format!("lookup {host} on {}: {e}", self.server))?;
        Ok(lookup.iter().collect())
    }
}

// Lets reqwest dial through the override server. Only the first answer is
// used, on the port of the request being dialed.
impl reqwest::dns::Resolve for OverrideResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let this = self.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs = this.lookup(&host).await?;
            let first = addrs
                .first()
                .copied()
                .ok_or_else(|| format!("no IP addresses found for {host}"))?;
            let addrs: reqwest::dns::Addrs = Box::new(std::iter::once(SocketAddr::new(first, 0)));
            Ok::<_, BoxError>(addrs)
        })
    }
}

/// Resolution strategy chosen per call.
#[derive(Clone)]
pub enum HostResolver {
    /// The operating system's resolver.
    Platform,
    /// A single caller-supplied DNS server.
    Override(OverrideResolver),
}

impl HostResolver {
    /// Pick the strategy for a parsed target.
    pub async fn for_target(target: &ProbeTarget, timeout: Duration) -> Result<Self, String> {
        if !target.has_dns_override() {
            return Ok(Self::Platform);
        }
        OverrideResolver::from_override(&target.dns_override, timeout)
            .await
            .map(Self::Override)
    }

    /// Look up all addresses for `host`, deduplicated in answer order.
    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        let addrs = match self {
            Self::Platform => tokio::net::lookup_host((host, 0))
                .await
                .map_err(|e| format!("lookup {host}: {e}"))?
                .map(|addr| addr.ip())
                .collect::<Vec<_>>(),
            Self::Override(resolver) => resolver.lookup(host).await?,
        };

        let mut unique = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if !unique.contains(&addr) {
                unique.push(addr);
            }
        }
        Ok(unique)
    }
}

/// Resolve `host` (optionally `host@dns-server`) and report the addresses.
///
/// Only an empty `host` is an error. Every resolver failure, timeout or
/// cancellation is reported inside the returned result.
pub async fn resolve_host(
    cancel: &CancellationToken,
    host: &str,
    timeout: Duration,
) -> Result<EgressResult, ProbeError> {
    if host.is_empty() {
        return Err(ProbeError::InvalidArgument(
            "host must not be empty".to_string(),
        ));
    }

    let target = ProbeTarget::parse(host);
    let hostname = target.host_port.clone();

    // Setting up an override resolver may itself hit the network, so it
    // shares the lookup's cancellation and deadline.
    let start = Instant::now();
    let lookup = async {
        let resolver = HostResolver::for_target(&target, timeout).await?;
        resolver.lookup(&hostname).await
    };
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(format!("lookup {hostname}: request cancelled")),
        res = tokio::time::timeout(timeout, lookup) => match res {
            Ok(lookup) => lookup,
            Err(_) => Err(format!("lookup {hostname}: timed out after {}ms", timeout.as_millis())),
        },
    };
    let elapsed = start.elapsed();

    match outcome {
        Ok(addrs) => {
            debug!(host = %hostname, count = addrs.len(), "DNS lookup succeeded");
            let addresses: Vec<String> = addrs.iter().map(ToString::to_string).collect();
            Ok(EgressResult::succeeded(
                hostname,
                format!("resolved {} address(es)", addresses.len()),
                elapsed,
            )
            .with_resolved_addresses(addresses))
        }
        Err(e) => {
            debug!(host = %hostname, error = %e, "DNS lookup failed");
            Ok(EgressResult::failed(hostname, e, elapsed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn test_empty_host_is_invalid_argument() {
        let err = resolve_host(&CancellationToken::new(), "", TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let result = resolve_host(&CancellationToken::new(), "localhost", TIMEOUT)
            .await
            .unwrap();
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(result.target, "localhost");
        assert!(!result.resolved_addresses.unwrap().is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_ip_literal_resolves_to_itself() {
        let result = resolve_host(&CancellationToken::new(), "127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.resolved_addresses, Some(vec!["127.0.0.1".to_string()]));
    }

    #[tokio::test]
    async fn test_invalid_override_is_reported_in_result() {
        let result = resolve_host(&CancellationToken::new(), "localhost@[::1", TIMEOUT)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.target, "localhost");
        assert!(result.error_text().contains("invalid DNS server address"));
    }

    #[tokio::test]
    async fn test_unresolvable_override_port_is_reported_in_result() {
        let result = resolve_host(&CancellationToken::new(), "localhost@1.1.1.1:abc", TIMEOUT)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_text().contains("failed to resolve DNS server 1.1.1.1:abc"));
    }

    #[tokio::test]
    async fn test_cancelled_lookup_is_reported_in_result() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = resolve_host(&cancel, "localhost", TIMEOUT).await.unwrap();
        assert!(!result.success);
        assert!(result.error_text().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancellation_covers_dns_server_lookup() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = resolve_host(&cancel, "localhost@nonexistent-dns.invalid", TIMEOUT)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.target, "localhost");
        assert!(
            result.error_text().contains("cancelled"),
            "unexpected error: {}",
            result.error_text()
        );
        assert!(!result.error_text().contains("nonexistent-dns.invalid"));
    }

    #[tokio::test]
    async fn test_platform_strategy_without_override() {
        let target = ProbeTarget::parse("localhost");
        let resolver = HostResolver::for_target(&target, TIMEOUT).await.unwrap();
        assert!(matches!(resolver, HostResolver::Platform));

        let target = ProbeTarget::parse("localhost@127.0.0.1:5353");
        let resolver = HostResolver::for_target(&target, TIMEOUT).await.unwrap();
        assert!(matches!(resolver, HostResolver::Override(_)));
    }
}
