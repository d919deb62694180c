//! HTTP and HTTPS egress probes.
//!
//! Each probe issues a single GET through a client built for that call only,
//! because a DNS override changes how the client dials. The client and its
//! connection pool are dropped before the probe returns.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dns::OverrideResolver;
use crate::error::ProbeError;
use crate::models::EgressResult;
use crate::target::{with_default_port, ProbeTarget};

/// Upper bound on response bytes read (and discarded) per probe.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// URL scheme used by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain HTTP probe, port 80 unless the target names one.
pub async fn test_http(
    cancel: &CancellationToken,
    target: &str,
    timeout: Duration,
) -> Result<EgressResult, ProbeError> {
    test_connection(cancel, target, Scheme::Http, Scheme::Http.default_port(), false, timeout).await
}

/// HTTPS probe with certificate verification, port 443 by default.
pub async fn test_https(
    cancel: &CancellationToken,
    target: &str,
    timeout: Duration,
) -> Result<EgressResult, ProbeError> {
    test_connection(cancel, target, Scheme::Https, Scheme::Https.default_port(), false, timeout)
        .await
}

/// HTTPS probe that accepts any certificate, port 443 by default.
pub async fn test_https_insecure(
    cancel: &CancellationToken,
    target: &str,
    timeout: Duration,
) -> Result<EgressResult, ProbeError> {
    test_connection(cancel, target, Scheme::Https, Scheme::Https.default_port(), true, timeout)
        .await
}

/// Probe `scheme://target` with a single GET.
///
/// `target` may carry a DNS override (`host:port@dns-server`). A status in
/// `200..300` is a success; anything else, and every transport failure, is
/// a failed result rather than an error. Only an empty target is an error.
pub async fn test_connection(
    cancel: &CancellationToken,
    target: &str,
    scheme: Scheme,
    default_port: u16,
    insecure: bool,
    timeout: Duration,
) -> Result<EgressResult, ProbeError> {
    if target.is_empty() {
        return Err(ProbeError::InvalidArgument(
            "target must not be empty".to_string(),
        ));
    }

    if cancel.is_cancelled() {
        return Ok(EgressResult::failed(
            target,
            "request cancelled: operation cancelled by caller",
            Duration::ZERO,
        ));
    }

    let parsed = ProbeTarget::parse(target);
    let host_port = with_default_port(&parsed.host_port, default_port);

    let start = Instant::now();
    let url = match reqwest::Url::parse(&format!("{scheme}://{host_port}")) {
        Ok(url) => url,
        Err(e) => {
            return Ok(EgressResult::failed(
                host_port,
                format!("failed to create request: {e}"),
                start.elapsed(),
            ));
        }
    };

    // The DNS server named by an override may need a lookup of its own.
    let setup = async {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .danger_accept_invalid_certs(insecure);
        if parsed.has_dns_override() {
            let resolver = OverrideResolver::from_override(&parsed.dns_override, timeout).await?;
            builder = builder.dns_resolver(Arc::new(resolver));
        }
        builder
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", error_chain(&e)))
    };
    let client = tokio::select! {
        biased;
        () = cancel.cancelled() => Err("request cancelled: operation cancelled by caller".to_string()),
        res = tokio::time::timeout(timeout, setup) => match res {
            Ok(client) => client,
            Err(_) => Err(format!(
                "failed to resolve DNS server {}: timed out after {}ms",
                parsed.dns_override,
                timeout.as_millis()
            )),
        },
    };
    let client = match client {
        Ok(client) => client,
        Err(e) => {
            debug!(target = %host_port, error = %e, "Egress client setup failed");
            return Ok(EgressResult::failed(host_port, e, start.elapsed()));
        }
    };

    let sent = tokio::select! {
        biased;
        () = cancel.cancelled() => Err("request cancelled: operation cancelled by caller".to_string()),
        res = client.get(url).send() => res.map_err(|e| error_chain(&e)),
    };
    let elapsed = start.elapsed();

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            debug!(target = %host_port, error = %e, "Egress request failed");
            return Ok(EgressResult::failed(host_port, e, elapsed));
        }
    };

    let status = response.status();
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = drain_body(response) => {}
    }

    debug!(target = %host_port, status = status.as_u16(), "Egress request completed");

    let result = if status.is_success() {
        EgressResult::succeeded(
            host_port.clone(),
            format!("Successfully connected to {host_port}"),
            elapsed,
        )
    } else {
        EgressResult::failed(
            host_port,
            format!("unexpected status code: {}", status.as_u16()),
            elapsed,
        )
    };
    Ok(result.with_status_code(status.as_u16()))
}

/// Read and discard at most [`MAX_BODY_BYTES`] of the body.
async fn drain_body(mut response: reqwest::Response) {
    let mut read = 0;
    while read < MAX_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => read += chunk.len(),
            Ok(None) | Err(_) => break,
        }
    }
}

/// Render an error with its full source chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
