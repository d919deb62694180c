//! Target parsing and DNS server address normalization.
//!
//! Targets use the form `host[:port][@dns-server[:port]]`. The part before
//! the first `@` is the probe target, everything after it is an optional DNS
//! server that replaces the platform resolver for that one call.

use thiserror::Error;

/// Port appended to a DNS server address that does not name one.
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Structural problems with a `host:port` address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    #[error("address {0}: too many colons in address")]
    TooManyColons(String),

    #[error("address {0}: missing ']' in address")]
    MissingBracket(String),

    #[error("address {0}: unexpected bracket in address")]
    UnexpectedBracket(String),
}

/// A probe target split into its host:port and DNS override parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host_port: String,
    /// Empty when the platform resolver should be used.
    pub dns_override: String,
}

impl ProbeTarget {
    /// Split `raw` at the first `@` only.
    ///
    /// Never fails: anything after the first `@`, further `@` characters
    /// included, becomes the DNS override verbatim.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let (host_port, dns_override) = raw.split_once('@').unwrap_or((raw, ""));
        Self {
            host_port: host_port.to_string(),
            dns_override: dns_override.to_string(),
        }
    }

    #[must_use]
    pub fn has_dns_override(&self) -> bool {
        !self.dns_override.is_empty()
    }
}

/// Split `host:port`, `[ipv6]:port` into host and port.
///
/// Mirrors the usual socket address grammar: bare IPv6 literals must be
/// bracketed when a port is present.
pub fn split_host_port(addr: &str) -> Result<(&str, &str), AddressError> {
    let Some(last_colon) = addr.rfind(':') else {
        return Err(AddressError::MissingPort(addr.to_string()));
    };

    let host = if addr.starts_with('[') {
        let Some(end) = addr.find(']') else {
            return Err(AddressError::MissingBracket(addr.to_string()));
        };
        if end + 1 == addr.len() {
            return Err(AddressError::MissingPort(addr.to_string()));
        }
        if end + 1 != last_colon {
            return if addr.as_bytes()[end + 1] == b':' {
                Err(AddressError::TooManyColons(addr.to_string()))
            } else {
                Err(AddressError::MissingPort(addr.to_string()))
            };
        }
        &addr[1..end]
    } else {
        let host = &addr[..last_colon];
        if host.contains(':') {
            return Err(AddressError::TooManyColons(addr.to_string()));
        }
        host
    };

    if host.contains('[') || host.contains(']') {
        return Err(AddressError::UnexpectedBracket(addr.to_string()));
    }

    Ok((host, &addr[last_colon + 1..]))
}

/// Join a host and port, bracketing hosts that contain a colon.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Append `port` to `host_port` unless it already names one.
#[must_use]
pub fn with_default_port(host_port: &str, port: u16) -> String {
    if split_host_port(host_port).is_ok() {
        host_port.to_string()
    } else if host_port.starts_with('[') && host_port.ends_with(']') {
        format!("{host_port}:{port}")
    } else {
        join_host_port(host_port, port)
    }
}

/// Normalize an optional DNS server address.
///
/// Empty input stays empty. An address without a port gets
/// [`DEFAULT_DNS_PORT`]. Only an address that still does not split into
/// host and port is rejected; the host and port themselves are left for the
/// dial to judge.
pub fn normalize_dns_server(addr: &str) -> Result<String, AddressError> {
    if addr.is_empty() {
        return Ok(String::new());
    }

    let normalized = if split_host_port(addr).is_ok() {
        addr.to_string()
    } else {
        join_host_port(addr, DEFAULT_DNS_PORT)
    };

    split_host_port(&normalized)?;
    Ok(normalized)
}
