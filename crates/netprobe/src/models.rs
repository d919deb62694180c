//! Result and response types shared by the probes and the cross-zone sweep.
//!
//! All types serialize to camelCase JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of a single DNS, HTTP or HTTPS probe.
///
/// `success == false` always carries a non-empty `error`; `success == true`
/// never carries one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_addresses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    pub duration_ms: i64,
}

impl EgressResult {
    /// Successful probe with a human-readable message.
    #[must_use]
    pub fn succeeded(target: impl Into<String>, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            target: target.into(),
            resolved_addresses: None,
            status_code: None,
            duration_ms: millis(elapsed),
        }
    }

    /// Failed probe. An empty error text is replaced so the invariant holds.
    #[must_use]
    pub fn failed(target: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            success: false,
            message: None,
            error: Some(error),
            target: target.into(),
            resolved_addresses: None,
            status_code: None,
            duration_ms: millis(elapsed),
        }
    }

    #[must_use]
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(i32::from(status_code));
        self
    }

    #[must_use]
    pub fn with_resolved_addresses(mut self, addresses: Vec<String>) -> Self {
        self.resolved_addresses = Some(addresses);
        self
    }

    /// Error text, or an empty string on success.
    #[must_use]
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

/// A live, addressable sibling pod found by one discovery call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub name: String,
    pub address: String,
    pub zone: String,
}

/// Peer names discovered in one zone, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerList {
    pub peer_names: Vec<String>,
}

/// Outcome of probing one peer in another zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossZoneTestResult {
    pub peer_name: String,
    pub peer_address: String,
    pub zone: String,
    pub success: bool,
    pub status_code: i32,
    pub duration_ms: i64,
    pub error: String,
}

/// Aggregate counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossZoneSummary {
    pub total_peers: usize,
    pub total_zones: usize,
    pub cross_zone_peers_tested: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
}

/// Full response of a cross-zone sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossZoneResponse {
    pub current_zone: String,
    pub current_instance: String,
    pub discovered_peers: BTreeMap<String, PeerList>,
    pub cross_zone_tests: Vec<CrossZoneTestResult>,
    pub summary: CrossZoneSummary,
}

/// Elapsed time in whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
