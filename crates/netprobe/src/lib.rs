//! On-demand network diagnostics for a running service instance.
//!
//! This crate answers two questions in real time, without external tooling:
//! - can this instance reach DNS, the internet, or a specific host?
//! - can this instance's availability zone reach the other zones?
//!
//! # Operations
//!
//! - [`DiagnosticsService::resolve_host`]: DNS lookup through the platform
//!   resolver or a caller-supplied name server (`host@dns-server`)
//! - [`DiagnosticsService::test_http`], [`DiagnosticsService::test_https`],
//!   [`DiagnosticsService::test_https_insecure`]: single GET egress checks
//! - [`DiagnosticsService::cross_zone_sweep`]: discovers sibling pods through
//!   the Kubernetes API and probes every one that lives in another zone
//!
//! Probe failures are never returned as errors. They are reported inside the
//! per-target [`EgressResult`] or [`CrossZoneTestResult`] so one unreachable
//! peer never hides the results for the rest of a sweep. Only missing input,
//! disabled features and infrastructure failures surface as [`ProbeError`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod crosszone;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod http;
pub mod metrics;
pub mod models;
pub mod server;
pub mod service;
pub mod target;

pub use config::Config;
pub use discovery::{ClusterApi, DiscoveryClient, KubeClusterApi};
pub use error::{DiscoveryError, ProbeError};
pub use metrics::{OtelMetrics, ProbeMetrics};
pub use models::{
    CrossZoneResponse, CrossZoneSummary, CrossZoneTestResult, EgressResult, PeerInfo, PeerList,
};
pub use service::DiagnosticsService;
