//! Metrics emitted by discovery, cross-zone probes and the HTTP surface.
//!
//! The sink is a trait so the orchestrator can be exercised against a
//! recording double. [`OtelMetrics`] records through the `opentelemetry`
//! global meter, which is a no-op until the binary installs a provider.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    KeyValue,
};
use std::time::Duration;

const METER_NAME: &str = "netprobe";

/// Observations made during a cross-zone sweep.
pub trait ProbeMetrics: Send + Sync {
    /// Number of discovered peers in `zone` (gauge).
    fn record_peers_discovered(&self, zone: &str, count: u64);

    /// One cross-zone probe outcome (counter).
    fn record_cross_zone_test(&self, source_zone: &str, destination_zone: &str, success: bool);

    /// Latency of one probe keyed by both endpoints (histogram).
    ///
    /// The label set grows with the square of the fleet size.
    fn record_cross_zone_duration(
        &self,
        source_zone: &str,
        source_instance: &str,
        destination_zone: &str,
        destination_instance: &str,
        duration_ms: f64,
    );
}

/// OpenTelemetry-backed [`ProbeMetrics`].
pub struct OtelMetrics {
    peers_discovered: Gauge<u64>,
    tests_total: Counter<u64>,
    test_duration: Histogram<f64>,
    per_peer_durations: bool,
}

impl OtelMetrics {
    /// `per_peer_durations` enables the per-peer-pair latency histogram.
    #[must_use]
    pub fn new(per_peer_durations: bool) -> Self {
        let meter = global::meter(METER_NAME);

        let peers_discovered = meter
            .u64_gauge("netprobe_crosszone_peers_discovered")
            .with_description("Number of peers discovered per availability zone")
            .build();

        let tests_total = meter
            .u64_counter("netprobe_crosszone_tests_total")
            .with_description("Cross-zone connectivity tests by source zone, destination zone and result")
            .build();

        let test_duration = meter
            .f64_histogram("netprobe_crosszone_test_duration_ms")
            .with_description("Cross-zone connectivity test duration in milliseconds")
            .build();

        Self {
            peers_discovered,
            tests_total,
            test_duration,
            per_peer_durations,
        }
    }
}

impl ProbeMetrics for OtelMetrics {
    fn record_peers_discovered(&self, zone: &str, count: u64) {
        self.peers_discovered
            .record(count, &[KeyValue::new("zone", zone.to_string())]);
    }

    fn record_cross_zone_test(&self, source_zone: &str, destination_zone: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.tests_total.add(
            1,
            &[
                KeyValue::new("source_zone", source_zone.to_string()),
                KeyValue::new("destination_zone", destination_zone.to_string()),
                KeyValue::new("result", result),
            ],
        );
    }

    fn record_cross_zone_duration(
        &self,
        source_zone: &str,
        source_instance: &str,
        destination_zone: &str,
        destination_instance: &str,
        duration_ms: f64,
    ) {
        if !self.per_peer_durations {
            return;
        }
        self.test_duration.record(
            duration_ms,
            &[
                KeyValue::new("source_zone", source_zone.to_string()),
                KeyValue::new("source_instance", source_instance.to_string()),
                KeyValue::new("destination_zone", destination_zone.to_string()),
                KeyValue::new("destination_instance", destination_instance.to_string()),
            ],
        );
    }
}

/// Request metrics for the HTTP surface.
#[derive(Debug)]
pub struct HttpMetrics {
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
}

impl HttpMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);

        let requests_total = meter
            .u64_counter("netprobe_http_requests_total")
            .with_description("Total number of HTTP requests")
            .build();

        let request_duration = meter
            .f64_histogram("netprobe_http_request_duration_seconds")
            .with_description("HTTP request latency distributions")
            .build();

        Self {
            requests_total,
            request_duration,
        }
    }

    /// `route` must be a route template, never a raw path.
    pub fn record(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new("method", method.to_string()),
                KeyValue::new("route", route.to_string()),
                KeyValue::new("status", status.to_string()),
            ],
        );
        self.request_duration.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("method", method.to_string()),
                KeyValue::new("route", route.to_string()),
            ],
        );
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otel_metrics_record_without_provider() {
        let metrics = OtelMetrics::new(true);
        metrics.record_peers_discovered("us-east-1a", 3);
        metrics.record_cross_zone_test("us-east-1a", "us-east-1b", true);
        metrics.record_cross_zone_duration("us-east-1a", "pod-1", "us-east-1b", "pod-2", 4.0);
    }

    #[test]
    fn test_http_metrics_record_without_provider() {
        HttpMetrics::default().record("GET", "/crosszone", 200, Duration::from_millis(5));
    }
}
