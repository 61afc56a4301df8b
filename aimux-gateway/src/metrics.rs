//! # Metrics Hub
//!
//! Gateway-owned collection point for counters and latency histograms.
//! Counters are plain atomics so the request path never takes a lock for
//! them; the latency reservoir sits behind a mutex touched once per
//! request. There is no process-wide collector: the hub lives in the
//! application state and is passed to whoever records.
//!
//! Streaming activity is counted on three distinct axes plus drops:
//! `stream_bytes_total`, `stream_chunks_total`, `stream_flushes_total`,
//! and `backpressure_drops_total`.

use aimux_core::error::ErrorKind;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Latency samples kept for percentile estimates.
const LATENCY_RESERVOIR: usize = 10_000;

#[derive(Default)]
struct ProviderCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    latency_total_ms: AtomicU64,
}

/// Aggregated view served by `GET /metrics` and the WebSocket stream.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub uptime_s: u64,
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub requests_in_flight: u64,
    pub average_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p90_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub error_kinds: HashMap<String, u64>,
    pub provider_stats: HashMap<String, ProviderStats>,
    pub stream_bytes_total: u64,
    pub stream_chunks_total: u64,
    pub stream_flushes_total: u64,
    pub backpressure_drops_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency_ms: f64,
}

/// Lock-light metrics collection shared across the gateway.
pub struct MetricsHub {
    started_at: Instant,
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    requests_in_flight: AtomicU64,
    error_kinds: DashMap<&'static str, AtomicU64>,
    providers: DashMap<String, ProviderCounters>,
    latencies: Mutex<VecDeque<u64>>,
    stream_bytes_total: AtomicU64,
    stream_chunks_total: AtomicU64,
    stream_flushes_total: AtomicU64,
    backpressure_drops_total: AtomicU64,
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsHub {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_in_flight: AtomicU64::new(0),
            error_kinds: DashMap::new(),
            providers: DashMap::new(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_RESERVOIR)),
            stream_bytes_total: AtomicU64::new(0),
            stream_chunks_total: AtomicU64::new(0),
            stream_flushes_total: AtomicU64::new(0),
            backpressure_drops_total: AtomicU64::new(0),
        }
    }

    pub fn request_started(&self) {
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn requests_in_flight(&self) -> u64 {
        self.requests_in_flight.load(Ordering::Relaxed)
    }

    /// Record one completed request.
    pub fn record_request(
        &self,
        provider_id: Option<&str>,
        success: bool,
        latency_ms: u64,
        error_kind: Option<ErrorKind>,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(kind) = error_kind {
            self.error_kinds
                .entry(kind.as_str())
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }

        if let Some(provider_id) = provider_id {
            let counters = self
                .providers
                .entry(provider_id.to_string())
                .or_default();
            counters.requests.fetch_add(1, Ordering::Relaxed);
            if success {
                counters.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            counters
                .latency_total_ms
                .fetch_add(latency_ms, Ordering::Relaxed);
        }

        let mut latencies = self.latencies.lock().expect("latency mutex poisoned");
        if latencies.len() == LATENCY_RESERVOIR {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    /// Record streaming progress for one flush batch.
    pub fn record_stream(&self, bytes: u64, chunks: u64, flushes: u64, drops: u64) {
        self.stream_bytes_total.fetch_add(bytes, Ordering::Relaxed);
        self.stream_chunks_total.fetch_add(chunks, Ordering::Relaxed);
        self.stream_flushes_total
            .fetch_add(flushes, Ordering::Relaxed);
        self.backpressure_drops_total
            .fetch_add(drops, Ordering::Relaxed);
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Build the aggregated view.
    pub fn aggregate(&self) -> AggregatedMetrics {
        let latencies: Vec<u64> = {
            let guard = self.latencies.lock().expect("latency mutex poisoned");
            let mut v: Vec<u64> = guard.iter().copied().collect();
            v.sort_unstable();
            v
        };
        let average = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        let error_kinds = self
            .error_kinds
            .iter()
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .collect();

        let provider_stats = self
            .providers
            .iter()
            .map(|entry| {
                let requests = entry.value().requests.load(Ordering::Relaxed);
                let latency_total = entry.value().latency_total_ms.load(Ordering::Relaxed);
                (
                    entry.key().clone(),
                    ProviderStats {
                        requests,
                        successes: entry.value().successes.load(Ordering::Relaxed),
                        failures: entry.value().failures.load(Ordering::Relaxed),
                        average_latency_ms: if requests == 0 {
                            0.0
                        } else {
                            latency_total as f64 / requests as f64
                        },
                    },
                )
            })
            .collect();

        AggregatedMetrics {
            uptime_s: self.uptime_s(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_in_flight: self.requests_in_flight(),
            average_latency_ms: average,
            p50_latency_ms: percentile(&latencies, 50.0),
            p90_latency_ms: percentile(&latencies, 90.0),
            p95_latency_ms: percentile(&latencies, 95.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            error_kinds,
            provider_stats,
            stream_bytes_total: self.stream_bytes_total.load(Ordering::Relaxed),
            stream_chunks_total: self.stream_chunks_total.load(Ordering::Relaxed),
            stream_flushes_total: self.stream_flushes_total.load(Ordering::Relaxed),
            backpressure_drops_total: self.backpressure_drops_total.load(Ordering::Relaxed),
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counters_accumulate() {
        let hub = MetricsHub::new();
        hub.record_request(Some("a"), true, 100, None);
        hub.record_request(Some("a"), false, 300, Some(ErrorKind::ProviderTransient));
        hub.record_request(Some("b"), true, 50, None);

        let aggregated = hub.aggregate();
        assert_eq!(aggregated.requests_total, 3);
        assert_eq!(aggregated.requests_success, 2);
        assert_eq!(aggregated.requests_failed, 1);
        assert_eq!(aggregated.error_kinds.get("ProviderTransient"), Some(&1));

        let a = aggregated.provider_stats.get("a").unwrap();
        assert_eq!(a.requests, 2);
        assert_eq!(a.failures, 1);
        assert!((a.average_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_track_the_distribution() {
        let hub = MetricsHub::new();
        for latency in 1..=100u64 {
            hub.record_request(None, true, latency, None);
        }
        let aggregated = hub.aggregate();
        assert!(aggregated.p50_latency_ms >= 45 && aggregated.p50_latency_ms <= 55);
        assert!(aggregated.p99_latency_ms >= 98);
    }

    #[test]
    fn stream_counters_are_distinct() {
        let hub = MetricsHub::new();
        hub.record_stream(1_024, 4, 2, 1);
        hub.record_stream(512, 1, 1, 0);

        let aggregated = hub.aggregate();
        assert_eq!(aggregated.stream_bytes_total, 1_536);
        assert_eq!(aggregated.stream_chunks_total, 5);
        assert_eq!(aggregated.stream_flushes_total, 3);
        assert_eq!(aggregated.backpressure_drops_total, 1);
    }

    #[test]
    fn in_flight_gauge_moves_with_request_lifecycle() {
        let hub = MetricsHub::new();
        hub.request_started();
        hub.request_started();
        assert_eq!(hub.requests_in_flight(), 2);
        hub.request_finished();
        assert_eq!(hub.requests_in_flight(), 1);
    }
}
