use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::middleware::key_rotator::KeySelection;
use crate::middleware::retry::RetryObserver;

/// Latency percentiles are computed over this many most recent calls
pub const LATENCY_SAMPLE_LIMIT: usize = 1024;

/// Process-wide metrics collector.
///
/// Tracks upstream calls, key rotation events, the Q&A cache and endpoint
/// traffic. Cheap to clone and safe to share across handlers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // API Metrics
    api_calls_total: AtomicUsize,
    api_calls_success: AtomicUsize,
    api_calls_failed: AtomicUsize,
    api_calls_rate_limited: AtomicUsize,
    api_tokens_input: AtomicU64,
    api_tokens_output: AtomicU64,
    api_latency_ms: RwLock<VecDeque<u64>>,

    // Key rotation
    keys_exhausted: AtomicUsize,
    degraded_selections: AtomicUsize,

    // Q&A cache
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                api_calls_total: AtomicUsize::new(0),
                api_calls_success: AtomicUsize::new(0),
                api_calls_failed: AtomicUsize::new(0),
                api_calls_rate_limited: AtomicUsize::new(0),
                api_tokens_input: AtomicU64::new(0),
                api_tokens_output: AtomicU64::new(0),
                api_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_SAMPLE_LIMIT)),
                keys_exhausted: AtomicUsize::new(0),
                degraded_selections: AtomicUsize::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_api_call(&self, success: bool, duration: Duration, input_tokens: u64, output_tokens: u64) {
        self.inner.api_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.api_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.api_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.api_tokens_input.fetch_add(input_tokens, Ordering::Relaxed);
        self.inner.api_tokens_output.fetch_add(output_tokens, Ordering::Relaxed);

        let mut samples = self.inner.api_latency_ms.write();
        if samples.len() == LATENCY_SAMPLE_LIMIT {
            samples.pop_front();
        }
        samples.push_back(duration.as_millis() as u64);
    }

    pub fn record_rate_limited(&self) {
        self.inner.api_calls_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_exhausted(&self) {
        self.inner.keys_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_selection(&self) {
        self.inner.degraded_selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner.endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Number of latency samples currently retained
    pub fn latency_sample_count(&self) -> usize {
        self.inner.api_latency_ms.read().len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        // Copy out under the lock, sort outside it
        let mut latencies: Vec<u64> = self.inner.api_latency_ms.read().iter().copied().collect();
        latencies.sort_unstable();

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;

        let endpoint_requests = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            api_calls_total: self.inner.api_calls_total.load(Ordering::Relaxed),
            api_calls_success: self.inner.api_calls_success.load(Ordering::Relaxed),
            api_calls_failed: self.inner.api_calls_failed.load(Ordering::Relaxed),
            api_calls_rate_limited: self.inner.api_calls_rate_limited.load(Ordering::Relaxed),
            api_tokens_input: self.inner.api_tokens_input.load(Ordering::Relaxed),
            api_tokens_output: self.inner.api_tokens_output.load(Ordering::Relaxed),
            api_latency_avg_ms: avg(&latencies),
            api_latency_p50_ms: percentile_sorted(&latencies, 0.5),
            api_latency_p95_ms: percentile_sorted(&latencies, 0.95),
            api_latency_p99_ms: percentile_sorted(&latencies, 0.99),
            keys_exhausted: self.inner.keys_exhausted.load(Ordering::Relaxed),
            degraded_selections: self.inner.degraded_selections.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if cache_total > 0 {
                cache_hits as f64 / cache_total as f64
            } else {
                0.0
            },
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();

        let series: [(&str, &str, &str, String); 12] = [
            ("api_calls_total", "counter", "Total number of API calls made", s.api_calls_total.to_string()),
            ("api_calls_success", "counter", "Number of successful API calls", s.api_calls_success.to_string()),
            ("api_calls_failed", "counter", "Number of failed API calls", s.api_calls_failed.to_string()),
            ("api_calls_rate_limited", "counter", "API calls rejected for rate limit or quota", s.api_calls_rate_limited.to_string()),
            ("api_tokens_input_total", "counter", "Total input tokens consumed", s.api_tokens_input.to_string()),
            ("api_tokens_output_total", "counter", "Total output tokens generated", s.api_tokens_output.to_string()),
            ("api_latency_p95_ms", "gauge", "95th percentile API latency over recent calls", s.api_latency_p95_ms.to_string()),
            ("api_keys_exhausted_total", "counter", "Times an API key was taken out of rotation", s.keys_exhausted.to_string()),
            ("api_key_degraded_selections_total", "counter", "Selections made while every key was exhausted", s.degraded_selections.to_string()),
            ("qas_cache_hits_total", "counter", "Q&A cache hits", s.cache_hits.to_string()),
            ("qas_cache_misses_total", "counter", "Q&A cache misses", s.cache_misses.to_string()),
            ("uptime_seconds", "counter", "Application uptime in seconds", s.uptime_seconds.to_string()),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in &series {
            let _ = writeln!(out, "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {{}} {value}\n");
        }

        if !s.endpoint_requests.is_empty() {
            out.push_str("# HELP endpoint_requests_total Requests per endpoint\n");
            out.push_str("# TYPE endpoint_requests_total counter\n");
            for (endpoint, count) in &s.endpoint_requests {
                let _ = writeln!(out, "endpoint_requests_total {{endpoint=\"{endpoint}\"}} {count}");
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryObserver for Metrics {
    fn on_selection(&self, selection: &KeySelection) {
        if selection.degraded {
            self.record_degraded_selection();
        }
    }

    fn on_key_exhausted(&self, _selection: &KeySelection) {
        self.record_key_exhausted();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub api_calls_total: usize,
    pub api_calls_success: usize,
    pub api_calls_failed: usize,
    pub api_calls_rate_limited: usize,
    pub api_tokens_input: u64,
    pub api_tokens_output: u64,
    pub api_latency_avg_ms: u64,
    pub api_latency_p50_ms: u64,
    pub api_latency_p95_ms: u64,
    pub api_latency_p99_ms: u64,
    pub keys_exhausted: usize,
    pub degraded_selections: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub endpoint_requests: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile_sorted(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_api_call(true, Duration::from_millis(100), 500, 200);
        metrics.record_api_call(false, Duration::from_millis(50), 0, 0);
        metrics.record_rate_limited();
        metrics.record_key_exhausted();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_endpoint_request("/api/generate");
        metrics.record_endpoint_request("/api/generate");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.api_calls_total, 2);
        assert_eq!(snapshot.api_calls_success, 1);
        assert_eq!(snapshot.api_calls_failed, 1);
        assert_eq!(snapshot.api_calls_rate_limited, 1);
        assert_eq!(snapshot.api_tokens_input, 500);
        assert_eq!(snapshot.api_tokens_output, 200);
        assert_eq!(snapshot.api_latency_avg_ms, 75);
        assert_eq!(snapshot.api_latency_p50_ms, 50);
        assert_eq!(snapshot.keys_exhausted, 1);
        assert_eq!(snapshot.cache_hit_rate, 0.5);
        assert_eq!(snapshot.endpoint_requests.get("/api/generate"), Some(&2));
    }

    #[test]
    fn test_latency_samples_are_bounded() {
        let metrics = Metrics::new();

        // Old slow calls fall out of the window once enough fast ones arrive
        for _ in 0..10 {
            metrics.record_api_call(true, Duration::from_millis(5_000), 0, 0);
        }
        for _ in 0..LATENCY_SAMPLE_LIMIT + 50 {
            metrics.record_api_call(true, Duration::from_millis(20), 0, 0);
        }

        assert_eq!(metrics.latency_sample_count(), LATENCY_SAMPLE_LIMIT);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.api_calls_total, LATENCY_SAMPLE_LIMIT + 60);
        assert_eq!(snapshot.api_latency_p99_ms, 20);
        assert_eq!(snapshot.api_latency_avg_ms, 20);
    }

    #[test]
    fn test_observer_counts_degraded_selections() {
        let metrics = Metrics::new();
        let selection = KeySelection {
            key: "k".to_string(),
            index: 0,
            degraded: true,
        };

        metrics.on_selection(&selection);
        metrics.on_selection(&KeySelection {
            degraded: false,
            ..selection.clone()
        });
        metrics.on_key_exhausted(&selection);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.degraded_selections, 1);
        assert_eq!(snapshot.keys_exhausted, 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_api_call(true, Duration::from_millis(100), 500, 200);
        metrics.record_endpoint_request("/health");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("# TYPE api_calls_total counter\napi_calls_total {} 1"));
        assert!(prometheus.contains("api_tokens_input_total {} 500"));
        assert!(prometheus.contains("endpoint_requests_total {endpoint=\"/health\"} 1"));
    }
}
