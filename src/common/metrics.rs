//! Prometheus-compatible metrics for the naming service
//!
//! Tracks routed client traffic, node health transitions, probe latencies and
//! replication outcomes. Rendered as text at `/metrics`.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bucket boundaries for latency histograms (milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Cumulative histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(le, count)` pairs, ending with `+Inf`
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        let sep = if labels.is_empty() { "" } else { "," };
        for (le, count) in self.get_buckets() {
            let le = if le.is_infinite() {
                "+Inf".to_string()
            } else {
                le.to_string()
            };
            let _ = writeln!(
                out,
                "{}_bucket{{{}{}le=\"{}\"}} {}",
                name, labels, sep, le, count
            );
        }
        let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, self.sum());
        let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, self.count());
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Request counters for one HTTP route
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<HashMap<String, Arc<EndpointMetrics>>>,

    // Routed client traffic
    pub uploads_routed: Counter,
    pub downloads_routed: Counter,
    pub deletes_total: Counter,
    pub bytes_proxied: Counter,

    // Node health
    pub nodes_up: Gauge,
    pub nodes_total: Gauge,
    pub status_transitions: Counter,
    pub monitor_cycles: Counter,
    pub probe_latency: Histogram,

    // Replication
    pub replications_enqueued: Counter,
    pub replications_completed: Counter,
    pub replications_failed: Counter,
    pub recovery_passes: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            uploads_routed: Counter::new(),
            downloads_routed: Counter::new(),
            deletes_total: Counter::new(),
            bytes_proxied: Counter::new(),
            nodes_up: Gauge::new(),
            nodes_total: Gauge::new(),
            status_transitions: Counter::new(),
            monitor_cycles: Counter::new(),
            probe_latency: Histogram::new(),
            replications_enqueued: Counter::new(),
            replications_completed: Counter::new(),
            replications_failed: Counter::new(),
            recovery_passes: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a route
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        endpoints
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Record one HTTP request
    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render everything in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 10] = [
            ("minidfs_uploads_routed_total", "Uploads routed to a storage node", &self.uploads_routed),
            ("minidfs_downloads_routed_total", "Downloads routed to a storage node", &self.downloads_routed),
            ("minidfs_deletes_total", "File delete requests", &self.deletes_total),
            ("minidfs_bytes_proxied_total", "Bytes proxied to or from storage nodes", &self.bytes_proxied),
            ("minidfs_node_status_transitions_total", "Node UP/DOWN transitions", &self.status_transitions),
            ("minidfs_monitor_cycles_total", "Health monitor cycles run", &self.monitor_cycles),
            ("minidfs_replications_enqueued_total", "Replication items enqueued", &self.replications_enqueued),
            ("minidfs_replications_completed_total", "Replication items completed", &self.replications_completed),
            ("minidfs_replications_failed_total", "Replication items failed", &self.replications_failed),
            ("minidfs_recovery_passes_total", "Recovery passes run", &self.recovery_passes),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        for (name, help, gauge) in [
            ("minidfs_nodes_up", "Storage nodes currently UP", &self.nodes_up),
            ("minidfs_nodes_total", "Storage nodes registered", &self.nodes_total),
        ] {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, gauge.get());
        }

        out.push_str("# HELP minidfs_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE minidfs_uptime_seconds gauge\n");
        let _ = writeln!(out, "minidfs_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP minidfs_probe_latency_ms Storage node health probe latency\n");
        out.push_str("# TYPE minidfs_probe_latency_ms histogram\n");
        self.probe_latency
            .render(&mut out, "minidfs_probe_latency_ms", "");

        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        out.push_str("# HELP minidfs_http_requests_total Requests per route\n");
        out.push_str("# TYPE minidfs_http_requests_total counter\n");
        for (path, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "minidfs_http_requests_total{{path=\"{}\"}} {}",
                path,
                m.requests_total.get()
            );
        }
        out.push_str("# HELP minidfs_http_errors_total Error responses per route\n");
        out.push_str("# TYPE minidfs_http_errors_total counter\n");
        for (path, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "minidfs_http_errors_total{{path=\"{}\"}} {}",
                path,
                m.requests_error.get()
            );
        }
        out.push_str("# HELP minidfs_http_request_duration_ms Request duration\n");
        out.push_str("# TYPE minidfs_http_request_duration_ms histogram\n");
        for (path, m) in endpoints.iter() {
            m.latency.render(
                &mut out,
                "minidfs_http_request_duration_ms",
                &format!("path=\"{}\"", path),
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
