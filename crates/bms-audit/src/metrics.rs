use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

/// Latency rings keep this many recent samples; percentiles are computed
/// over the ring contents only.
pub const RING_CAPACITY: usize = 1000;

/// Counters that must exist (at zero) in every snapshot.
const MANDATORY_COUNTERS: &[&str] = &[
    "api_calls_total",
    "api_calls_success",
    "api_calls_failed",
    "db_queries_total",
    "db_queries_success",
    "db_queries_failed",
    "sync_ops_total",
    "sync_ops_success",
    "sync_ops_failed",
    "webhooks_received",
    "webhooks_processed",
    "jobs_scheduled",
    "jobs_executed",
    "jobs_success",
    "jobs_failed",
];

/// Metric identity: name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MetricKey {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricKey {
    fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: BTreeMap::new(),
        }
    }

    fn with_labels(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

struct Ring {
    samples: VecDeque<f64>,
}

impl Ring {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    fn record(&mut self, v: f64) {
        if self.samples.len() == RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(v);
    }

    /// Ceiling-index percentile over the sorted ring:
    /// `idx = ceil(p/100 * n) - 1`. Pinned by test; do not switch to
    /// nearest-rank.
    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = sorted.len() as f64;
        let idx = ((p / 100.0 * n).ceil() as usize).saturating_sub(1);
        sorted[idx.min(sorted.len() - 1)]
    }
}

struct Inner {
    counters: Mutex<BTreeMap<MetricKey, u64>>,
    gauges: Mutex<BTreeMap<MetricKey, f64>>,
    histograms: Mutex<BTreeMap<MetricKey, Ring>>,
}

/// Process-wide typed metrics registry. Cheap to clone.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut counters = BTreeMap::new();
        for name in MANDATORY_COUNTERS {
            counters.insert(MetricKey::bare(name), 0u64);
        }
        Self {
            inner: Arc::new(Inner {
                counters: Mutex::new(counters),
                gauges: Mutex::new(BTreeMap::new()),
                histograms: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.add_counter(name, labels, 1);
    }

    pub fn add_counter(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = MetricKey::with_labels(name, labels);
        *self.inner.counters.lock().unwrap().entry(key).or_insert(0) += delta;
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::with_labels(name, labels);
        self.inner.gauges.lock().unwrap().insert(key, value);
    }

    /// Record one latency observation, in milliseconds.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value_ms: f64) {
        let key = MetricKey::with_labels(name, labels);
        self.inner
            .histograms
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(Ring::new)
            .record(value_ms);
    }

    // Convenience wrappers for the mandatory families.

    pub fn api_call(&self, success: bool, latency_ms: f64) {
        self.inc_counter("api_calls_total", &[]);
        self.inc_counter(
            if success {
                "api_calls_success"
            } else {
                "api_calls_failed"
            },
            &[],
        );
        self.observe("api_latency", &[], latency_ms);
    }

    pub fn db_query(&self, success: bool, latency_ms: f64) {
        self.inc_counter("db_queries_total", &[]);
        self.inc_counter(
            if success {
                "db_queries_success"
            } else {
                "db_queries_failed"
            },
            &[],
        );
        self.observe("db_latency", &[], latency_ms);
    }

    /// Cancelled runs are recorded but do not count as failures.
    pub fn sync_op(&self, outcome: SyncOutcome) {
        self.inc_counter("sync_ops_total", &[]);
        match outcome {
            SyncOutcome::Success => self.inc_counter("sync_ops_success", &[]),
            SyncOutcome::Failed => self.inc_counter("sync_ops_failed", &[]),
            SyncOutcome::Cancelled => {}
        }
    }

    /// Point-in-time snapshot, including the runtime gauges.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .inner
            .counters
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| CounterSample {
                key: k.clone(),
                value: *v,
            })
            .collect();

        let mut gauges: Vec<GaugeSample> = self
            .inner
            .gauges
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| GaugeSample {
                key: k.clone(),
                value: *v,
            })
            .collect();
        gauges.push(GaugeSample {
            key: MetricKey::bare("memory_used"),
            value: resident_memory_bytes() as f64,
        });
        gauges.push(GaugeSample {
            key: MetricKey::bare("runtime_threads"),
            value: runtime_thread_count() as f64,
        });
        gauges.push(GaugeSample {
            key: MetricKey::bare("uptime_seconds"),
            value: uptime_secs() as f64,
        });

        let histograms = self
            .inner
            .histograms
            .lock()
            .unwrap()
            .iter()
            .map(|(k, ring)| HistogramSample {
                key: k.clone(),
                count: ring.samples.len(),
                p50: ring.percentile(50.0),
                p95: ring.percentile(95.0),
                p99: ring.percentile(99.0),
            })
            .collect();

        MetricsSnapshot {
            timestamp: Utc::now(),
            counters,
            gauges,
            histograms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SyncOutcome {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSample {
    #[serde(flatten)]
    pub key: MetricKey,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GaugeSample {
    #[serde(flatten)]
    pub key: MetricKey,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSample {
    #[serde(flatten)]
    pub key: MetricKey,
    pub count: usize,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub counters: Vec<CounterSample>,
    pub gauges: Vec<GaugeSample>,
    pub histograms: Vec<HistogramSample>,
}

/// Process uptime since first call.
pub fn uptime_secs() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs()
}

/// Resident set size in bytes; 0 when the platform gives no cheap answer.
pub(crate) fn resident_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb * 1024;
                }
            }
        }
    }
    0
}

fn runtime_thread_count() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(entries) = std::fs::read_dir("/proc/self/task") {
            return entries.count();
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_counters_exist_at_zero() {
        let m = MetricsCollector::new();
        let snap = m.snapshot();
        for name in MANDATORY_COUNTERS {
            assert!(
                snap.counters
                    .iter()
                    .any(|c| c.key.name == *name && c.value == 0),
                "missing mandatory counter {name}"
            );
        }
    }

    #[test]
    fn percentiles_use_the_ceiling_index_convention() {
        let m = MetricsCollector::new();
        for v in 1..=100 {
            m.observe("api_latency", &[], v as f64);
        }
        let snap = m.snapshot();
        let h = snap
            .histograms
            .iter()
            .find(|h| h.key.name == "api_latency")
            .unwrap();
        // ceil(0.50*100)-1 = 49 -> 50.0, ceil(0.95*100)-1 = 94 -> 95.0,
        // ceil(0.99*100)-1 = 98 -> 99.0
        assert_eq!(h.p50, 50.0);
        assert_eq!(h.p95, 95.0);
        assert_eq!(h.p99, 99.0);
        assert_eq!(h.count, 100);
    }

    #[test]
    fn ring_keeps_only_the_most_recent_samples() {
        let m = MetricsCollector::new();
        for v in 0..(RING_CAPACITY + 500) {
            m.observe("db_latency", &[], v as f64);
        }
        let snap = m.snapshot();
        let h = snap
            .histograms
            .iter()
            .find(|h| h.key.name == "db_latency")
            .unwrap();
        assert_eq!(h.count, RING_CAPACITY);
        // Oldest 500 samples were evicted, so the minimum is 500.
        assert!(h.p50 >= 500.0);
    }

    #[test]
    fn cancelled_sync_ops_do_not_count_as_failed() {
        let m = MetricsCollector::new();
        m.sync_op(SyncOutcome::Cancelled);
        let snap = m.snapshot();
        let get = |n: &str| {
            snap.counters
                .iter()
                .find(|c| c.key.name == n)
                .map(|c| c.value)
                .unwrap_or_default()
        };
        assert_eq!(get("sync_ops_total"), 1);
        assert_eq!(get("sync_ops_failed"), 0);
        assert_eq!(get("sync_ops_success"), 0);
    }
}
