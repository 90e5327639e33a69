// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for spawn and store operations.
//!
//! Lightweight in-process collection: per-operation latency histograms and
//! spawn outcome counters. Suitable for a CLI where a full observability
//! stack is overkill.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// How a spawn attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Passed admission and registered a session.
    Admitted,
    /// Refused by validation, hierarchy, or an admission limit.
    Rejected,
    /// Admitted but provisioning or launch failed.
    Failed,
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    operations: RwLock<HashMap<String, OperationMetrics>>,
    spawns: SpawnCounters,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            spawns: SpawnCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.write_ops();
        let metrics = ops.entry(name.to_string()).or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Count a spawn outcome.
    pub fn record_spawn(&self, outcome: SpawnOutcome) {
        let counter = match outcome {
            SpawnOutcome::Admitted => &self.spawns.admitted,
            SpawnOutcome::Rejected => &self.spawns.rejected,
            SpawnOutcome::Failed => &self.spawns.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.read_ops().get(name).cloned()
    }

    /// (admitted, rejected, failed)
    pub fn spawn_counts(&self) -> (u64, u64, u64) {
        (
            self.spawns.admitted.load(Ordering::Relaxed),
            self.spawns.rejected.load(Ordering::Relaxed),
            self.spawns.failed.load(Ordering::Relaxed),
        )
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (admitted, rejected, failed) = self.spawn_counts();
        MetricsSnapshot {
            operations: self.read_ops().clone(),
            spawns_admitted: admitted,
            spawns_rejected: rejected,
            spawns_failed: failed,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.write_ops().clear();
        self.spawns.admitted.store(0, Ordering::Relaxed);
        self.spawns.rejected.store(0, Ordering::Relaxed);
        self.spawns.failed.store(0, Ordering::Relaxed);
    }

    // A panic while holding the lock leaves plain counters behind, still usable
    fn read_ops(&self) -> RwLockReadGuard<'_, HashMap<String, OperationMetrics>> {
        self.operations.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_ops(&self) -> RwLockWriteGuard<'_, HashMap<String, OperationMetrics>> {
        self.operations.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct SpawnCounters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket histogram for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,
    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile as the upper bound of the bucket it falls in.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = match self.buckets.get(i) {
                    Some(&bound) => bound,
                    None => self.buckets.last().copied().unwrap_or(0) * 10,
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Spawns include multi-second sleeps; buckets reach a minute
        Self::with_buckets(vec![
            1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000,
        ])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationMetrics>,
    pub spawns_admitted: u64,
    pub spawns_rejected: u64,
    pub spawns_failed: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Spawns: {} admitted, {} rejected, {} failed\n\n",
            self.spawns_admitted, self.spawns_rejected, self.spawns_failed
        ));

        if !self.operations.is_empty() {
            report.push_str("Operation Metrics:\n");
            let mut names: Vec<&String> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_metrics() {
        let mut metrics = OperationMetrics::new();
        metrics.record(Duration::from_millis(10));
        metrics.record(Duration::from_millis(20));
        metrics.record(Duration::from_millis(30));

        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(20));
        assert_eq!(metrics.min_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_histogram_buckets() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_micros(500));
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_secs(3));
        hist.record(Duration::from_secs(120));

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[1], 1);
        assert_eq!(hist.counts()[4], 1);
        assert_eq!(hist.counts()[6], 1);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_millis(50));
        }
        assert_eq!(hist.p50(), Duration::from_millis(100));
        assert_eq!(hist.p99(), Duration::from_millis(100));
        assert_eq!(Histogram::default().p50(), Duration::ZERO);
    }

    #[test]
    fn test_spawn_counters_and_reset() {
        let metrics = Metrics::new();
        metrics.record_spawn(SpawnOutcome::Admitted);
        metrics.record_spawn(SpawnOutcome::Admitted);
        metrics.record_spawn(SpawnOutcome::Rejected);
        metrics.record_operation("spawn.total", Duration::from_millis(5));

        assert_eq!(metrics.spawn_counts(), (2, 1, 0));
        let report = metrics.snapshot().format_report();
        assert!(report.contains("2 admitted, 1 rejected, 0 failed"));
        assert!(report.contains("spawn.total"));

        metrics.reset();
        assert_eq!(metrics.spawn_counts(), (0, 0, 0));
        assert!(metrics.operation_metrics("spawn.total").is_none());
    }
}
