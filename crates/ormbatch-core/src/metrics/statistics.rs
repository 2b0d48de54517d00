//! Batch execution statistics.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::histogram::Histogram;

/// Receives one sample per batch execution.
pub trait StatisticsSink: Send + Sync {
    /// Record an execution: a label such as `"3 queries"`, the number of
    /// physical rows read and the elapsed wall time.
    fn query_executed(&self, label: &str, rows: usize, elapsed: Duration);
}

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySample {
    /// Execution label.
    pub label: String,
    /// Physical rows read.
    pub rows: usize,
    /// Elapsed wall time.
    pub elapsed: Duration,
}

/// In-process statistics sink with Prometheus text export.
pub struct QueryStatistics {
    started_at: Instant,
    executions: AtomicU64,
    rows: AtomicU64,
    latency: Histogram,
    by_label: RwLock<HashMap<String, u64>>,
    last: Mutex<Option<QuerySample>>,
}

impl QueryStatistics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            executions: AtomicU64::new(0),
            rows: AtomicU64::new(0),
            latency: Histogram::latency(),
            by_label: RwLock::new(HashMap::new()),
            last: Mutex::new(None),
        }
    }

    /// Seconds since the sink was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Number of recorded executions.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Total physical rows read.
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    /// Execution latency histogram (microseconds).
    pub fn latency(&self) -> &Histogram {
        &self.latency
    }

    /// Executions per label.
    pub fn by_label(&self) -> HashMap<String, u64> {
        self.by_label.read().clone()
    }

    /// Most recent sample.
    pub fn last_sample(&self) -> Option<QuerySample> {
        self.last.lock().clone()
    }

    /// Export to Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP ormbatch_batches_total Batch executions");
        let _ = writeln!(out, "# TYPE ormbatch_batches_total counter");
        let _ = writeln!(out, "ormbatch_batches_total {}\n", self.executions());

        let _ = writeln!(out, "# HELP ormbatch_rows_total Physical rows read by batches");
        let _ = writeln!(out, "# TYPE ormbatch_rows_total counter");
        let _ = writeln!(out, "ormbatch_rows_total {}\n", self.rows());

        let _ = writeln!(
            out,
            "# HELP ormbatch_batch_duration_us Batch execution time in microseconds"
        );
        let _ = writeln!(out, "# TYPE ormbatch_batch_duration_us histogram");
        for (bound, count) in self.latency.cumulative() {
            let _ = writeln!(out, "ormbatch_batch_duration_us_bucket{{le=\"{}\"}} {}", bound, count);
        }
        let _ = writeln!(
            out,
            "ormbatch_batch_duration_us_bucket{{le=\"+Inf\"}} {}",
            self.latency.count()
        );
        let _ = writeln!(out, "ormbatch_batch_duration_us_sum {}", self.latency.sum());
        let _ = writeln!(out, "ormbatch_batch_duration_us_count {}\n", self.latency.count());

        let _ = writeln!(out, "# HELP ormbatch_batches_by_size Batch executions per query count");
        let _ = writeln!(out, "# TYPE ormbatch_batches_by_size counter");
        let mut labels: Vec<(String, u64)> = self.by_label().into_iter().collect();
        labels.sort();
        for (label, count) in labels {
            let _ = writeln!(out, "ormbatch_batches_by_size{{label=\"{}\"}} {}", label, count);
        }

        out
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.rows.store(0, Ordering::Relaxed);
        self.latency.reset();
        self.by_label.write().clear();
        *self.last.lock() = None;
    }
}

impl Default for QueryStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsSink for QueryStatistics {
    fn query_executed(&self, label: &str, rows: usize, elapsed: Duration) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows as u64, Ordering::Relaxed);
        self.latency.observe_duration(elapsed);
        *self.by_label.write().entry(label.to_string()).or_insert(0) += 1;
        *self.last.lock() = Some(QuerySample {
            label: label.to_string(),
            rows,
            elapsed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_samples() {
        let stats = QueryStatistics::new();
        stats.query_executed("3 queries", 10, Duration::from_micros(1500));
        stats.query_executed("3 queries", 5, Duration::from_micros(500));
        stats.query_executed("1 queries", 1, Duration::from_micros(100));

        assert_eq!(stats.executions(), 3);
        assert_eq!(stats.rows(), 16);
        assert_eq!(stats.by_label().get("3 queries"), Some(&2));
        assert_eq!(
            stats.last_sample(),
            Some(QuerySample {
                label: "1 queries".into(),
                rows: 1,
                elapsed: Duration::from_micros(100),
            })
        );
        assert_eq!(stats.latency().avg(), 700);
    }

    #[test]
    fn test_prometheus_format() {
        let stats = QueryStatistics::new();
        stats.query_executed("2 queries", 4, Duration::from_micros(50));

        let text = stats.to_prometheus();
        assert!(text.contains("# TYPE ormbatch_batches_total counter"));
        assert!(text.contains("ormbatch_batches_total 1"));
        assert!(text.contains("ormbatch_rows_total 4"));
        assert!(text.contains("ormbatch_batch_duration_us_bucket{le=\"100\"} 1"));
        assert!(text.contains("ormbatch_batches_by_size{label=\"2 queries\"} 1"));
    }

    #[test]
    fn test_reset() {
        let stats = QueryStatistics::new();
        stats.query_executed("1 queries", 1, Duration::from_micros(1));
        stats.reset();
        assert_eq!(stats.executions(), 0);
        assert!(stats.by_label().is_empty());
        assert!(stats.last_sample().is_none());
    }
}
