//! Lock-free fixed-bucket histogram for batch latencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (microseconds) of the default latency buckets:
/// 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s, 5s.
pub const DEFAULT_LATENCY_BOUNDS_US: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

/// Fixed-bucket histogram.
///
/// Each bucket counts observations up to and including its bound; values
/// beyond the last bound land in an overflow slot.
pub struct Histogram {
    bounds: Vec<u64>,
    buckets: Vec<AtomicU64>,
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Histogram with the default latency buckets.
    pub fn latency() -> Self {
        Self::with_bounds(DEFAULT_LATENCY_BOUNDS_US.to_vec())
    }

    /// Histogram with custom bucket bounds. Bounds are sorted and deduplicated.
    pub fn with_bounds(mut bounds: Vec<u64>) -> Self {
        bounds.sort_unstable();
        bounds.dedup();
        let buckets = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record a value in microseconds.
    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);

        let slot = self.bounds.partition_point(|&bound| bound < value_us);
        match self.buckets.get(slot) {
            Some(bucket) => bucket.fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record an elapsed duration.
    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Largest observation.
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Mean observation.
    pub fn avg(&self) -> u64 {
        match self.count() {
            0 => 0,
            n => self.sum() / n,
        }
    }

    /// Approximate percentile (`0.5` for the median).
    ///
    /// Returns the bound of the bucket holding the target rank, or the
    /// maximum observation when the rank falls into the overflow slot.
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * p.clamp(0.0, 1.0)).ceil().max(1.0) as u64;

        let mut seen = 0u64;
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return *bound;
            }
        }
        self.max()
    }

    /// Median.
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    /// 99th percentile.
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    /// Cumulative `(bound, count)` pairs, Prometheus style.
    pub fn cumulative(&self) -> Vec<(u64, u64)> {
        let mut running = 0;
        self.bounds
            .iter()
            .zip(&self.buckets)
            .map(|(bound, bucket)| {
                running += bucket.load(Ordering::Relaxed);
                (*bound, running)
            })
            .collect()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.overflow.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries_are_inclusive() {
        let hist = Histogram::with_bounds(vec![10, 100]);
        hist.observe(10);
        hist.observe(11);
        hist.observe(100);
        hist.observe(1000);

        assert_eq!(hist.cumulative(), vec![(10, 1), (100, 3)]);
        assert_eq!(hist.count(), 4);
        assert_eq!(hist.max(), 1000);
    }

    #[test]
    fn test_avg_and_sum() {
        let hist = Histogram::latency();
        hist.observe(100);
        hist.observe(200);
        hist.observe(300);
        assert_eq!(hist.sum(), 600);
        assert_eq!(hist.avg(), 200);
    }

    #[test]
    fn test_percentiles() {
        let hist = Histogram::latency();
        for _ in 0..100 {
            hist.observe(50);
        }
        for _ in 0..100 {
            hist.observe(800);
        }
        assert_eq!(hist.p50(), 100);
        assert_eq!(hist.p99(), 1_000);
    }

    #[test]
    fn test_percentile_in_overflow_reports_max() {
        let hist = Histogram::with_bounds(vec![10]);
        hist.observe(5);
        hist.observe(70);
        assert_eq!(hist.percentile(1.0), 70);
    }

    #[test]
    fn test_empty_and_reset() {
        let hist = Histogram::latency();
        assert_eq!(hist.p50(), 0);
        assert_eq!(hist.avg(), 0);

        hist.observe_duration(Duration::from_millis(2));
        assert_eq!(hist.sum(), 2_000);
        hist.reset();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.max(), 0);
    }
}
