use std::collections::VecDeque;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::LatencySummary;
use super::ResultSample;

// ─── Configuration ───────────────────────────────────────────────

/// How many individual results we keep for the live feed
const MAX_RECENT_RESULTS: usize = 200;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

/// Distribution bucket boundaries (ms). Covers loopback through
/// intercontinental round trips.
const DIST_BOUNDARIES_MS: &[u64] = &[1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000];

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe aggregate of everything the server has observed.
/// Handlers call the `record_*` methods, the dashboard reads `snapshot()`.
pub struct ResultsCollector {
    inner: Mutex<Inner>,
    /// Wall-clock anchor for uptime and feed timestamps
    started: Instant,
}

/// One entry in the live results feed.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    /// ms since the collector started
    pub timestamp_ms: u64,
    pub session_id: String,
    pub user: String,
    pub avg_ms: f64,
}

/// A bucket in the distribution of reported means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistBucket {
    pub range_start_ms: u64,
    pub range_end_ms: u64,
    pub count: u64,
}

/// Snapshot served by `/api/metrics` and pushed over SSE.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSnapshot {
    pub results: LatencySummary,

    pub total_results: u64,
    pub total_rejected: u64,
    pub total_pings: u64,
    pub open_connections: u64,
    pub uptime_secs: f64,

    pub recent_results: Vec<ResultRecord>,
    pub distribution: Vec<DistBucket>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    hist: Histogram<u64>,

    total_results: u64,
    total_rejected: u64,
    total_pings: u64,
    open_connections: u64,

    recent_results: VecDeque<ResultRecord>,
}

// ─── ResultsCollector impl ───────────────────────────────────────

impl ResultsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            started: Instant::now(),
        }
    }

    /// Record a run mean that the registry accepted.
    pub fn record_result(&self, sample: ResultSample) {
        self.inner.lock().record_result(sample, self.started);
    }

    /// A report the registry refused.
    pub fn record_rejected(&self) {
        self.inner.lock().total_rejected += 1;
    }

    /// One echoed probe.
    pub fn record_ping(&self) {
        self.inner.lock().total_pings += 1;
    }

    pub fn connection_opened(&self) {
        self.inner.lock().open_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut inner = self.inner.lock();
        inner.open_connections = inner.open_connections.saturating_sub(1);
    }

    /// Produce a read-only snapshot for the dashboard.
    pub fn snapshot(&self) -> ResultsSnapshot {
        self.inner.lock().snapshot(self.started)
    }
}

impl Default for ResultsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("static histogram bounds are valid"),
            total_results: 0,
            total_rejected: 0,
            total_pings: 0,
            open_connections: 0,
            recent_results: VecDeque::with_capacity(MAX_RECENT_RESULTS + 1),
        }
    }

    fn record_result(&mut self, sample: ResultSample, started: Instant) {
        self.total_results += 1;

        // Clamp into the histogram range (≥ 1 μs, ≤ 60 s)
        let us = (sample.avg_ms * 1_000.0).round() as u64;
        let _ = self.hist.record(us.clamp(HIST_LOW, HIST_HIGH));

        self.recent_results.push_back(ResultRecord {
            timestamp_ms: started.elapsed().as_millis() as u64,
            session_id: sample.session_id,
            user: sample.user,
            avg_ms: sample.avg_ms,
        });
        if self.recent_results.len() > MAX_RECENT_RESULTS {
            self.recent_results.pop_front();
        }
    }

    fn snapshot(&self, started: Instant) -> ResultsSnapshot {
        ResultsSnapshot {
            results: LatencySummary::from_histogram(&self.hist),
            total_results: self.total_results,
            total_rejected: self.total_rejected,
            total_pings: self.total_pings,
            open_connections: self.open_connections,
            uptime_secs: started.elapsed().as_secs_f64(),
            recent_results: self.recent_results.iter().cloned().collect(),
            distribution: compute_distribution(&self.hist),
        }
    }
}

fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
    if hist.len() == 0 {
        return Vec::new();
    }

    let bounds = DIST_BOUNDARIES_MS;
    let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

    for iv in hist.iter_recorded() {
        let ms = iv.value_iterated_to() / 1_000;
        // First boundary >= value; past the end means overflow
        let idx = match bounds.binary_search(&ms) {
            Ok(i) | Err(i) => i,
        };
        counts[idx] += iv.count_at_value();
    }

    let mut result = Vec::with_capacity(counts.len());
    let mut prev = 0u64;
    for (&boundary, &count) in bounds.iter().zip(&counts) {
        if count > 0 {
            result.push(DistBucket {
                range_start_ms: prev,
                range_end_ms: boundary,
                count,
            });
        }
        prev = boundary;
    }
    if let Some(&overflow) = counts.last().filter(|&&c| c > 0) {
        result.push(DistBucket {
            range_start_ms: prev,
            range_end_ms: hist.max() / 1_000,
            count: overflow,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(avg_ms: f64) -> ResultSample {
        ResultSample {
            session_id: "s1".into(),
            user: "anonymous1".into(),
            avg_ms,
        }
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let collector = ResultsCollector::new();
        let snap = collector.snapshot();

        assert!(!snap.results.has_data());
        assert_eq!(snap.total_results, 0);
        assert!(snap.distribution.is_empty());
        assert!(snap.recent_results.is_empty());
    }

    #[test]
    fn results_feed_summary_and_distribution() {
        let collector = ResultsCollector::new();
        collector.record_result(sample(20.0));
        collector.record_result(sample(20.0));
        collector.record_result(sample(3.0));

        let snap = collector.snapshot();
        assert_eq!(snap.total_results, 3);
        assert_eq!(snap.results.count, 3);
        assert!((snap.results.max_ms - 20.0).abs() < 0.1);
        assert!((snap.results.min_ms - 3.0).abs() < 0.1);
        assert_eq!(
            snap.distribution,
            vec![
                DistBucket {
                    range_start_ms: 2,
                    range_end_ms: 5,
                    count: 1
                },
                DistBucket {
                    range_start_ms: 10,
                    range_end_ms: 20,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn recent_feed_is_bounded() {
        let collector = ResultsCollector::new();
        for i in 0..(MAX_RECENT_RESULTS + 10) {
            collector.record_result(sample(i as f64));
        }

        let snap = collector.snapshot();
        assert_eq!(snap.recent_results.len(), MAX_RECENT_RESULTS);
        assert_eq!(snap.recent_results[0].avg_ms, 10.0);
    }

    #[test]
    fn connection_counter_never_underflows() {
        let collector = ResultsCollector::new();

        collector.connection_opened();
        collector.connection_closed();
        collector.connection_closed();

        assert_eq!(collector.snapshot().open_connections, 0);
    }
}
