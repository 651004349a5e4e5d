use hdrhistogram::Histogram;
use serde::Serialize;

/// Percentile breakdown of reported run means, in milliseconds.
/// The histogram underneath records microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: u64,
}

impl LatencySummary {
    /// Zeroed summary for an empty histogram.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min_ms: us_to_ms(hist.min()),
            max_ms: us_to_ms(hist.max()),
            mean_ms: hist.mean() / 1_000.0,
            p50_ms: us_to_ms(hist.value_at_quantile(0.50)),
            p95_ms: us_to_ms(hist.value_at_quantile(0.95)),
            p99_ms: us_to_ms(hist.value_at_quantile(0.99)),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1_000.0
}
