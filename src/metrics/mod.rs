pub mod collector;
pub mod percentiles;
pub mod stream;

pub use collector::{ResultsCollector, ResultsSnapshot};

/// A stored run mean, as handed over by the WebSocket or HTTP handler.
#[derive(Debug, Clone)]
pub struct ResultSample {
    pub session_id: String,
    /// Display name at the time of the report
    pub user: String,
    /// Mean RTT of the run in ms
    pub avg_ms: f64,
}
