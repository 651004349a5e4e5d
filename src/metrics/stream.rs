use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::warn;

use super::collector::ResultsSnapshot;
use crate::AppState;

/// Dashboard refresh period
const STREAM_INTERVAL: Duration = Duration::from_millis(500);

// ─── GET /api/metrics ────────────────────────────────────────────
// Single JSON snapshot, handy for curl.

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<ResultsSnapshot> {
    Json(state.metrics.snapshot())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
// Server-Sent Events: a full `ResultsSnapshot` every 500 ms.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(STREAM_INTERVAL);

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.metrics.snapshot();
        let event = Event::default()
            .json_data(&snapshot)
            .unwrap_or_else(|e| {
                warn!("could not encode metrics snapshot: {e}");
                Event::default().comment("encode error")
            });
        Ok(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
