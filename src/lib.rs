//! Round-trip latency lab.
//!
//! A prober sends timestamped `ping` frames over a WebSocket, the server
//! echoes them back, and after five samples the prober reports the mean,
//! which the server stores against the connection's session.

pub mod client;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod prober;
pub mod protocol;
pub mod registry;
pub mod server;

use std::sync::Arc;

use config::ServerConfig;
use metrics::ResultsCollector;
use registry::SessionRegistry;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Session id → display name and latest result.
    pub registry: SessionRegistry,

    /// Aggregates of every stored result, read by the dashboard feed.
    pub metrics: ResultsCollector,

    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            metrics: ResultsCollector::new(),
            config,
        })
    }
}
