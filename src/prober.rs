//! Client-side RTT sampling.
//!
//! A [`Prober`] owns one connection's worth of state: the id counter and the
//! correlation table that routes echoes to the run that sent the probe.
//! Each [`Prober::measure`] call is one run of [`SAMPLES_PER_RUN`] strictly
//! serialized probe/echo exchanges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{self, ClientMessage, Probe, ResultReport};

// ─── Configuration ───────────────────────────────────────────────

/// Samples collected before a run reports its mean
pub const SAMPLES_PER_RUN: usize = 5;

/// Owner id handed to the first run on a connection
pub const FIRST_PING_ID: u64 = 10;

/// Default upper bound on a single echo wait
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Seams ───────────────────────────────────────────────────────

/// Outbound half of the connection.
#[async_trait]
pub trait ProbeSink: Send + Sync {
    async fn send(&self, msg: &ClientMessage) -> Result<(), ProbeError>;
}

/// Wall clock in ms since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        protocol::now_ms()
    }
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no echo for ping {ping_id} (sample {sample}) within {timeout:?}")]
    Timeout {
        ping_id: u64,
        sample: usize,
        timeout: Duration,
    },

    #[error("connection closed before run {0} completed")]
    ChannelClosed(u64),

    #[error("echo for ping {ping_id} carries an unusable timestamp {timestamp}")]
    MalformedEcho { ping_id: u64, timestamp: i64 },
}

// ─── Correlation table ───────────────────────────────────────────

/// Routes inbound echoes to the run that owns their `ping_id`.
///
/// Runs hold a [`Subscription`]; dropping it removes the route, so a
/// finished or abandoned run never receives another echo.
#[derive(Default)]
pub struct Correlator {
    routes: Mutex<HashMap<u64, mpsc::UnboundedSender<Probe>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>, ping_id: u64) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(ping_id, tx);
        Subscription {
            ping_id,
            rx,
            owner: Arc::clone(self),
        }
    }

    /// Hands `echo` to its run. Returns false if nobody was waiting for it.
    pub fn dispatch(&self, echo: Probe) -> bool {
        let Some(ping_id) = echo.ping_id else {
            debug!(timestamp = echo.timestamp, "dropping echo without ping_id");
            return false;
        };

        let routes = self.routes.lock();
        match routes.get(&ping_id) {
            Some(tx) => tx.send(echo).is_ok(),
            None => {
                debug!(ping_id, "dropping echo for unknown run");
                false
            }
        }
    }

    /// Closes every route; pending runs fail with `ChannelClosed`.
    pub fn close_all(&self) {
        self.routes.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.routes.lock().len()
    }
}

/// A run's private echo inbox.
pub struct Subscription {
    ping_id: u64,
    rx: mpsc::UnboundedReceiver<Probe>,
    owner: Arc<Correlator>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Probe> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.owner.routes.lock().remove(&self.ping_id);
    }
}

// ─── Report ──────────────────────────────────────────────────────

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub ping_id: u64,
    /// Per-probe RTT in ms, in send order
    pub samples: Vec<i64>,
    pub mean_ms: f64,
}

impl ProbeReport {
    fn from_samples(ping_id: u64, samples: Vec<i64>) -> Self {
        // Summed as f64 so extreme samples cannot overflow
        let sum: f64 = samples.iter().map(|&s| s as f64).sum();
        let mean_ms = sum / samples.len() as f64;
        Self {
            ping_id,
            samples,
            mean_ms,
        }
    }

    /// Text for the status surface.
    pub fn status_line(&self) -> String {
        format!("Test average: {}ms.", self.mean_ms)
    }
}

// ─── Prober ──────────────────────────────────────────────────────

pub struct Prober {
    sink: Arc<dyn ProbeSink>,
    clock: Arc<dyn Clock>,
    correlator: Arc<Correlator>,
    next_id: AtomicU64,
    echo_timeout: Duration,
}

impl Prober {
    pub fn new(sink: Arc<dyn ProbeSink>, correlator: Arc<Correlator>) -> Self {
        Self {
            sink,
            clock: Arc::new(SystemClock),
            correlator,
            next_id: AtomicU64::new(FIRST_PING_ID),
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Runs one measurement and reports its mean upstream.
    ///
    /// Safe to call concurrently: each call gets its own `ping_id` and
    /// echo subscription.
    pub async fn measure(&self) -> Result<ProbeReport, ProbeError> {
        let ping_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inbox = self.correlator.subscribe(ping_id);
        let mut samples = Vec::with_capacity(SAMPLES_PER_RUN);

        for sample in 0..SAMPLES_PER_RUN {
            let probe = Probe {
                timestamp: self.clock.now_ms(),
                ping_id: Some(ping_id),
            };
            self.sink.send(&ClientMessage::Ping(probe)).await?;

            let echo = tokio::time::timeout(self.echo_timeout, inbox.recv())
                .await
                .map_err(|_| ProbeError::Timeout {
                    ping_id,
                    sample,
                    timeout: self.echo_timeout,
                })?
                .ok_or(ProbeError::ChannelClosed(ping_id))?;

            let rtt = self
                .clock
                .now_ms()
                .checked_sub(echo.timestamp)
                .ok_or(ProbeError::MalformedEcho {
                    ping_id,
                    timestamp: echo.timestamp,
                })?;
            if rtt < 0 {
                warn!(ping_id, rtt, "negative RTT, clocks are skewed");
            }
            samples.push(rtt);
        }
        drop(inbox);

        let report = ProbeReport::from_samples(ping_id, samples);
        info!(ping_id, samples = ?report.samples, avg = report.mean_ms, "run complete");

        self.sink
            .send(&ClientMessage::LogResults(ResultReport {
                avg: report.mean_ms,
            }))
            .await?;

        Ok(report)
    }
}
