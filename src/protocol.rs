//! Wire format shared by the server, the CLI prober and the browser page.
//!
//! Every WebSocket text frame is one JSON object `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};

/// Frames sent by a prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Request an echo of `timestamp`.
    Ping(Probe),
    /// Report the mean of a completed run for this connection's session.
    LogResults(ResultReport),
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once, right after the upgrade.
    Welcome(Welcome),
    /// Echo of a [`ClientMessage::Ping`], fields unchanged.
    Pong(Probe),
    /// A result was stored for the session.
    Logged(Logged),
    Error(ErrorBody),
}

/// Timestamped probe. The same shape travels both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Sender wall clock, ms since the Unix epoch
    pub timestamp: i64,
    /// Owner run; absent for clients that only ever run one probe at a time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub session_id: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logged {
    pub user: String,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorBody {
            message: message.into(),
        })
    }
}

/// Current wall clock in ms since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
