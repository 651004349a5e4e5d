//! WebSocket transport for the [`Prober`].
//!
//! `tokio-tungstenite` connection split into a locked sink (outbound probes
//! and reports) and a reader task that feeds echoes to the correlator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::prober::{Correlator, ProbeError, ProbeSink, Prober};
use crate::protocol::{ClientMessage, ServerMessage, Welcome};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the server's `welcome` frame
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where to connect and who to be.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// e.g. `ws://127.0.0.1:3000/ws`
    pub url: String,
    /// Reuse an existing session instead of getting a fresh one
    pub session: Option<String>,
    /// Display name, honored only when the session is new
    pub name: Option<String>,
    pub echo_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: None,
            name: None,
            echo_timeout: crate::prober::DEFAULT_ECHO_TIMEOUT,
        }
    }

    /// Endpoint with `session` and `name` appended as encoded query pairs.
    fn request_url(&self) -> Result<Url, ProbeError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| ProbeError::Connect(format!("{}: {e}", self.url)))?;

        let params = [("session", &self.session), ("name", &self.name)];
        if params.iter().any(|(_, value)| value.is_some()) {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                if let Some(value) = value {
                    query.append_pair(key, value);
                }
            }
        }

        Ok(url)
    }
}

/// One open connection, ready to run measurements.
pub struct ProbeConnection {
    welcome: Welcome,
    prober: Prober,
    sender: Arc<WsSender>,
    reader: JoinHandle<()>,
}

impl ProbeConnection {
    /// Connects, waits for the server's `welcome`, and starts the reader.
    pub async fn connect(opts: &ConnectOptions) -> Result<Self, ProbeError> {
        let url = opts.request_url()?;
        info!("connecting to {}", url.as_str().split('?').next().unwrap_or_default());

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let (write, mut read) = ws_stream.split();

        let welcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_welcome(&mut read))
            .await
            .map_err(|_| ProbeError::Handshake("no welcome from server".into()))??;
        info!(session_id = %welcome.session_id, user = %welcome.user, "connected");

        let correlator = Arc::new(Correlator::new());
        let reader = tokio::spawn(read_loop(read, Arc::clone(&correlator)));

        let sender = Arc::new(WsSender {
            write: tokio::sync::Mutex::new(write),
        });
        let prober = Prober::new(sender.clone(), correlator).with_echo_timeout(opts.echo_timeout);

        Ok(Self {
            welcome,
            prober,
            sender,
            reader,
        })
    }

    pub fn welcome(&self) -> &Welcome {
        &self.welcome
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Sends a close frame and stops the reader.
    pub async fn close(self) -> Result<(), ProbeError> {
        let result = self.sender.close().await;
        self.reader.abort();
        self.prober.correlator().close_all();
        result
    }
}

async fn read_welcome(read: &mut SplitStream<WsStream>) -> Result<Welcome, ProbeError> {
    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| ProbeError::Handshake(e.to_string()))?;
        match msg {
            Message::Text(text) => {
                return match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Welcome(welcome)) => Ok(welcome),
                    Ok(other) => Err(ProbeError::Handshake(format!(
                        "expected welcome, got {other:?}"
                    ))),
                    Err(e) => Err(ProbeError::Handshake(e.to_string())),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ProbeError::Handshake("connection closed".into()))
}

/// Reader task: routes echoes, logs everything else.
async fn read_loop(mut read: SplitStream<WsStream>, correlator: Arc<Correlator>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Pong(echo)) => {
                    correlator.dispatch(echo);
                }
                Ok(ServerMessage::Logged(logged)) => {
                    info!(user = %logged.user, avg = logged.avg, "server stored result");
                }
                Ok(ServerMessage::Error(err)) => {
                    warn!("server error: {}", err.message);
                }
                Ok(ServerMessage::Welcome(_)) => {
                    debug!("ignoring repeated welcome");
                }
                Err(e) => warn!("unparseable frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {e}");
                break;
            }
        }
    }

    // Wake every pending run so it fails instead of waiting out its timeout
    correlator.close_all();
    debug!("WebSocket read loop finished");
}

/// Outbound half, shared by every run on the connection.
pub struct WsSender {
    write: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
}

impl WsSender {
    async fn close(&self) -> Result<(), ProbeError> {
        self.write
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| ProbeError::Send(e.to_string()))
    }
}

#[async_trait]
impl ProbeSink for WsSender {
    async fn send(&self, msg: &ClientMessage) -> Result<(), ProbeError> {
        let json = serde_json::to_string(msg)?;
        self.write
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(|e| ProbeError::Send(e.to_string()))
    }
}
