//! WebSocket push feed.
//!
//! Each `connect` opens one WebSocket and spawns a session task that:
//! - forwards `update` messages as `PushMessage::Event`
//! - writes queued subscribe/unsubscribe requests
//! - pings when idle and fails the session on pong timeout
//! - reports the end of the session as `PushMessage::Disconnected`
//!
//! Reconnecting is left to the `SubscriptionChannel` driving this feed.

use crate::error::{WsError, WsResult};
use crate::feed::{PushControl, PushFeed, PushMessage, PushSession};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{WsMessage, WsRequest};
use futures_util::{SinkExt, StreamExt};
use mdrelay_core::{BoxFuture, FeedError, FeedResult, SubscriptionKey};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

const OUTBOUND_BUFFER: usize = 100;

/// WebSocket feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFeedConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Idle time before a ping is sent (ms). Default: 45000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this (ms). Default: 10000.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Per-session event buffer. Default: 1024.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    45_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_event_buffer() -> usize {
    1024
}

impl WsFeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Push feed over a WebSocket.
pub struct WsPushFeed {
    config: WsFeedConfig,
}

impl WsPushFeed {
    pub fn new(config: WsFeedConfig) -> Self {
        Self { config }
    }

    async fn open(&self) -> WsResult<PushSession> {
        crate::init_crypto();
        info!(url = %self.config.url, "Connecting to WebSocket");

        // TCP_NODELAY: updates are small and latency-sensitive.
        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        info!("WebSocket connected");

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        let session = WsSession {
            heartbeat: HeartbeatMonitor::new(
                self.config.heartbeat_interval_ms,
                self.config.heartbeat_timeout_ms,
            ),
            events: events_tx,
            outbound: outbound_rx,
        };
        tokio::spawn(session.run(ws_stream));

        Ok(PushSession {
            events: events_rx,
            control: Box::new(WsControl {
                outbound: outbound_tx,
            }),
        })
    }
}

impl PushFeed for WsPushFeed {
    fn connect(&self) -> BoxFuture<'_, FeedResult<PushSession>> {
        Box::pin(async move { self.open().await.map_err(FeedError::from) })
    }
}

enum Outbound {
    Request(WsRequest),
    Close,
}

/// Queues requests for the session task.
struct WsControl {
    outbound: mpsc::Sender<Outbound>,
}

impl WsControl {
    fn enqueue(&self, outbound: Outbound) -> Result<(), FeedError> {
        self.outbound.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                FeedError::TransportFailure("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => FeedError::Closed,
        })
    }
}

impl PushControl for WsControl {
    fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.enqueue(Outbound::Request(WsRequest::subscribe(keys)))
    }

    fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.enqueue(Outbound::Request(WsRequest::unsubscribe(keys)))
    }

    fn close(&self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a session loop ended.
enum SessionEnd {
    /// Closed locally; nobody is listening.
    Closed,
    Lost(String),
}

struct WsSession {
    heartbeat: HeartbeatMonitor,
    events: mpsc::Sender<PushMessage>,
    outbound: mpsc::Receiver<Outbound>,
}

impl WsSession {
    async fn run(mut self, stream: WsStream) {
        self.heartbeat.reset();
        let end = match self.message_loop(stream).await {
            Ok(end) => end,
            Err(e) => SessionEnd::Lost(e.to_string()),
        };

        if let SessionEnd::Lost(reason) = end {
            warn!(%reason, "WebSocket session lost");
            let _ = self.events.send(PushMessage::Disconnected { reason }).await;
        }
    }

    async fn message_loop(&mut self, stream: WsStream) -> WsResult<SessionEnd> {
        let (mut write, mut read) = stream.split();
        let check_period = self.heartbeat.check_period();

        loop {
            tokio::select! {
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound::Request(request)) => {
                        debug!(method = %request.method, keys = request.keys.len(), "Sending request");
                        write.send(Message::Text(request.to_text()?)).await?;
                    }
                    Some(Outbound::Close) | None => {
                        info!("Closing WebSocket session");
                        if let Err(e) = write.send(Message::Close(None)).await {
                            warn!(?e, "Failed to send Close frame");
                        }
                        return Ok(SessionEnd::Closed);
                    }
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_text(&text).await {
                            return Ok(SessionEnd::Closed);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        self.heartbeat.record_message();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        self.heartbeat.record_pong();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket read error");
                        return Err(e.into());
                    }
                    None => return Ok(SessionEnd::Lost("stream ended".to_string())),
                },

                () = tokio::time::sleep(check_period) => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        write.send(Message::Text(WsRequest::ping().to_text()?)).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Returns false when the event receiver is gone.
    async fn handle_text(&mut self, text: &str) -> bool {
        self.heartbeat.record_message();

        let message = match WsMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                return true;
            }
        };

        match message {
            WsMessage::Update(event) => {
                if self.events.send(PushMessage::Event(event)).await.is_err() {
                    debug!("Event receiver dropped");
                    return false;
                }
            }
            WsMessage::Pong => self.heartbeat.record_pong(),
            WsMessage::SubscriptionResponse(data) => {
                debug!(?data, "Subscription acknowledged");
            }
            WsMessage::Error(message) => {
                warn!(%message, "Received error channel message");
            }
            WsMessage::Other(channel) => {
                debug!(%channel, "Ignoring message on unknown channel");
            }
        }
        true
    }
}
