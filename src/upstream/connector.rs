//! Opening and driving upstream connections.
//!
//! # Responsibilities
//! - Check the service credential before anything is spawned
//! - Dial the backend, send the merged setup frame first
//! - Pump queued client frames out and decoded backend frames in
//! - Turn transport failure and remote close into one terminal event
//!
//! # Design Decisions
//! - `open` returns at once; connection progress arrives as events
//! - One task per connection owns the socket, so frame order is the
//!   order of the command and event channels
//! - Nothing here retries; the client can always send a fresh `setup`

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::Instrument;
use url::Url;

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::protocol::client::SetupRequest;
use crate::protocol::upstream::{ServerMessage, UpstreamFrame, UpstreamSetup};
use crate::session::SessionId;
use crate::upstream::handle::{UpstreamCommand, UpstreamCommands, UpstreamEvent, UpstreamHandle, UpstreamLink};
use crate::upstream::setup::{build_setup, SetupDefaults};

/// Close code reported when the socket vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carried no status.
const NO_STATUS: u16 = 1005;

/// Errors raised synchronously by [`UpstreamConnector::open`].
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no upstream API key configured (set {0})")]
    MissingApiKey(String),

    #[error("invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Something that can open upstream connections for sessions.
pub trait UpstreamConnector: Send + Sync {
    /// Start connecting and queue the setup frame built from `request`.
    fn open(&self, session_id: &SessionId, request: &SetupRequest) -> Result<UpstreamLink, UpstreamError>;
}

/// Connector for the generative backend's bidirectional streaming endpoint.
///
/// Reads the live configuration on every `open`, so reloaded defaults
/// apply to the next setup.
pub struct GeminiConnector {
    config: Arc<ArcSwap<RelayConfig>>,
}

impl GeminiConnector {
    pub fn new(config: Arc<ArcSwap<RelayConfig>>) -> Self {
        Self { config }
    }
}

impl UpstreamConnector for GeminiConnector {
    fn open(&self, session_id: &SessionId, request: &SetupRequest) -> Result<UpstreamLink, UpstreamError> {
        let config = self.config.load();
        let upstream = &config.upstream;

        let api_key = upstream
            .api_key
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingApiKey(upstream.api_key_env.clone()))?;

        let mut url = Url::parse(&upstream.endpoint)
            .map_err(|e| UpstreamError::InvalidEndpoint(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", api_key);

        let setup = build_setup(request, &SetupDefaults::from(upstream));
        let (handle, commands) = UpstreamHandle::channel(upstream.send_buffer);
        let (events_tx, events_rx) = mpsc::channel(upstream.event_buffer.max(1));

        let span = tracing::info_span!("upstream", session_id = %session_id, upstream_id = handle.id());
        let connection = UpstreamConnection {
            url,
            setup,
            connect_timeout: Duration::from_secs(upstream.connect_timeout_secs),
            commands,
            events: events_tx,
        };
        tokio::spawn(connection.run().instrument(span));

        Ok(UpstreamLink { handle, events: events_rx })
    }
}

/// The task side of one upstream connection.
struct UpstreamConnection {
    url: Url,
    setup: UpstreamSetup,
    connect_timeout: Duration,
    commands: UpstreamCommands,
    events: mpsc::Sender<UpstreamEvent>,
}

impl UpstreamConnection {
    async fn run(mut self) {
        let terminal = self.drive().await;
        self.commands.mark_closed();

        match terminal {
            Some(event) => {
                match &event {
                    UpstreamEvent::Error(e) => {
                        tracing::warn!(error = %e, "Upstream connection failed");
                        metrics::record_upstream_closed("error");
                    }
                    UpstreamEvent::Closed { code, reason } => {
                        tracing::info!(code, reason = %reason, "Upstream closed by backend");
                        metrics::record_upstream_closed("remote");
                    }
                    UpstreamEvent::Message(_) => {}
                }
                let _ = self.events.send(event).await;
            }
            None => {
                tracing::debug!("Upstream closed locally");
                metrics::record_upstream_closed("local");
            }
        }
    }

    /// Run the connection until it ends. Returns the terminal event to
    /// report, or `None` when it was closed from our side.
    async fn drive(&mut self) -> Option<UpstreamEvent> {
        if self.commands.is_closed() {
            return None;
        }

        let connect = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let closing = self.commands.close_requested();
        let mut socket = tokio::select! {
            result = connect => match result {
                Ok(Ok((socket, _response))) => socket,
                Ok(Err(e)) => return Some(UpstreamEvent::Error(format!("connect failed: {e}"))),
                Err(_) => {
                    return Some(UpstreamEvent::Error(format!(
                        "connect timed out after {}s",
                        self.connect_timeout.as_secs()
                    )))
                }
            },
            _ = closing => {
                tracing::debug!("Upstream closed while connecting");
                return None;
            }
            _ = self.events.closed() => {
                tracing::debug!("Session owner gone while connecting");
                return None;
            }
        };

        // A close that raced the handshake wins; the backend never sees setup.
        if self.commands.is_closed() {
            let _ = socket.close(None).await;
            return None;
        }
        tracing::info!(model = %self.setup.model, "Upstream connected");

        let setup = match UpstreamFrame::Setup(self.setup.clone()).encode() {
            Ok(setup) => setup,
            Err(e) => return Some(UpstreamEvent::Error(format!("failed to encode setup: {e}"))),
        };
        if let Err(e) = socket.send(Message::Text(setup.into())).await {
            return Some(UpstreamEvent::Error(format!("failed to send setup: {e}")));
        }
        metrics::record_frame("upstream_out", "setup");

        loop {
            let closing = self.commands.close_requested();
            tokio::select! {
                _ = closing => {
                    let _ = socket.close(None).await;
                    return None;
                }
                command = self.commands.recv() => match command {
                    Some(UpstreamCommand::Send(text)) => {
                        if let Err(e) = socket.send(Message::Text(text.into())).await {
                            return Some(UpstreamEvent::Error(format!("send failed: {e}")));
                        }
                    }
                    Some(UpstreamCommand::Close) | None => {
                        let _ = socket.close(None).await;
                        return None;
                    }
                },
                inbound = socket.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !self.deliver(text.as_str().as_bytes()).await {
                            let _ = socket.close(None).await;
                            return None;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !self.deliver(&data).await {
                            let _ = socket.close(None).await;
                            return None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NO_STATUS, String::new()));
                        return Some(UpstreamEvent::Closed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some(UpstreamEvent::Error(e.to_string())),
                    None => {
                        return Some(UpstreamEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection dropped".to_string(),
                        })
                    }
                },
            }
        }
    }

    /// Decode and hand one backend frame to the session owner.
    /// Returns false once nobody is listening any more.
    async fn deliver(&mut self, raw: &[u8]) -> bool {
        match ServerMessage::decode(raw) {
            Ok(message) => {
                tracing::debug!(bytes = raw.len(), "Upstream frame received");
                self.events.send(UpstreamEvent::Message(message)).await.is_ok()
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "Dropping malformed upstream frame");
                metrics::record_frame("upstream_in", "malformed");
                true
            }
        }
    }
}
