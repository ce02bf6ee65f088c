//! Client WebSocket endpoint.
//!
//! # Responsibilities
//! - Enforce the concurrent socket limit at upgrade time
//! - Pump client frames into the relay and relay events back out
//! - End the relay on client close, eviction or shutdown
//!
//! # Data Flow
//! ```text
//! Client ←── JSON text frames ──→ relay loop ←── UpstreamEvent ──→ upstream task
//! ```
//!
//! # Design Decisions
//! - One task per socket; both directions are multiplexed with `select!`
//!   so a session's frames are never processed concurrently
//! - Binary client frames are read as UTF-8 JSON
//! - Ping/pong is answered by axum

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::gateway::RelayConnection;
use crate::http::server::AppState;
use crate::protocol::server::ServerEvent;
use crate::session::SessionRegistry;
use crate::upstream::UpstreamConnector;

/// Close code sent when the server is going away.
const GOING_AWAY: u16 = 1001;

/// Close code sent when an operator evicted the session.
const POLICY_VIOLATION: u16 = 1008;

/// `GET /ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let shutdown = state.shutdown.subscribe();
    if state.shutdown.is_triggered() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let permit = match Arc::clone(&state.limiter).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(active = state.connections.active_count(), "Connection limit reached, rejecting upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
        }
    };
    let guard = state.connections.track();
    let registry = state.registry.clone();
    let connector = Arc::clone(&state.connector);

    ws.on_upgrade(move |socket| async move {
        relay_socket(socket, registry, connector, shutdown).await;
        drop(permit);
        drop(guard);
    })
}

/// Run one client socket until it ends.
pub async fn relay_socket(
    socket: WebSocket,
    registry: SessionRegistry,
    connector: Arc<dyn UpstreamConnector>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut relay, connected) = RelayConnection::open(registry, connector);
    let session = relay.session();
    let span = tracing::info_span!("relay", session_id = %session.id());

    async move {
        let (mut sink, mut stream) = socket.split();
        if !send_events(&mut sink, vec![connected]).await {
            relay.disconnect();
            return;
        }

        loop {
            let events = tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => relay.handle_client_frame(text.as_str().as_bytes()),
                    Some(Ok(Message::Binary(data))) => relay.handle_client_frame(&data),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(close = ?frame, "Client sent close");
                        break;
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Client socket error");
                        break;
                    }
                    None => break,
                },
                event = relay.next_upstream_event() => relay.handle_upstream_event(event),
                _ = session.evicted() => {
                    tracing::info!("Session evicted by operator");
                    close(&mut sink, POLICY_VIOLATION, "session evicted").await;
                    break;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Closing client socket for shutdown");
                    close(&mut sink, GOING_AWAY, "server shutting down").await;
                    break;
                }
            };

            if !send_events(&mut sink, events).await {
                break;
            }
        }

        relay.disconnect();
    }
    .instrument(span)
    .await
}

/// Write events to the client. Returns false once the socket is gone.
async fn send_events(sink: &mut SplitSink<WebSocket, Message>, events: Vec<ServerEvent>) -> bool {
    for event in events {
        let text = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = event.label(), error = %e, "Failed to encode client event");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(error = %e, "Client socket closed while sending");
            return false;
        }
    }
    true
}

async fn close(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}
