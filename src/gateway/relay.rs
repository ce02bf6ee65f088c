//! Per-connection relay state machine.
//!
//! # Responsibilities
//! - Decode client frames once, at the boundary
//! - Enforce `CONNECTED → AWAITING_SETUP → READY` before forwarding
//! - Open, replace and reset the session's upstream connection
//! - Turn upstream events into client emissions, in arrival order
//!
//! # Design Decisions
//! - Socket I/O lives in `http::websocket`; this type only maps inputs to
//!   outputs, so it can be driven directly in tests
//! - Every rejected frame yields exactly one `error` event
//! - Upstream close or failure resets the session in place; only client
//!   disconnect removes it from the registry

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::gateway::demux;
use crate::observability::metrics;
use crate::protocol::client::{ClientFrame, ClientFrameKind, SetupRequest};
use crate::protocol::error::{DecodeError, ErrorCode, ErrorPayload};
use crate::protocol::server::{CloseInfo, ConnectedInfo, ServerEvent};
use crate::protocol::upstream::{qualified_model, UpstreamFrame};
use crate::session::{RelayState, Session, SessionId, SessionRegistry};
use crate::upstream::{SendError, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamLink};

/// Close code reported when the upstream event stream ended without a
/// terminal event.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Relay state for one client connection.
pub struct RelayConnection {
    session: Arc<Session>,
    registry: SessionRegistry,
    connector: Arc<dyn UpstreamConnector>,
    events: Option<mpsc::Receiver<UpstreamEvent>>,
}

impl RelayConnection {
    /// Register a new session for a freshly accepted client. Returns the
    /// relay and the `connected` event to send first.
    pub fn open(registry: SessionRegistry, connector: Arc<dyn UpstreamConnector>) -> (Self, ServerEvent) {
        let id = SessionId::new();
        let session = registry.create(id.clone());
        tracing::info!(session_id = %id, "Client connected");

        let relay = Self {
            session,
            registry,
            connector,
            events: None,
        };
        (relay, ServerEvent::Connected(ConnectedInfo { session_id: id }))
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// The session this connection owns.
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Process one raw client frame.
    pub fn handle_client_frame(&mut self, raw: &[u8]) -> Vec<ServerEvent> {
        let frame = match ClientFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => return self.rejected(e),
        };
        let kind = frame.kind();
        tracing::debug!(session_id = %self.session.id(), kind = %kind, "Client frame received");
        metrics::record_frame("client_in", kind.as_str());

        match frame {
            ClientFrame::Setup(request) => self.setup(request),
            ClientFrame::RealtimeInput(input) => {
                self.forward(kind, UpstreamFrame::RealtimeInput(input.normalized()))
            }
            ClientFrame::ClientContent(content) => {
                self.forward(kind, UpstreamFrame::ClientContent(content.normalized()))
            }
            ClientFrame::ToolResponse(response) => self.forward(kind, UpstreamFrame::ToolResponse(response)),
            ClientFrame::GetStatus => vec![self.status()],
        }
    }

    /// Translate one upstream event into client emissions.
    pub fn handle_upstream_event(&mut self, event: UpstreamEvent) -> Vec<ServerEvent> {
        let session_id = self.session.id().clone();
        match event {
            UpstreamEvent::Message(message) => {
                let Some(session) = self.registry.get(&session_id) else {
                    tracing::debug!(session_id = %session_id, "Dropping upstream frame for removed session");
                    return Vec::new();
                };
                let events = demux::dispatch(&session, message);
                for event in &events {
                    tracing::debug!(session_id = %session_id, kind = event.label(), "Upstream event relayed");
                    metrics::record_frame("upstream_in", event.label());
                }
                events
            }
            UpstreamEvent::Error(reason) => {
                tracing::warn!(session_id = %session_id, error = %reason, "Upstream connection error");
                self.reset_upstream();
                vec![self.error(ErrorCode::GeminiWsError, reason)]
            }
            UpstreamEvent::Closed { code, reason } => {
                tracing::info!(session_id = %session_id, code, reason = %reason, "Upstream connection closed");
                self.reset_upstream();
                vec![ServerEvent::Closed(CloseInfo { code, reason })]
            }
        }
    }

    /// Wait for the next upstream event. Pending forever while no upstream
    /// connection is held.
    pub async fn next_upstream_event(&mut self) -> UpstreamEvent {
        match self.events.as_mut() {
            Some(events) => events.recv().await.unwrap_or(UpstreamEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "upstream task ended".to_string(),
            }),
            None => std::future::pending().await,
        }
    }

    /// Tear the session down after the client went away.
    pub fn disconnect(&mut self) {
        self.events = None;
        if self.registry.remove(self.session.id()).is_some() {
            tracing::info!(session_id = %self.session.id(), "Client disconnected, session removed");
        }
    }

    fn setup(&mut self, request: SetupRequest) -> Vec<ServerEvent> {
        let session = self.registry.create(self.session.id().clone());
        if let Some(previous) = session.upstream_id() {
            tracing::info!(session_id = %session.id(), upstream_id = previous, "Replacing upstream connection");
        }
        self.events = None;
        session.reset();

        match self.connector.open(session.id(), &request) {
            Ok(UpstreamLink { handle, events }) => {
                let model = qualified_model(&request.model);
                tracing::info!(session_id = %session.id(), upstream_id = handle.id(), model = %model, "Upstream setup sent");
                session.attach_upstream(handle, model);
                self.events = Some(events);
                Vec::new()
            }
            Err(e @ UpstreamError::MissingApiKey(_)) => vec![self.error(ErrorCode::ApiKeyMissing, e.to_string())],
            Err(e) => vec![self.error(ErrorCode::SetupFailed, e.to_string())],
        }
    }

    fn forward(&mut self, kind: ClientFrameKind, frame: UpstreamFrame) -> Vec<ServerEvent> {
        let session = match self.ready_session() {
            Ok(session) => session,
            Err(event) => return vec![event],
        };
        match session.send_upstream(&frame) {
            Ok(()) => {
                metrics::record_frame("upstream_out", kind.as_str());
                Vec::new()
            }
            // The upstream's terminal event tells the client.
            Err(SendError::Closed) => Vec::new(),
            Err(e) => vec![self.error(ErrorCode::for_rejected(kind), e.to_string())],
        }
    }

    fn rejected(&mut self, error: DecodeError) -> Vec<ServerEvent> {
        if let Some(kind) = error.kind() {
            if kind.is_forwarded() {
                if let Err(event) = self.ready_session() {
                    return vec![event];
                }
            }
        }
        let payload = ErrorPayload::new(error.code(), error.to_string()).with_details(error.details());
        vec![self.report(payload)]
    }

    /// The session, if it is registered and ready to forward frames.
    fn ready_session(&self) -> Result<Arc<Session>, ServerEvent> {
        let Some(session) = self.registry.get(self.session.id()) else {
            return Err(self.error(ErrorCode::SessionNotFound, "no session for this connection"));
        };
        match session.state() {
            RelayState::Ready => Ok(session),
            RelayState::Closed => Err(self.error(ErrorCode::SessionNotFound, "session is closed")),
            RelayState::Connected => Err(self.error(ErrorCode::SessionNotReady, "send setup first")),
            RelayState::AwaitingSetup => {
                Err(self.error(ErrorCode::SessionNotReady, "waiting for setup to complete"))
            }
        }
    }

    fn status(&self) -> ServerEvent {
        ServerEvent::Status(self.session.status())
    }

    fn reset_upstream(&mut self) {
        self.events = None;
        if let Some(session) = self.registry.get(self.session.id()) {
            session.reset();
        }
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> ServerEvent {
        self.report(ErrorPayload::new(code, message))
    }

    fn report(&self, payload: ErrorPayload) -> ServerEvent {
        tracing::warn!(
            session_id = %self.session.id(),
            code = %payload.code,
            message = %payload.message,
            "Reporting error to client"
        );
        metrics::record_client_error(payload.code.as_str());
        ServerEvent::Error(payload)
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::upstream::ServerMessage;
    use crate::upstream::{UpstreamCommand, UpstreamCommands, UpstreamHandle};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockUpstream {
        request: SetupRequest,
        commands: UpstreamCommands,
        events: mpsc::Sender<UpstreamEvent>,
    }

    #[derive(Default)]
    struct MockConnector {
        missing_key: bool,
        /// Outbound queue size per connection; 16 when unset.
        send_buffer: Option<usize>,
        opened: Mutex<Vec<MockUpstream>>,
    }

    impl UpstreamConnector for MockConnector {
        fn open(&self, _session_id: &SessionId, request: &SetupRequest) -> Result<UpstreamLink, UpstreamError> {
            if self.missing_key {
                return Err(UpstreamError::MissingApiKey("GEMINI_API_KEY".into()));
            }
            let mut opened = self.opened.lock().unwrap();
            for (index, earlier) in opened.iter().enumerate() {
                assert!(
                    earlier.commands.is_closed(),
                    "connection {index} still open when opening connection {}",
                    opened.len()
                );
            }
            let (handle, commands) = UpstreamHandle::channel(self.send_buffer.unwrap_or(16));
            let (tx, rx) = mpsc::channel(16);
            opened.push(MockUpstream {
                request: request.clone(),
                commands,
                events: tx,
            });
            Ok(UpstreamLink { handle, events: rx })
        }
    }

    impl MockConnector {
        fn opened(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        /// Decoded frames queued on connection `index`, plus whether it was closed.
        fn drain(&self, index: usize) -> (Vec<Value>, bool) {
            let mut opened = self.opened.lock().unwrap();
            let mut frames = Vec::new();
            let mut closed = false;
            while let Some(command) = opened[index].commands.try_recv() {
                match command {
                    UpstreamCommand::Send(text) => frames.push(serde_json::from_str(&text).unwrap()),
                    UpstreamCommand::Close => closed = true,
                }
            }
            (frames, closed)
        }

        fn sender(&self, index: usize) -> mpsc::Sender<UpstreamEvent> {
            self.opened.lock().unwrap()[index].events.clone()
        }
    }

    fn relay_with(connector: Arc<MockConnector>) -> (RelayConnection, SessionRegistry) {
        let registry = SessionRegistry::new();
        let (relay, connected) = RelayConnection::open(registry.clone(), connector);
        assert_eq!(connected.label(), "connected");
        (relay, registry)
    }

    fn frame(kind: &str, data: Value) -> Vec<u8> {
        json!({ "type": kind, "data": data }).to_string().into_bytes()
    }

    fn error_code(events: &[ServerEvent]) -> ErrorCode {
        match events {
            [ServerEvent::Error(payload)] => payload.code,
            other => panic!("expected a single error event, got {other:?}"),
        }
    }

    fn message(value: Value) -> UpstreamEvent {
        UpstreamEvent::Message(ServerMessage::decode(value.to_string().as_bytes()).unwrap())
    }

    /// Setup and acknowledge, leaving the relay READY on connection `index`.
    fn make_ready(relay: &mut RelayConnection, connector: &MockConnector, index: usize) {
        assert!(relay.handle_client_frame(&frame("setup", json!({ "model": "m1" }))).is_empty());
        assert_eq!(connector.opened(), index + 1);
        let events = relay.handle_upstream_event(message(json!({ "setupComplete": {} })));
        assert_eq!(events[0].label(), "setupComplete");
    }

    #[test]
    fn frames_before_setup_are_not_forwarded() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());

        let frames = [
            frame("realtimeInput", json!({ "text": "hi" })),
            frame("clientContent", json!({ "turns": "hello" })),
            frame("toolResponse", json!({ "functionResponses": [{ "name": "f", "response": {} }] })),
        ];
        for raw in &frames {
            assert_eq!(error_code(&relay.handle_client_frame(raw)), ErrorCode::SessionNotReady);
        }
        assert_eq!(connector.opened(), 0);
    }

    #[test]
    fn frames_while_awaiting_setup_are_rejected() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());

        relay.handle_client_frame(&frame("setup", json!({ "model": "m1" })));
        assert_eq!(relay.session().state(), RelayState::AwaitingSetup);

        let events = relay.handle_client_frame(&frame("realtimeInput", json!({ "text": "hi" })));
        assert_eq!(error_code(&events), ErrorCode::SessionNotReady);
        assert_eq!(connector.drain(0), (Vec::new(), false));
    }

    #[test]
    fn setup_then_ack_then_disconnect() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, registry) = relay_with(connector.clone());
        let id = relay.session_id().clone();

        make_ready(&mut relay, &connector, 0);
        let session = registry.get(&id).unwrap();
        assert!(session.is_setup_complete());
        assert_eq!(session.state(), RelayState::Ready);
        assert_eq!(session.model().as_deref(), Some("models/m1"));
        assert_eq!(connector.opened.lock().unwrap()[0].request.model, "m1");

        relay.disconnect();
        relay.disconnect();
        assert!(registry.get(&id).is_none());
        assert_eq!(connector.drain(0), (Vec::new(), true));
    }

    #[test]
    fn second_setup_replaces_first_upstream() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        // The mock asserts the first connection is closed before the second opens.
        relay.handle_client_frame(&frame("setup", json!({ "model": "m2" })));
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.drain(0), (Vec::new(), true));
        assert_eq!(connector.drain(1), (Vec::new(), false));

        let session = registry.get(relay.session_id()).unwrap();
        assert_eq!(session.state(), RelayState::AwaitingSetup);
        assert_eq!(session.model().as_deref(), Some("models/m2"));
    }

    #[test]
    fn forwarded_frames_are_normalized_in_order() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        let inputs = [
            frame("realtimeInput", json!({ "audio": { "data": "AAA=" } })),
            frame("clientContent", json!({ "turns": "hello" })),
            frame("realtimeInput", json!({ "activityEnd": {} })),
            frame(
                "toolResponse",
                json!({ "functionResponses": [{ "id": "c1", "name": "f", "response": { "ok": true } }] }),
            ),
        ];
        for raw in &inputs {
            assert!(relay.handle_client_frame(raw).is_empty());
        }

        let (frames, closed) = connector.drain(0);
        assert!(!closed);
        assert_eq!(
            frames,
            vec![
                json!({ "realtimeInput": { "audio": { "data": "AAA=", "mimeType": "audio/pcm;rate=16000" } } }),
                json!({ "clientContent": { "turns": "hello", "turnComplete": true } }),
                json!({ "realtimeInput": { "activityEnd": {} } }),
                json!({ "toolResponse": { "functionResponses": [{ "id": "c1", "name": "f", "response": { "ok": true } }] } }),
            ]
        );
    }

    #[test]
    fn readiness_is_checked_before_payload() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());

        let bad_input = frame("realtimeInput", json!({ "bogus": 1 }));
        assert_eq!(error_code(&relay.handle_client_frame(&bad_input)), ErrorCode::SessionNotReady);

        make_ready(&mut relay, &connector, 0);
        assert_eq!(error_code(&relay.handle_client_frame(&bad_input)), ErrorCode::InputSendFailed);

        let empty_turns = frame("clientContent", json!({ "turns": [] }));
        assert_eq!(error_code(&relay.handle_client_frame(&empty_turns)), ErrorCode::ContentSendFailed);

        let no_responses = frame("toolResponse", json!({ "functionResponses": [] }));
        assert_eq!(error_code(&relay.handle_client_frame(&no_responses)), ErrorCode::ToolResponseFailed);

        assert_eq!(connector.drain(0), (Vec::new(), false));
    }

    #[test]
    fn malformed_envelopes_and_setups() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());

        assert_eq!(error_code(&relay.handle_client_frame(b"not json")), ErrorCode::InvalidMessage);
        assert_eq!(
            error_code(&relay.handle_client_frame(&frame("launch", json!({})))),
            ErrorCode::InvalidMessage
        );
        assert_eq!(
            error_code(&relay.handle_client_frame(&frame("setup", json!({ "model": "" })))),
            ErrorCode::SetupFailed
        );
        assert_eq!(connector.opened(), 0);
    }

    #[test]
    fn rejected_payload_carries_details() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        let events = relay.handle_client_frame(&frame("realtimeInput", json!({ "bogus": 1 })));
        let [ServerEvent::Error(payload)] = events.as_slice() else {
            panic!("expected error, got {events:?}");
        };
        assert_eq!(payload.code, ErrorCode::InputSendFailed);
        let details = payload.details.as_ref().unwrap();
        assert_eq!(details["kind"], "realtimeInput");
        assert_eq!(details["category"], "data");

        let events = relay.handle_client_frame(b"{\"type\": ");
        let [ServerEvent::Error(payload)] = events.as_slice() else {
            panic!("expected error, got {events:?}");
        };
        assert_eq!(payload.code, ErrorCode::InvalidMessage);
        assert_eq!(payload.details.as_ref().unwrap()["line"], 1);
    }

    #[test]
    fn full_send_queue_is_reported() {
        let connector = Arc::new(MockConnector {
            send_buffer: Some(2),
            ..Default::default()
        });
        let (mut relay, _registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        let input = frame("realtimeInput", json!({ "text": "hi" }));
        assert!(relay.handle_client_frame(&input).is_empty());
        assert!(relay.handle_client_frame(&input).is_empty());
        assert_eq!(error_code(&relay.handle_client_frame(&input)), ErrorCode::InputSendFailed);
        assert_eq!(
            error_code(&relay.handle_client_frame(&frame("clientContent", json!({ "turns": "x" })))),
            ErrorCode::ContentSendFailed
        );

        // Once the socket catches up, frames flow again in order.
        let (frames, closed) = connector.drain(0);
        assert_eq!(frames.len(), 2);
        assert!(!closed);
        assert!(relay.handle_client_frame(&input).is_empty());
        assert_eq!(relay.session().state(), RelayState::Ready);
    }

    #[test]
    fn missing_api_key_rejects_setup() {
        let connector = Arc::new(MockConnector {
            missing_key: true,
            ..Default::default()
        });
        let (mut relay, registry) = relay_with(connector);

        let events = relay.handle_client_frame(&frame("setup", json!({ "model": "m1" })));
        assert_eq!(error_code(&events), ErrorCode::ApiKeyMissing);
        assert_eq!(registry.get(relay.session_id()).unwrap().state(), RelayState::Connected);
    }

    #[test]
    fn removed_session_is_not_found() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        registry.remove(relay.session_id());
        let events = relay.handle_client_frame(&frame("realtimeInput", json!({ "text": "hi" })));
        assert_eq!(error_code(&events), ErrorCode::SessionNotFound);
    }

    #[test]
    fn get_status_reports_session() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());

        let events = relay.handle_client_frame(&frame("getStatus", Value::Null));
        let [ServerEvent::Status(status)] = events.as_slice() else {
            panic!("expected status, got {events:?}");
        };
        assert!(!status.connected);
        assert!(!status.setup_complete);

        make_ready(&mut relay, &connector, 0);
        relay.handle_upstream_event(message(json!({ "sessionResumptionUpdate": { "newHandle": "h1" } })));
        let events = relay.handle_client_frame(&frame("getStatus", json!({})));
        let [ServerEvent::Status(status)] = events.as_slice() else {
            panic!("expected status, got {events:?}");
        };
        assert!(status.connected);
        assert!(status.setup_complete);
        assert_eq!(status.model.as_deref(), Some("models/m1"));
        assert_eq!(status.session_handle.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn upstream_events_keep_arrival_order() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        let upstream = connector.sender(0);
        upstream
            .send(message(json!({ "serverContent": { "inputTranscription": { "text": "a" } } })))
            .await
            .unwrap();
        upstream
            .send(message(json!({ "serverContent": { "turnComplete": true } })))
            .await
            .unwrap();

        let mut labels = Vec::new();
        for _ in 0..2 {
            let event = relay.next_upstream_event().await;
            labels.extend(relay.handle_upstream_event(event).iter().map(ServerEvent::label));
        }
        assert_eq!(labels, ["inputTranscription", "turnComplete"]);
    }

    #[tokio::test]
    async fn upstream_close_resets_session_and_allows_resetup() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        connector
            .sender(0)
            .send(UpstreamEvent::Closed {
                code: 1000,
                reason: "bye".into(),
            })
            .await
            .unwrap();
        let event = relay.next_upstream_event().await;
        let events = relay.handle_upstream_event(event);
        assert_eq!(
            events,
            vec![ServerEvent::Closed(CloseInfo {
                code: 1000,
                reason: "bye".into()
            })]
        );

        let session = registry.get(relay.session_id()).unwrap();
        assert_eq!(session.state(), RelayState::Connected);
        let rejected = relay.handle_client_frame(&frame("realtimeInput", json!({ "text": "hi" })));
        assert_eq!(error_code(&rejected), ErrorCode::SessionNotReady);

        // No second close notification for the same connection.
        let idle = tokio::time::timeout(Duration::from_millis(50), relay.next_upstream_event()).await;
        assert!(idle.is_err());

        make_ready(&mut relay, &connector, 1);
        assert_eq!(session.state(), RelayState::Ready);
    }

    #[tokio::test]
    async fn upstream_error_is_reported() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        connector
            .sender(0)
            .send(UpstreamEvent::Error("tls handshake failed".into()))
            .await
            .unwrap();
        let event = relay.next_upstream_event().await;
        let events = relay.handle_upstream_event(event);
        assert_eq!(error_code(&events), ErrorCode::GeminiWsError);
        assert_eq!(registry.get(relay.session_id()).unwrap().state(), RelayState::Connected);
    }

    #[tokio::test]
    async fn dropped_event_stream_counts_as_abnormal_close() {
        let connector = Arc::new(MockConnector::default());
        let (mut relay, _registry) = relay_with(connector.clone());
        make_ready(&mut relay, &connector, 0);

        connector.opened.lock().unwrap().clear();
        let event = relay.next_upstream_event().await;
        assert!(matches!(event, UpstreamEvent::Closed { code: ABNORMAL_CLOSURE, .. }));
    }

    #[test]
    fn dropping_the_relay_removes_the_session() {
        let connector = Arc::new(MockConnector::default());
        let (relay, registry) = relay_with(connector);
        let id = relay.session_id().clone();
        drop(relay);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }
}
