//! Events emitted to the client.

use serde::Serialize;
use serde_json::Value;

use crate::protocol::error::{ErrorCode, ErrorPayload};
use crate::protocol::upstream::{GoAway, ServerContent, SessionResumptionUpdate, Transcription};
use crate::session::{RelayState, SessionId};

/// A client-facing emission, encoded as `{"type": <kind>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected(ConnectedInfo),
    SetupComplete(SetupCompleteInfo),
    ServerContent(ServerContent),
    InputTranscription(Transcription),
    OutputTranscription(Transcription),
    Interrupted,
    GenerationComplete,
    TurnComplete,
    ToolCall(Value),
    ToolCallCancellation(Value),
    GoAway(GoAway),
    SessionResumptionUpdate(SessionResumptionUpdate),
    UsageMetadata(Value),
    Status(SessionStatus),
    Closed(CloseInfo),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload::new(code, message))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::SetupComplete(_) => "setupComplete",
            ServerEvent::ServerContent(_) => "serverContent",
            ServerEvent::InputTranscription(_) => "inputTranscription",
            ServerEvent::OutputTranscription(_) => "outputTranscription",
            ServerEvent::Interrupted => "interrupted",
            ServerEvent::GenerationComplete => "generationComplete",
            ServerEvent::TurnComplete => "turnComplete",
            ServerEvent::ToolCall(_) => "toolCall",
            ServerEvent::ToolCallCancellation(_) => "toolCallCancellation",
            ServerEvent::GoAway(_) => "goAway",
            ServerEvent::SessionResumptionUpdate(_) => "sessionResumptionUpdate",
            ServerEvent::UsageMetadata(_) => "usageMetadata",
            ServerEvent::Status(_) => "status",
            ServerEvent::Closed(_) => "closed",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupCompleteInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Upstream close notification. Not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Snapshot of a session, returned by `getStatus` and the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: RelayState,
    /// An upstream connection is currently held.
    pub connected: bool,
    pub setup_complete: bool,
    pub model: Option<String>,
    pub session_handle: Option<String>,
    pub created_at_ms: u64,
}
