//! Backend-facing frames.
//!
//! Outbound frames are externally tagged (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`). Inbound frames are a single object whose
//! populated members say what happened; see [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::client::{
    ClientContent, GenerationConfig, RealtimeInput, RealtimeInputConfig, SessionResumptionConfig,
    ToolResponse,
};

/// Prefix the backend expects on model names.
pub const MODEL_PREFIX: &str = "models/";

/// A frame sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpstreamFrame {
    Setup(UpstreamSetup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

impl UpstreamFrame {
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamFrame::Setup(_) => "setup",
            UpstreamFrame::RealtimeInput(_) => "realtimeInput",
            UpstreamFrame::ClientContent(_) => "clientContent",
            UpstreamFrame::ToolResponse(_) => "toolResponse",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fully merged setup sent as the first frame on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Value>,
    pub realtime_input_config: RealtimeInputConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_resumption: Option<SessionResumptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_compression: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proactivity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_affective_dialog: Option<bool>,
}

/// Qualify a model name with [`MODEL_PREFIX`] unless it already is.
pub fn qualified_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with(MODEL_PREFIX) {
        model.to_string()
    } else {
        format!("{MODEL_PREFIX}{model}")
    }
}

/// A frame received from the backend.
///
/// Several members may be populated at once; the demultiplexer turns each
/// into its own client event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<Value>,
    pub tool_call_cancellation: Option<Value>,
    pub go_away: Option<GoAway>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub usage_metadata: Option<Value>,
}

impl ServerMessage {
    /// Decode a text or binary frame body.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Model output for the current turn. Unknown members are carried along
/// so the client sees the object intact.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consumed_client_message_index: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}
