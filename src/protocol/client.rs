//! Client-facing frames.
//!
//! Every client frame is a JSON envelope `{"type": <kind>, "data": <payload>}`.
//! The envelope is decoded once here into the closed [`ClientFrame`] union;
//! nothing past this module sees an untyped payload except the fields the
//! backend defines as opaque (tools, speech config, function responses).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::error::DecodeError;

/// Mime type assumed for audio chunks that do not declare one.
pub const DEFAULT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Mime type assumed for video frames that do not declare one.
pub const DEFAULT_VIDEO_MIME: &str = "image/jpeg";

/// Frame kinds a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientFrameKind {
    Setup,
    RealtimeInput,
    ClientContent,
    ToolResponse,
    GetStatus,
}

impl ClientFrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientFrameKind::Setup => "setup",
            ClientFrameKind::RealtimeInput => "realtimeInput",
            ClientFrameKind::ClientContent => "clientContent",
            ClientFrameKind::ToolResponse => "toolResponse",
            ClientFrameKind::GetStatus => "getStatus",
        }
    }

    /// Whether frames of this kind are forwarded to the backend and so
    /// require a ready session.
    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            ClientFrameKind::RealtimeInput | ClientFrameKind::ClientContent | ClientFrameKind::ToolResponse
        )
    }
}

impl std::fmt::Display for ClientFrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Setup(SetupRequest),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
    GetStatus,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: ClientFrameKind,
    #[serde(default)]
    data: Value,
}

impl ClientFrame {
    /// Decode a raw client frame.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(raw).map_err(DecodeError::Malformed)?;
        let kind = envelope.kind;
        let data = envelope.data;

        Ok(match kind {
            ClientFrameKind::Setup => ClientFrame::Setup(payload(kind, data)?),
            ClientFrameKind::RealtimeInput => ClientFrame::RealtimeInput(payload(kind, data)?),
            ClientFrameKind::ClientContent => ClientFrame::ClientContent(payload(kind, data)?),
            ClientFrameKind::ToolResponse => ClientFrame::ToolResponse(payload(kind, data)?),
            ClientFrameKind::GetStatus => ClientFrame::GetStatus,
        })
    }

    pub fn kind(&self) -> ClientFrameKind {
        match self {
            ClientFrame::Setup(_) => ClientFrameKind::Setup,
            ClientFrame::RealtimeInput(_) => ClientFrameKind::RealtimeInput,
            ClientFrame::ClientContent(_) => ClientFrameKind::ClientContent,
            ClientFrame::ToolResponse(_) => ClientFrameKind::ToolResponse,
            ClientFrame::GetStatus => ClientFrameKind::GetStatus,
        }
    }
}

trait Validate {
    fn validate(&self) -> Result<(), &'static str>;
}

fn payload<T>(kind: ClientFrameKind, data: Value) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_value(data).map_err(|source| DecodeError::Payload { kind, source })?;
    value
        .validate()
        .map_err(|reason| DecodeError::Rejected { kind, reason })?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// setup
// ---------------------------------------------------------------------------

/// Session setup requested by the client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub model: String,
    pub generation_config: Option<GenerationConfig>,
    pub system_instruction: Option<Value>,
    pub tools: Option<Value>,
    pub input_audio_transcription: Option<Value>,
    pub output_audio_transcription: Option<Value>,
    pub realtime_input_config: Option<RealtimeInputConfig>,
    pub thinking_config: Option<Value>,
    pub session_resumption: Option<SessionResumptionConfig>,
    pub context_window_compression: Option<Value>,
    pub proactivity: Option<Value>,
    pub enable_affective_dialog: Option<bool>,
}

impl Validate for SetupRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty");
        }
        Ok(())
    }
}

/// Generation parameters. Unset fields are filled from the relay defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_activity_detection: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_handling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_coverage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

// ---------------------------------------------------------------------------
// realtimeInput
// ---------------------------------------------------------------------------

/// A base64 payload with its mime type. Never decoded by the relay.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Empty marker object (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Marker {}

/// One realtime input item. Exactly one member is allowed per frame; the
/// wire shape is the same on both sides (`{"audio": {...}}`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RealtimeInput {
    Audio(MediaChunk),
    Video(MediaChunk),
    Text(String),
    ActivityStart(Marker),
    ActivityEnd(Marker),
    AudioStreamEnd(bool),
}

impl RealtimeInput {
    /// Fill in default mime types.
    pub fn normalized(self) -> Self {
        match self {
            RealtimeInput::Audio(chunk) => RealtimeInput::Audio(chunk.with_default_mime(DEFAULT_AUDIO_MIME)),
            RealtimeInput::Video(chunk) => RealtimeInput::Video(chunk.with_default_mime(DEFAULT_VIDEO_MIME)),
            other => other,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RealtimeInput::Audio(_) => "audio",
            RealtimeInput::Video(_) => "video",
            RealtimeInput::Text(_) => "text",
            RealtimeInput::ActivityStart(_) => "activityStart",
            RealtimeInput::ActivityEnd(_) => "activityEnd",
            RealtimeInput::AudioStreamEnd(_) => "audioStreamEnd",
        }
    }
}

impl MediaChunk {
    fn with_default_mime(mut self, mime: &str) -> Self {
        if self.mime_type.as_deref().map_or(true, str::is_empty) {
            self.mime_type = Some(mime.to_string());
        }
        self
    }
}

impl Validate for RealtimeInput {
    fn validate(&self) -> Result<(), &'static str> {
        match self {
            RealtimeInput::Audio(chunk) | RealtimeInput::Video(chunk) if chunk.data.is_empty() => {
                Err("media data must not be empty")
            }
            RealtimeInput::Text(text) if text.is_empty() => Err("text must not be empty"),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// clientContent
// ---------------------------------------------------------------------------

/// Conversation turns appended by the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Turns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

impl ClientContent {
    /// Apply the `turnComplete = true` default.
    pub fn normalized(mut self) -> Self {
        self.turn_complete = Some(self.turn_complete.unwrap_or(true));
        self
    }
}

impl Validate for ClientContent {
    fn validate(&self) -> Result<(), &'static str> {
        match &self.turns {
            Turns::Text(text) if text.is_empty() => Err("turns must not be empty"),
            Turns::Structured(turns) if turns.is_empty() => Err("turns must not be empty"),
            _ => Ok(()),
        }
    }
}

/// Either the full turn list or the plain-text shorthand.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Turns {
    Text(String),
    Structured(Vec<Content>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaChunk>,
}

// ---------------------------------------------------------------------------
// toolResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl Validate for ToolResponse {
    fn validate(&self) -> Result<(), &'static str> {
        if self.function_responses.is_empty() {
            return Err("functionResponses must not be empty");
        }
        if self.function_responses.iter().any(|r| r.name.is_empty()) {
            return Err("function response name must not be empty");
        }
        Ok(())
    }
}
