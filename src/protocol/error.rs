//! Client-visible error codes and decode failures.

use serde::Serialize;
use serde_json::error::Category;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::client::ClientFrameKind;

/// Error codes emitted to the client in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    ApiKeyMissing,
    SetupFailed,
    SessionNotReady,
    InputSendFailed,
    ToolResponseFailed,
    ContentSendFailed,
    GeminiWsError,
    InvalidMessage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::ApiKeyMissing => "API_KEY_MISSING",
            ErrorCode::SetupFailed => "SETUP_FAILED",
            ErrorCode::SessionNotReady => "SESSION_NOT_READY",
            ErrorCode::InputSendFailed => "INPUT_SEND_FAILED",
            ErrorCode::ToolResponseFailed => "TOOL_RESPONSE_FAILED",
            ErrorCode::ContentSendFailed => "CONTENT_SEND_FAILED",
            ErrorCode::GeminiWsError => "GEMINI_WS_ERROR",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
        }
    }

    /// Code used when the payload of a frame kind is rejected.
    pub fn for_rejected(kind: ClientFrameKind) -> Self {
        match kind {
            ClientFrameKind::Setup => ErrorCode::SetupFailed,
            ClientFrameKind::RealtimeInput => ErrorCode::InputSendFailed,
            ClientFrameKind::ClientContent => ErrorCode::ContentSendFailed,
            ClientFrameKind::ToolResponse => ErrorCode::ToolResponseFailed,
            ClientFrameKind::GetStatus => ErrorCode::InvalidMessage,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an `error` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Why a client frame could not be turned into a [`ClientFrame`](crate::protocol::client::ClientFrame).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The envelope itself is not valid JSON or names an unknown kind.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope was fine but its payload does not fit the kind.
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: ClientFrameKind,
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded but breaks a protocol rule.
    #[error("invalid {kind} payload: {reason}")]
    Rejected {
        kind: ClientFrameKind,
        reason: &'static str,
    },
}

impl DecodeError {
    /// The frame kind, if the envelope was readable.
    pub fn kind(&self) -> Option<ClientFrameKind> {
        match self {
            DecodeError::Malformed(_) => None,
            DecodeError::Payload { kind, .. } | DecodeError::Rejected { kind, .. } => Some(*kind),
        }
    }

    /// Error code reported to the client for this failure.
    pub fn code(&self) -> ErrorCode {
        self.kind()
            .map(ErrorCode::for_rejected)
            .unwrap_or(ErrorCode::InvalidMessage)
    }

    /// Structured context for the `details` field of the error event.
    pub fn details(&self) -> Value {
        match self {
            DecodeError::Malformed(e) => json!({
                "line": e.line(),
                "column": e.column(),
            }),
            DecodeError::Payload { kind, source } => json!({
                "kind": kind.as_str(),
                "category": category(source),
            }),
            DecodeError::Rejected { kind, reason } => json!({
                "kind": kind.as_str(),
                "reason": reason,
            }),
        }
    }
}

fn category(error: &serde_json::Error) -> &'static str {
    match error.classify() {
        Category::Io => "io",
        Category::Syntax => "syntax",
        Category::Data => "data",
        Category::Eof => "eof",
    }
}
