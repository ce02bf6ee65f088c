//! Upstream event demultiplexer.
//!
//! Turns one decoded backend frame into the client events it implies, in
//! a fixed order, and applies the session updates some of them carry.

use crate::protocol::server::{ServerEvent, SetupCompleteInfo};
use crate::protocol::upstream::ServerMessage;
use crate::session::Session;

/// Classify `message` and return the client emissions it produces.
pub fn dispatch(session: &Session, message: ServerMessage) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        session.mark_setup_complete();
        events.push(ServerEvent::SetupComplete(SetupCompleteInfo {
            model: session.model(),
        }));
    }

    if let Some(content) = message.server_content {
        let input = content.input_transcription.clone();
        let output = content.output_transcription.clone();
        let interrupted = content.interrupted.unwrap_or(false);
        let generation_complete = content.generation_complete.unwrap_or(false);
        let turn_complete = content.turn_complete.unwrap_or(false);

        if content.model_turn.is_some() {
            events.push(ServerEvent::ServerContent(content));
        }
        if let Some(transcription) = input {
            events.push(ServerEvent::InputTranscription(transcription));
        }
        if let Some(transcription) = output {
            events.push(ServerEvent::OutputTranscription(transcription));
        }
        if interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if generation_complete {
            events.push(ServerEvent::GenerationComplete);
        }
        if turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(call) = message.tool_call {
        events.push(ServerEvent::ToolCall(call));
    }
    if let Some(cancellation) = message.tool_call_cancellation {
        events.push(ServerEvent::ToolCallCancellation(cancellation));
    }

    if let Some(go_away) = message.go_away {
        tracing::info!(time_left = %go_away.time_left, "Backend announced disconnect");
        events.push(ServerEvent::GoAway(go_away));
    }

    if let Some(update) = message.session_resumption_update {
        if let Some(handle) = &update.new_handle {
            session.set_resumption_handle(handle.clone());
        }
        events.push(ServerEvent::SessionResumptionUpdate(update));
    }

    if let Some(usage) = message.usage_metadata {
        events.push(ServerEvent::UsageMetadata(usage));
    }

    events
}
