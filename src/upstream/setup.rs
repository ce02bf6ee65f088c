//! Setup defaults and the single merge that applies them.
//!
//! Caller-supplied values win field by field. A caller that sets only
//! `generationConfig.temperature` still gets the default modality, voice
//! and token limit.

use serde_json::{json, Value};

use crate::config::UpstreamConfig;
use crate::protocol::client::{GenerationConfig, RealtimeInputConfig, SetupRequest};
use crate::protocol::upstream::{qualified_model, UpstreamSetup};

/// Options the relay fills in when the client leaves them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDefaults {
    pub response_modality: String,
    pub voice: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub transcription: bool,
    pub vad_sensitivity: String,
}

impl From<&UpstreamConfig> for SetupDefaults {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            response_modality: config.response_modality.clone(),
            voice: config.default_voice.clone(),
            temperature: config.default_temperature,
            max_output_tokens: config.default_max_output_tokens,
            transcription: config.transcription,
            vad_sensitivity: config.vad_sensitivity.clone(),
        }
    }
}

impl Default for SetupDefaults {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

impl SetupDefaults {
    fn speech_config(&self) -> Value {
        json!({ "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } } })
    }

    fn activity_detection(&self) -> Value {
        json!({
            "disabled": false,
            "startOfSpeechSensitivity": format!("START_SENSITIVITY_{}", self.vad_sensitivity),
            "endOfSpeechSensitivity": format!("END_SENSITIVITY_{}", self.vad_sensitivity),
        })
    }

    fn transcription(&self) -> Option<Value> {
        self.transcription.then(|| json!({}))
    }
}

/// Build the upstream setup frame for a client request.
pub fn build_setup(request: &SetupRequest, defaults: &SetupDefaults) -> UpstreamSetup {
    let mut generation = request.generation_config.clone().unwrap_or_default();
    merge_generation(&mut generation, defaults);
    if generation.thinking_config.is_none() {
        generation.thinking_config = request.thinking_config.clone();
    }

    let mut realtime = request.realtime_input_config.clone().unwrap_or_default();
    merge_realtime(&mut realtime, defaults);

    UpstreamSetup {
        model: qualified_model(&request.model),
        generation_config: generation,
        system_instruction: request.system_instruction.clone().map(system_instruction),
        tools: request.tools.clone(),
        input_audio_transcription: request
            .input_audio_transcription
            .clone()
            .or_else(|| defaults.transcription()),
        output_audio_transcription: request
            .output_audio_transcription
            .clone()
            .or_else(|| defaults.transcription()),
        realtime_input_config: realtime,
        session_resumption: request.session_resumption.clone(),
        context_window_compression: request.context_window_compression.clone(),
        proactivity: request.proactivity.clone(),
        enable_affective_dialog: request.enable_affective_dialog,
    }
}

fn merge_generation(config: &mut GenerationConfig, defaults: &SetupDefaults) {
    config
        .response_modalities
        .get_or_insert_with(|| vec![defaults.response_modality.clone()]);
    config.speech_config.get_or_insert_with(|| defaults.speech_config());
    config.temperature.get_or_insert(defaults.temperature);
    config.max_output_tokens.get_or_insert(defaults.max_output_tokens);
}

fn merge_realtime(config: &mut RealtimeInputConfig, defaults: &SetupDefaults) {
    config
        .automatic_activity_detection
        .get_or_insert_with(|| defaults.activity_detection());
}

/// A bare string instruction becomes a single-part content object.
fn system_instruction(value: Value) -> Value {
    match value {
        Value::String(text) => json!({ "parts": [{ "text": text }] }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> SetupRequest {
        SetupRequest {
            model: model.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_request_gets_every_default() {
        let setup = build_setup(&request("m1"), &SetupDefaults::default());
        let json = serde_json::to_value(&setup).unwrap();

        assert_eq!(json["model"], "models/m1");
        assert_eq!(json["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4096);
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["inputAudioTranscription"], json!({}));
        assert_eq!(json["outputAudioTranscription"], json!({}));
        assert_eq!(
            json["realtimeInputConfig"]["automaticActivityDetection"],
            json!({
                "disabled": false,
                "startOfSpeechSensitivity": "START_SENSITIVITY_HIGH",
                "endOfSpeechSensitivity": "END_SENSITIVITY_HIGH"
            })
        );
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn caller_fields_override_individually() {
        let mut req = request("models/m2");
        req.generation_config = Some(GenerationConfig {
            temperature: Some(0.1),
            response_modalities: Some(vec!["TEXT".into()]),
            ..Default::default()
        });
        req.realtime_input_config = Some(RealtimeInputConfig {
            turn_coverage: Some("TURN_INCLUDES_ALL_INPUT".into()),
            ..Default::default()
        });

        let setup = build_setup(&req, &SetupDefaults::default());
        assert_eq!(setup.model, "models/m2");
        assert_eq!(setup.generation_config.temperature, Some(0.1));
        assert_eq!(setup.generation_config.response_modalities, Some(vec!["TEXT".to_string()]));
        assert_eq!(setup.generation_config.max_output_tokens, Some(4096));
        assert!(setup.generation_config.speech_config.is_some());
        assert_eq!(
            setup.realtime_input_config.turn_coverage.as_deref(),
            Some("TURN_INCLUDES_ALL_INPUT")
        );
        assert!(setup.realtime_input_config.automatic_activity_detection.is_some());
    }

    #[test]
    fn caller_transcription_and_vad_replace_defaults() {
        let mut req = request("m");
        req.input_audio_transcription = Some(json!({ "languageCode": "de" }));
        req.realtime_input_config = Some(RealtimeInputConfig {
            automatic_activity_detection: Some(json!({ "disabled": true })),
            ..Default::default()
        });

        let setup = build_setup(&req, &SetupDefaults::default());
        assert_eq!(setup.input_audio_transcription, Some(json!({ "languageCode": "de" })));
        assert_eq!(
            setup.realtime_input_config.automatic_activity_detection,
            Some(json!({ "disabled": true }))
        );
    }

    #[test]
    fn transcription_can_be_disabled_by_config() {
        let defaults = SetupDefaults {
            transcription: false,
            ..Default::default()
        };
        let setup = build_setup(&request("m"), &defaults);
        assert!(setup.input_audio_transcription.is_none());
        assert!(setup.output_audio_transcription.is_none());
    }

    #[test]
    fn string_system_instruction_is_wrapped() {
        let mut req = request("m");
        req.system_instruction = Some(json!("be brief"));
        req.thinking_config = Some(json!({ "thinkingBudget": 0 }));

        let setup = build_setup(&req, &SetupDefaults::default());
        assert_eq!(setup.system_instruction, Some(json!({ "parts": [{ "text": "be brief" }] })));
        assert_eq!(setup.generation_config.thinking_config, Some(json!({ "thinkingBudget": 0 })));
    }
}
