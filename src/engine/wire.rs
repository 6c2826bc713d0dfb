//! Serde models of the engine's live-session JSON schema.
//!
//! Client messages are externally keyed objects (`setup`, `realtimeInput`,
//! `toolResponse`); server messages arrive as a single object whose present
//! field identifies the kind. Unknown sibling fields are ignored so schema
//! additions on the engine side do not break the client.

use crate::config::{EngineConfig, Sensitivity};
use crate::error::{Result, VoiceError};
use crate::tools::ToolDeclaration;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client → engine
// ---------------------------------------------------------------------------

/// Messages sent from client to engine. Serializes as `{"setup": …}`,
/// `{"realtimeInput": …}` or `{"toolResponse": …}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session negotiation, sent exactly once after the socket opens.
    Setup(Setup),
    /// Streaming input: an audio frame or the end-of-audio marker.
    RealtimeInput(RealtimeInput),
    /// Correlated results for engine-issued tool calls.
    ToolResponse(ToolResponse),
}

/// One-shot session parameters. Immutable for the session's lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolGroup>,
    pub realtime_input_config: RealtimeInputConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyConfig>,
}

/// Marker for engine features enabled by presence alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
    pub language_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Plain-text content block (system instruction).
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Declared tool signatures, grouped the way the engine expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroup {
    pub function_declarations: Vec<ToolDeclaration>,
}

/// Turn-detection tuning forwarded to the engine's detector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub start_of_speech_sensitivity: String,
    pub end_of_speech_sensitivity: String,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

/// Base64 PCM16 payload with its mime type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBlob {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// One correlated tool result. `response` is `{"output": …}` on success or
/// `{"error": …}` on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

impl FunctionResponse {
    /// Wrap a successful provider result.
    pub fn output(id: String, name: String, value: serde_json::Value) -> Self {
        Self {
            id,
            name,
            response: serde_json::json!({ "output": value }),
        }
    }

    /// Wrap a provider failure as an error payload.
    pub fn error(id: String, name: String, message: String) -> Self {
        Self {
            id,
            name,
            response: serde_json::json!({ "error": message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine → client
// ---------------------------------------------------------------------------

/// A message received from the engine. Exactly one of the fields is
/// populated; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallBatch>,
}

/// Model output: audio parts, transcripts, and turn boundary signals.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub generation_complete: bool,
    pub input_transcription: Option<TranscriptionFragment>,
    pub output_transcription: Option<TranscriptionFragment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub inline_data: Option<AudioBlob>,
    pub text: Option<String>,
}

/// A fragment of incremental speech transcription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionFragment {
    pub text: String,
    pub finished: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCallBatch {
    pub function_calls: Vec<FunctionCall>,
}

/// An engine-issued tool invocation request.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Builders and codecs
// ---------------------------------------------------------------------------

impl Sensitivity {
    fn start_token(self) -> &'static str {
        match self {
            Self::High => "START_SENSITIVITY_HIGH",
            Self::Low => "START_SENSITIVITY_LOW",
        }
    }

    fn end_token(self) -> &'static str {
        match self {
            Self::High => "END_SENSITIVITY_HIGH",
            Self::Low => "END_SENSITIVITY_LOW",
        }
    }
}

impl Setup {
    /// Build the one-shot setup message from session configuration and the
    /// declared tool signatures.
    pub fn from_config(config: &EngineConfig, tools: Vec<ToolDeclaration>) -> Self {
        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolGroup {
                function_declarations: tools,
            }]
        };

        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                    language_code: config.language.clone(),
                },
            },
            system_instruction: (!config.persona.is_empty()).then(|| Content {
                parts: vec![TextPart {
                    text: config.persona.clone(),
                }],
            }),
            tools,
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    start_of_speech_sensitivity: config.activity.start_sensitivity.start_token()
                        .to_owned(),
                    end_of_speech_sensitivity: config.activity.end_sensitivity.end_token()
                        .to_owned(),
                    prefix_padding_ms: config.activity.prefix_padding_ms,
                    silence_duration_ms: config.activity.silence_duration_ms,
                },
            },
            input_audio_transcription: config.transcribe_input.then(EmptyConfig::default),
            output_audio_transcription: config.transcribe_output.then(EmptyConfig::default),
        }
    }
}

/// Encode PCM16 bytes as an outbound audio frame message.
pub fn audio_frame(pcm: &[u8], sample_rate: u32) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        audio: Some(AudioBlob {
            data: BASE64.encode(pcm),
            mime_type: format!("audio/pcm;rate={sample_rate}"),
        }),
        audio_stream_end: None,
    })
}

/// The explicit "no more audio" end-marker sent before closing.
pub fn audio_stream_end() -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        audio: None,
        audio_stream_end: Some(true),
    })
}

/// Decode an inbound inline audio payload to f32 samples.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_audio(blob: &AudioBlob) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(&blob.data)
        .map_err(|e| VoiceError::Transport(format!("undecodable audio payload: {e}")))?;
    Ok(crate::audio::pcm::pcm16_le_to_f32(&bytes))
}
