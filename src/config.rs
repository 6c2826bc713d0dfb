//! Configuration types for the voice session client.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KiranaConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Remote engine connection and session parameters.
    pub engine: EngineConfig,
    /// Transcript coalescing settings.
    pub transcript: TranscriptConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. This is the rate frames are sent at,
    /// regardless of the device's native rate.
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz. Inbound engine audio is assumed to
    /// already be at this rate; no local resampling is performed.
    pub output_sample_rate: u32,
    /// Samples per capture frame handed to the transport.
    pub frame_size: usize,
    /// Capacity of the capture frame channel. When full, new frames are
    /// dropped with a warning rather than blocking the audio callback.
    pub frame_channel_capacity: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 2048,
            frame_channel_capacity: 32,
            input_device: None,
            output_device: None,
        }
    }
}

/// Speech-activity sensitivity, as understood by the engine's turn detector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Trigger on less evidence (reacts faster, more false positives).
    #[default]
    High,
    /// Trigger on more evidence (reacts slower, fewer false positives).
    Low,
}

/// Turn-detection tuning forwarded verbatim to the engine at setup.
///
/// All speech-boundary decisions are made remotely; these knobs only shape
/// the engine's detector and are immutable for the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Start-of-speech detection sensitivity.
    pub start_sensitivity: Sensitivity,
    /// End-of-speech detection sensitivity.
    pub end_sensitivity: Sensitivity,
    /// Audio retained before the detected start of speech, in ms.
    pub prefix_padding_ms: u32,
    /// Silence required to commit an end of speech, in ms.
    pub silence_duration_ms: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_sensitivity: Sensitivity::High,
            end_sensitivity: Sensitivity::High,
            prefix_padding_ms: 40,
            silence_duration_ms: 500,
        }
    }
}

/// Remote engine connection and session parameters.
///
/// Everything here is negotiated exactly once in the setup message; changing
/// any of it requires a full disconnect/reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// WebSocket endpoint of the engine's live session API.
    pub endpoint: String,
    /// API key appended to the endpoint query string. Usually supplied via
    /// the environment rather than the config file.
    pub api_key: Option<String>,
    /// Model identifier requested at setup.
    pub model: String,
    /// Prebuilt voice name for synthesized speech.
    pub voice: String,
    /// BCP-47 language code for synthesized speech.
    pub language: String,
    /// System persona text sent at setup.
    pub persona: String,
    /// Request incremental transcripts of the user's speech.
    pub transcribe_input: bool,
    /// Request incremental transcripts of the agent's speech.
    pub transcribe_output: bool,
    /// Turn-detection tuning.
    pub activity: ActivityConfig,
    /// Bounded wait for the engine's setup acknowledgement, in ms.
    pub connect_timeout_ms: u64,
}

/// Default shopkeeper persona for the voice assistant.
const DEFAULT_PERSONA: &str = "You are a friendly neighbourhood grocery shop \
assistant. When the user asks for any product, call the search_products tool \
before saying anything about prices or availability. Report product names and \
prices conversationally, mention the cheapest option, and ask whether to add \
it to the cart. Never invent prices.";

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/\
                       google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
                .to_owned(),
            api_key: None,
            model: "models/gemini-2.5-flash-native-audio-preview-12-2025".to_owned(),
            voice: "Puck".to_owned(),
            language: "en-IN".to_owned(),
            persona: DEFAULT_PERSONA.to_owned(),
            transcribe_input: true,
            transcribe_output: true,
            activity: ActivityConfig::default(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Transcript coalescing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Debounce interval for coalesced transcript updates, in ms.
    pub debounce_ms: u64,
    /// How long the agent-side transcript is retained after turn completion
    /// before it is cleared, in ms.
    pub agent_retention_ms: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            agent_retention_ms: 2_000,
        }
    }
}

impl KiranaConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = KiranaConfig::default();
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.transcript.debounce_ms, 150);
        assert!(config.engine.endpoint.starts_with("wss://"));
        assert!(!config.engine.endpoint.contains(char::is_whitespace));
        assert!(config.engine.transcribe_input);
    }

    #[test]
    fn toml_roundtrip_preserves_fields() {
        let mut config = KiranaConfig::default();
        config.audio.input_sample_rate = 8_000;
        config.engine.voice = "Kore".to_owned();
        config.engine.activity.silence_duration_ms = 900;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: KiranaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.audio.input_sample_rate, 8_000);
        assert_eq!(parsed.engine.voice, "Kore");
        assert_eq!(parsed.engine.activity.silence_duration_ms, 900);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: KiranaConfig = toml::from_str("[audio]\nframe_size = 1024\n").unwrap();
        assert_eq!(parsed.audio.frame_size, 1024);
        assert_eq!(parsed.audio.input_sample_rate, 16_000);
        assert_eq!(parsed.engine.voice, "Puck");
    }

    #[test]
    fn save_and_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kirana.toml");

        let mut config = KiranaConfig::default();
        config.audio.input_device = Some("USB Mic".to_owned());
        config.engine.language = "hi-IN".to_owned();
        config.save_to_file(&path).unwrap();

        let loaded = KiranaConfig::from_file(&path).unwrap();
        assert_eq!(loaded.audio.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(loaded.engine.language, "hi-IN");
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = KiranaConfig::from_file(std::path::Path::new("/nonexistent/kirana.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn sensitivity_serializes_lowercase() {
        let json = serde_json::to_string(&Sensitivity::High).unwrap();
        assert_eq!(json, "\"high\"");
    }
}
