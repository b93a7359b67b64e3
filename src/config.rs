//! Configuration for all assistant processes.
//!
//! Every process loads the same `config.yaml` once at startup. The file is
//! deserialized into typed sections; an untyped dot-path accessor is kept for
//! provider-specific keys that the core does not model.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inter-process channel ports (all loopback TCP).
    pub ipc: IpcConfig,
    /// Model locations and inference knobs.
    pub models: ModelsConfig,
    /// Dispatcher phrases and tuning.
    pub assistant: AssistantConfig,
    /// Audio capture tuning.
    pub audio: AudioConfig,
    /// Skill discovery settings.
    pub skills: SkillsConfig,
    /// Global hotkeys.
    pub hotkeys: HotkeysConfig,
    /// Log sinks.
    pub logging: LoggingConfig,

    /// Raw document for dot-path lookups of unmodeled keys.
    #[serde(skip)]
    raw: Option<serde_yaml::Value>,
}

/// Channel port assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Backend request-reply port.
    pub command_port: u16,
    /// Event publish port.
    pub event_bus_port: u16,
    /// Frontend typed-command ingress port.
    pub text_command_port: u16,
    /// Log broadcast publish port.
    pub log_broadcast_port: u16,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            command_port: 5555,
            event_bus_port: 5556,
            text_command_port: 5557,
            log_broadcast_port: 5558,
        }
    }
}

/// Model configuration for the three inference components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub stt: SttConfig,
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Local GGUF path or HuggingFace repo id.
    pub path: String,
    /// Layers to offload to the GPU (0 = CPU only).
    pub gpu_layers: u32,
    /// Context window in tokens.
    pub context_length: usize,
    /// Generation cap for conversational replies.
    pub max_new_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            gpu_layers: 0,
            context_length: 2048,
            max_new_tokens: 150,
        }
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Provider name ("piper" or "espeak").
    pub provider: String,
    /// Path to the Piper voice model (.onnx; the .json config sits beside it).
    pub piper_voice_model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "piper".to_owned(),
            piper_voice_model: String::new(),
        }
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Provider name ("vosk" or "whisper").
    pub provider: String,
    /// Whisper model name (e.g. "tiny.en") or GGML file path.
    pub whisper_model_name: String,
    /// Inference device for Whisper ("cpu" or "cuda").
    pub whisper_device: String,
    /// Path to the Vosk model directory.
    pub vosk_model_path: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "vosk".to_owned(),
            whisper_model_name: "tiny.en".to_owned(),
            whisper_device: "cpu".to_owned(),
            vosk_model_path: String::new(),
        }
    }
}

/// Dispatcher phrases and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Phrases that wake the assistant from DORMANT.
    pub activation_phrases: Vec<String>,
    /// Phrases that pause the assistant back to DORMANT.
    pub deactivation_phrases: Vec<String>,
    /// Phrases that exit the application entirely.
    pub exit_phrases: Vec<String>,
    /// Token-set similarity threshold (0–100) for phrase matching.
    pub fuzzy_match_threshold: u8,
    /// Seconds a skill worker may run before it is killed.
    pub skill_timeout: u64,
    /// Number of user/assistant exchanges kept in conversation history.
    pub conversation_history_length: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            activation_phrases: vec![
                "hey assist".to_owned(),
                "assist start".to_owned(),
                "okay assist".to_owned(),
                "ok assist".to_owned(),
            ],
            deactivation_phrases: vec!["assist pause".to_owned()],
            exit_phrases: vec!["assist exit".to_owned()],
            fuzzy_match_threshold: 85,
            skill_timeout: 5,
            conversation_history_length: 5,
        }
    }
}

/// Audio capture tuning, nested under `audio.stt` in the YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub stt: AudioSttConfig,
}

/// STT audio-front-end tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSttConfig {
    /// RMS energy above which a PCM16 chunk counts as speech.
    pub energy_threshold: f64,
    /// Minimum average per-word confidence accepted while LISTENING.
    pub confidence_threshold: f64,
    /// Seconds of silence that end a phrase for the streaming recognizer.
    pub pause_threshold: f64,
    /// Seconds to wait for speech before a listen attempt gives up.
    pub listen_timeout: f64,
    /// Chunked-recognizer VAD tuning.
    pub whisper_vad: WhisperVadConfig,
    /// Subtract a captured noise profile from each chunk.
    pub use_noise_cancellation: bool,
    /// Where the captured noise profile is persisted.
    pub noise_profile_path: String,
    /// Raise the energy threshold from ambient noise measured at startup.
    pub use_dynamic_energy: bool,
    /// Recognition language hint.
    pub language: String,
}

impl Default for AudioSttConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            confidence_threshold: 0.85,
            pause_threshold: 0.8,
            listen_timeout: 5.0,
            whisper_vad: WhisperVadConfig::default(),
            use_noise_cancellation: false,
            noise_profile_path: "data/noise_profile.json".to_owned(),
            use_dynamic_energy: false,
            language: "en".to_owned(),
        }
    }
}

/// Energy-gated VAD tuning for the chunked recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperVadConfig {
    /// Silence gap in seconds that finalizes a buffered phrase.
    pub phrase_timeout: f64,
    /// RMS energy threshold for the chunked VAD gate.
    pub energy_threshold: f64,
}

impl Default for WhisperVadConfig {
    fn default() -> Self {
        Self {
            phrase_timeout: 1.0,
            energy_threshold: 300.0,
        }
    }
}

/// Skill discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Directory scanned for skill manifests at backend startup.
    pub directory: String,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            directory: "skills".to_owned(),
        }
    }
}

/// Global hotkey combinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeysConfig {
    /// Combination that quits the frontend (e.g. "ctrl+alt+q").
    pub quit: String,
}

impl Default for HotkeysConfig {
    fn default() -> Self {
        Self {
            quit: "ctrl+alt+q".to_owned(),
        }
    }
}

/// Log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotating log files.
    pub folder: String,
    /// Mirror records to the console.
    pub console_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            folder: "data/logs".to_owned(),
            console_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. A missing file
    /// is an error at this level; callers that want defaults use
    /// [`Config::load_or_default`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Load `config.yaml` from the working directory, falling back to
    /// defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{e}; continuing with default configuration");
                Self::default()
            }
        }
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| AssistantError::Config(format!("invalid YAML: {e}")))?;
        let mut config: Self = serde_yaml::from_value(raw.clone())
            .map_err(|e| AssistantError::Config(format!("invalid configuration: {e}")))?;
        config.raw = Some(raw);
        Ok(config)
    }

    /// Look up an unmodeled value by dot-separated path.
    ///
    /// Returns `None` when any path segment is missing, matching the lenient
    /// lookup semantics the typed sections already provide via defaults.
    pub fn get(&self, dotted: &str) -> Option<&serde_yaml::Value> {
        let mut node = self.raw.as_ref()?;
        for key in dotted.split('.') {
            node = node.get(key)?;
        }
        Some(node)
    }

    /// Look up a string by dot-separated path, with a default.
    pub fn get_str(&self, dotted: &str, default: &str) -> String {
        self.get(dotted)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_owned()
    }

    /// Resolve the fact-store database path (`data/memory/memory.db` under
    /// the working directory unless overridden by `memory.db_path`).
    pub fn memory_db_path(&self) -> PathBuf {
        PathBuf::from(self.get_str("memory.db_path", "data/memory/memory.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ports() {
        let config = Config::default();
        assert_eq!(config.ipc.command_port, 5555);
        assert_eq!(config.ipc.event_bus_port, 5556);
        assert_eq!(config.ipc.text_command_port, 5557);
        assert_eq!(config.ipc.log_broadcast_port, 5558);
    }

    #[test]
    fn defaults_cover_dispatcher_tuning() {
        let config = Config::default();
        assert_eq!(config.assistant.fuzzy_match_threshold, 85);
        assert_eq!(config.assistant.skill_timeout, 5);
        assert_eq!(config.assistant.conversation_history_length, 5);
        assert!(
            config
                .assistant
                .activation_phrases
                .contains(&"hey assist".to_owned())
        );
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = Config::from_yaml("ipc:\n  command_port: 6000\n").expect("parse");
        assert_eq!(config.ipc.command_port, 6000);
        assert_eq!(config.ipc.event_bus_port, 5556);
        assert_eq!(config.models.stt.provider, "vosk");
    }

    #[test]
    fn dot_path_lookup_reads_unmodeled_keys() {
        let config =
            Config::from_yaml("models:\n  stt:\n    beam_width: 13\n").expect("parse");
        let value = config.get("models.stt.beam_width").expect("present");
        assert_eq!(value.as_u64(), Some(13));
        assert!(config.get("models.stt.missing").is_none());
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = Config::from_yaml(": not yaml").expect_err("must fail");
        assert!(matches!(err, AssistantError::Config(_)));
    }

    #[test]
    fn audio_defaults() {
        let config = Config::default();
        assert!((config.audio.stt.confidence_threshold - 0.85).abs() < f64::EPSILON);
        assert!((config.audio.stt.whisper_vad.phrase_timeout - 1.0).abs() < f64::EPSILON);
    }
}
