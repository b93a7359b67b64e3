//! Error types for the assistant platform.

/// Top-level error type shared by every subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text provider error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech provider error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Fact store / persistence error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Skill loading or execution error.
    #[error("skill error: {0}")]
    Skill(String),

    /// Inter-process channel error (sockets, wire framing).
    #[error("IPC error: {0}")]
    Ipc(String),

    /// In-process channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
