//! eSpeak fallback TTS provider.
//!
//! Shells out to `espeak-ng` (or `espeak`), which renders directly to the
//! default output device. No voice model required, so it works out of the
//! box as a fallback when Piper is not set up.

use super::TtsProvider;
use crate::error::{AssistantError, Result};
use std::process::Command;
use tracing::info;

/// eSpeak-backed synthesizer.
pub struct EspeakProvider {
    binary: &'static str,
}

impl EspeakProvider {
    /// Locate an espeak binary.
    ///
    /// # Errors
    ///
    /// Returns an error when neither `espeak-ng` nor `espeak` is on PATH.
    pub fn new() -> Result<Self> {
        for binary in ["espeak-ng", "espeak"] {
            let probe = Command::new(binary)
                .arg("--version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
            if matches!(probe, Ok(status) if status.success()) {
                info!("using {binary} for speech synthesis");
                return Ok(Self { binary });
            }
        }
        Err(AssistantError::Tts(
            "neither espeak-ng nor espeak found on PATH".to_owned(),
        ))
    }
}

impl TtsProvider for EspeakProvider {
    fn speak(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let status = Command::new(self.binary)
            .arg("--")
            .arg(text)
            .status()
            .map_err(|e| AssistantError::Tts(format!("cannot run {}: {e}", self.binary)))?;
        if !status.success() {
            return Err(AssistantError::Tts(format!(
                "{} exited with {status}",
                self.binary
            )));
        }
        Ok(())
    }
}
