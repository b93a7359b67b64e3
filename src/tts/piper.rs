//! Piper TTS provider.
//!
//! Synthesis runs the `piper` executable with the configured voice model
//! and streams the resulting WAV to the default output device. The voice
//! model is an `.onnx` file with its `.json` config beside it.

use super::TtsProvider;
use crate::audio::playback::Playback;
use crate::error::{AssistantError, Result};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;

/// Piper-backed synthesizer. Holds the process-wide speaker handle for the
/// duration of each utterance.
pub struct PiperProvider {
    voice_model: PathBuf,
    playback: Playback,
}

impl PiperProvider {
    /// Validate the voice model and open the output device.
    ///
    /// # Errors
    ///
    /// Returns an error when the model files are missing or no output
    /// device exists.
    pub fn new(voice_model: &str) -> Result<Self> {
        if voice_model.is_empty() {
            return Err(AssistantError::Tts(
                "Piper voice model is not configured (models.tts.piper_voice_model)".to_owned(),
            ));
        }
        let voice_model = PathBuf::from(voice_model);
        let voice_config = PathBuf::from(format!("{}.json", voice_model.display()));
        if !voice_model.exists() || !voice_config.exists() {
            return Err(AssistantError::Tts(format!(
                "Piper voice model or config not found at '{}'",
                voice_model.display()
            )));
        }

        let playback = Playback::open()?;
        info!("Piper voice loaded from {}", voice_model.display());
        Ok(Self {
            voice_model,
            playback,
        })
    }
}

impl TtsProvider for PiperProvider {
    fn speak(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        let mut child = Command::new("piper")
            .arg("--model")
            .arg(&self.voice_model)
            .arg("--output_file")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AssistantError::Tts(format!("cannot run piper: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| AssistantError::Tts(format!("cannot write to piper: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| AssistantError::Tts(format!("piper failed: {e}")))?;
        if !output.status.success() {
            return Err(AssistantError::Tts(format!(
                "piper exited with {}",
                output.status
            )));
        }

        let (samples, sample_rate) = decode_wav(&output.stdout)?;
        self.playback.play(&samples, sample_rate)
    }
}

/// Decode a PCM16 WAV byte stream.
fn decode_wav(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AssistantError::Tts(format!("invalid WAV from synthesizer: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AssistantError::Tts(format!(
            "unsupported WAV format: {:?} {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let samples: std::result::Result<Vec<i16>, _> = reader.into_samples::<i16>().collect();
    let samples = samples.map_err(|e| AssistantError::Tts(format!("WAV decode: {e}")))?;
    Ok((samples, spec.sample_rate))
}
