//! whisper.cpp transcription engine via whisper-rs.

use super::chunked::TranscriptionEngine;
use crate::error::{AssistantError, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Phrases shorter than this are skipped (0.4 s at 16 kHz); whisper
/// hallucinates on very short clips.
const MIN_SAMPLES: usize = 6_400;

/// Whisper-based transcription engine for the chunked provider.
pub struct WhisperEngine {
    ctx: WhisperContext,
    language: String,
}

impl WhisperEngine {
    /// Load a GGML whisper model.
    ///
    /// `model` is either a file path or a bare model name (e.g. "tiny.en"),
    /// resolved to `data/models/stt/ggml-<name>.bin`.
    ///
    /// # Errors
    ///
    /// Returns an error when the model file is missing or fails to load.
    pub fn new(model: &str, device: &str, language: &str) -> Result<Self> {
        if device == "cuda" {
            // Device selection is a build-time property of whisper.cpp.
            warn!("whisper_device=cuda requires a CUDA-enabled build; using the compiled backend");
        }

        let path = resolve_model_path(model);
        if !path.exists() {
            return Err(AssistantError::Stt(format!(
                "whisper model not found at {}",
                path.display()
            )));
        }

        info!("loading whisper model from {}", path.display());
        let ctx = WhisperContext::new_with_params(
            path.to_str().unwrap_or_default(),
            WhisperContextParameters::default(),
        )
        .map_err(|e| AssistantError::Stt(format!("failed to load whisper model: {e}")))?;
        info!("whisper model loaded");

        Ok(Self {
            ctx,
            language: language.to_owned(),
        })
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn transcribe(&mut self, pcm: &[i16]) -> Result<String> {
        if pcm.len() < MIN_SAMPLES {
            return Ok(String::new());
        }

        let audio: Vec<f32> = pcm.iter().map(|&s| f32::from(s) / 32_768.0).collect();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| AssistantError::Stt(format!("failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_no_timestamps(true);

        state
            .full(params, &audio)
            .map_err(|e| AssistantError::Stt(format!("whisper inference failed: {e}")))?;

        let segments = state
            .full_n_segments()
            .map_err(|e| AssistantError::Stt(format!("failed to get segment count: {e}")))?;
        let mut text = String::new();
        for i in 0..segments {
            if let Ok(segment) = state.full_get_segment_text(i) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(segment.trim());
            }
        }
        Ok(text)
    }
}

/// Resolve a model name or path to an on-disk GGML file.
fn resolve_model_path(model: &str) -> PathBuf {
    let direct = PathBuf::from(model);
    if direct.exists() || model.contains('/') || model.contains('\\') {
        return direct;
    }
    PathBuf::from("data/models/stt").join(format!("ggml-{model}.bin"))
}
