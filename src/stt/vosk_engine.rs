//! Vosk recognizer glue for the streaming provider.

use super::streaming::{FinalResult, RecognizerFactory, StreamingRecognizer, WordConfidence};
use crate::audio::PIPELINE_SAMPLE_RATE;
use crate::error::{AssistantError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use vosk::{DecodingState, Model, Recognizer};

/// Builds Kaldi recognizers from one loaded Vosk model.
pub struct VoskFactory {
    model: Arc<Model>,
}

impl VoskFactory {
    /// Load the Vosk model directory named by configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is missing or the model fails to
    /// load.
    pub fn new(model_path: &str) -> Result<Self> {
        if model_path.is_empty() {
            return Err(AssistantError::Stt(
                "Vosk model path is not configured (models.stt.vosk_model_path)".to_owned(),
            ));
        }
        if !Path::new(model_path).exists() {
            return Err(AssistantError::Stt(format!(
                "Vosk model not found at '{model_path}'"
            )));
        }
        info!("loading Vosk model from '{model_path}'");
        let model = Model::new(model_path)
            .ok_or_else(|| AssistantError::Stt(format!("failed to load Vosk model at '{model_path}'")))?;
        info!("Vosk model loaded");
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

impl RecognizerFactory for VoskFactory {
    fn create(&mut self, grammar: Option<&[String]>) -> Result<Box<dyn StreamingRecognizer>> {
        let sample_rate = PIPELINE_SAMPLE_RATE as f32;
        let mut recognizer = match grammar {
            Some(phrases) => {
                let phrases: Vec<&str> = phrases.iter().map(String::as_str).collect();
                Recognizer::new_with_grammar(&self.model, sample_rate, &phrases)
            }
            None => Recognizer::new(&self.model, sample_rate),
        }
        .ok_or_else(|| AssistantError::Stt("failed to create Kaldi recognizer".to_owned()))?;
        recognizer.set_words(true);
        Ok(Box::new(VoskRecognizer { inner: recognizer }))
    }
}

/// One Kaldi recognizer behind the streaming contract.
struct VoskRecognizer {
    inner: Recognizer,
}

// SAFETY: the recognizer is only ever driven from the STT provider thread;
// the raw pointer inside the Vosk binding never crosses threads while in
// use.
unsafe impl Send for VoskRecognizer {}

impl StreamingRecognizer for VoskRecognizer {
    fn accept_waveform(&mut self, pcm: &[i16]) -> Result<Option<FinalResult>> {
        match self.inner.accept_waveform(pcm) {
            DecodingState::Finalized => {
                let result = self.inner.result();
                let Some(single) = result.single() else {
                    return Ok(None);
                };
                let words = single
                    .result
                    .iter()
                    .map(|word| WordConfidence {
                        word: word.word.to_owned(),
                        conf: word.conf,
                    })
                    .collect();
                Ok(Some(FinalResult {
                    text: single.text.to_owned(),
                    words,
                }))
            }
            DecodingState::Failed => Err(AssistantError::Stt("Vosk decoding failed".to_owned())),
            DecodingState::Running => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
