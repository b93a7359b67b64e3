//! Language model access.
//!
//! The rest of the system treats the LLM as an opaque text-to-text oracle
//! behind [`LanguageModel`]; the concrete engine is chosen at startup. The
//! local GGUF engine lives in [`local`] behind the `local-llm` feature so
//! the control plane builds without the inference stack.

pub mod prompt;

#[cfg(feature = "local-llm")]
pub mod local;

use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use std::sync::Mutex;
use tracing::error;

/// Sampling knobs for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl GenerationOptions {
    /// Deterministic settings for structured tasks (routing JSON).
    pub fn structured() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    /// Conversational settings bounded by the configured token budget.
    pub fn conversational(config: &LlmConfig) -> Self {
        Self {
            temperature: 0.7,
            max_tokens: config.max_new_tokens,
        }
    }
}

/// A text-to-text language model.
///
/// Implementations serialize inference internally; callers hold a single
/// shared handle and never run two generations concurrently.
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// Build the configured language model.
///
/// Returns `Ok(None)` with a logged error when the model cannot be loaded;
/// the backend degrades to fast-path-only dispatch rather than failing to
/// start.
pub fn initialize_llm(config: &LlmConfig) -> Option<Box<dyn LanguageModel>> {
    if config.path.is_empty() {
        error!("LLM model path is not configured (models.llm.path)");
        return None;
    }

    #[cfg(feature = "local-llm")]
    {
        match local::LocalGgufModel::load(config) {
            Ok(model) => {
                tracing::info!("language model loaded from {}", config.path);
                return Some(Box::new(model));
            }
            Err(e) => {
                error!("failed to load language model: {e}");
                return None;
            }
        }
    }

    #[cfg(not(feature = "local-llm"))]
    {
        error!(
            "LLM path '{}' configured but this build has no inference engine \
             (compile with --features local-llm)",
            config.path
        );
        return None;
    }
}

/// A scripted model for tests and tooling.
///
/// Replies are consumed in order; when the script runs dry the fallback
/// reply is returned. Every prompt is recorded for inspection.
pub struct ScriptedModel {
    replies: Mutex<Vec<String>>,
    prompts: Mutex<Vec<(String, GenerationOptions)>>,
    fallback: String,
}

impl ScriptedModel {
    /// A model that replies with `replies` in order, then `fallback`.
    pub fn new(replies: Vec<String>, fallback: impl Into<String>) -> Self {
        let mut ordered = replies;
        ordered.reverse();
        Self {
            replies: Mutex::new(ordered),
            prompts: Mutex::new(Vec::new()),
            fallback: fallback.into(),
        }
    }

    /// A model that always replies with the same text.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(Vec::new(), reply)
    }

    /// Every prompt seen so far, with its options.
    pub fn recorded_prompts(&self) -> Vec<(String, GenerationOptions)> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| AssistantError::Llm("scripted model poisoned".to_owned()))?
            .push((prompt.to_owned(), *options));
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| AssistantError::Llm("scripted model poisoned".to_owned()))?;
        Ok(replies.pop().unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new(vec!["one".into(), "two".into()], "dry");
        let options = GenerationOptions::structured();
        assert_eq!(model.generate("a", &options).expect("ok"), "one");
        assert_eq!(model.generate("b", &options).expect("ok"), "two");
        assert_eq!(model.generate("c", &options).expect("ok"), "dry");
        assert_eq!(model.recorded_prompts().len(), 3);
    }

    #[test]
    fn structured_options_are_deterministic() {
        let options = GenerationOptions::structured();
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.max_tokens, 256);
    }

    #[test]
    fn conversational_options_respect_config() {
        let config = LlmConfig {
            max_new_tokens: 99,
            ..LlmConfig::default()
        };
        let options = GenerationOptions::conversational(&config);
        assert_eq!(options.max_tokens, 99);
        assert!(options.temperature > 0.0);
    }

    #[test]
    fn missing_path_yields_no_model() {
        assert!(initialize_llm(&LlmConfig::default()).is_none());
    }
}
