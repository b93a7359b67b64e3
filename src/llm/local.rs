//! Local GGUF inference engine via mistral.rs.
//!
//! `models.llm.path` points at a `.gguf` file, either on disk or as
//! `<hf-repo-id>/<file>.gguf`; the builder resolves both. Inference is
//! serialized behind a mutex on a private runtime so the synchronous
//! [`LanguageModel`] contract holds from any thread.

use super::{GenerationOptions, LanguageModel};
use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use mistralrs::{GgufModelBuilder, Model, RequestBuilder, TextMessageRole, TextMessages};
use std::sync::Mutex;
use tracing::info;

/// GGUF language model loaded into this process.
pub struct LocalGgufModel {
    model: Model,
    runtime: tokio::runtime::Runtime,
    /// Serializes generations; the engine is a single-writer resource.
    gate: Mutex<()>,
}

impl LocalGgufModel {
    /// Load the model named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is malformed or the model fails to load.
    pub fn load(config: &LlmConfig) -> Result<Self> {
        let (location, file) = split_model_path(&config.path)?;
        info!("loading GGUF model {file} from {location}");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| AssistantError::Llm(format!("inference runtime: {e}")))?;

        let model = runtime
            .block_on(
                GgufModelBuilder::new(&location, vec![&file])
                    .with_logging()
                    .build(),
            )
            .map_err(|e| AssistantError::Llm(format!("model load failed: {e}")))?;

        info!("GGUF model loaded");
        Ok(Self {
            model,
            runtime,
            gate: Mutex::new(()),
        })
    }
}

impl LanguageModel for LocalGgufModel {
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let _serial = self
            .gate
            .lock()
            .map_err(|_| AssistantError::Llm("inference gate poisoned".to_owned()))?;

        let messages = TextMessages::new().add_message(TextMessageRole::User, prompt);
        let request = RequestBuilder::from(messages)
            .set_sampler_temperature(f64::from(options.temperature))
            .set_sampler_max_len(options.max_tokens);

        let response = self
            .runtime
            .block_on(self.model.send_chat_request(request))
            .map_err(|e| AssistantError::Llm(format!("generation failed: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default()
            .trim()
            .to_owned();
        Ok(text)
    }
}

/// Split `models.llm.path` into (directory-or-repo, gguf file name).
fn split_model_path(path: &str) -> Result<(String, String)> {
    if !path.ends_with(".gguf") {
        return Err(AssistantError::Llm(format!(
            "LLM path '{path}' must point to a .gguf file"
        )));
    }
    match path.rsplit_once('/') {
        Some((location, file)) if !location.is_empty() => {
            Ok((location.to_owned(), file.to_owned()))
        }
        _ => Ok((".".to_owned(), path.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_local_paths_and_repo_ids() {
        let (dir, file) =
            split_model_path("data/models/llm/mistral-7b-instruct-v0.2.Q4_K_M.gguf").expect("ok");
        assert_eq!(dir, "data/models/llm");
        assert_eq!(file, "mistral-7b-instruct-v0.2.Q4_K_M.gguf");

        let (repo, file) =
            split_model_path("TheBloke/Mistral-7B-Instruct-v0.2-GGUF/model.Q4_K_M.gguf")
                .expect("ok");
        assert_eq!(repo, "TheBloke/Mistral-7B-Instruct-v0.2-GGUF");
        assert_eq!(file, "model.Q4_K_M.gguf");
    }

    #[test]
    fn bare_file_name_resolves_to_cwd() {
        let (dir, file) = split_model_path("model.gguf").expect("ok");
        assert_eq!(dir, ".");
        assert_eq!(file, "model.gguf");
    }

    #[test]
    fn non_gguf_path_is_rejected() {
        assert!(split_model_path("data/models/llm").is_err());
    }
}
