//! Stuff-style question answering over a vector index.

use std::sync::Arc;

use super::prompt::build_stuff_prompt;
use crate::core::config::LlmSettings;
use crate::core::errors::ChatError;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::vector::IndexHandle;

pub struct AnswerEngine {
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    top_k: usize,
}

impl AnswerEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        Self {
            llm,
            model: settings.model.clone(),
            temperature: settings.temperature,
            top_k: settings.top_k,
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Retrieves the top-k rows for `query` and returns the model's answer.
    ///
    /// Retrieval errors keep their kind; anything the model call raises is
    /// reported as `Inference`.
    pub async fn answer(&self, query: &str, index: &dyn IndexHandle) -> Result<String, ChatError> {
        let documents = index.search(query, self.top_k).await?;
        tracing::debug!(
            "Retrieved {} documents from '{}' for the question",
            documents.len(),
            index.index_name()
        );

        let prompt = build_stuff_prompt(&documents, query);
        let request =
            GenerationRequest::new(self.model.clone(), prompt).with_temperature(self.temperature);

        self.llm.generate(request).await.map_err(|err| match err {
            ChatError::Inference(message) => ChatError::Inference(message),
            other => ChatError::Inference(other.to_string()),
        })
    }
}
