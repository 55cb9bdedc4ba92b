use async_trait::async_trait;

use super::types::GenerationRequest;
use crate::core::errors::ChatError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "gemini")
    fn name(&self) -> &str;

    /// names of the secrets the provider still needs
    fn missing_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// single completion (non-streaming); every failure is `ChatError::Inference`
    async fn generate(&self, request: GenerationRequest) -> Result<String, ChatError>;
}
