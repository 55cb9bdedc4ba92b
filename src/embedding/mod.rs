//! Text embedding.
//!
//! One embedder is built at start-up and shared by reference with every
//! component that needs vectors.

mod onnx;

pub use onnx::OnnxEmbedder;

use async_trait::async_trait;

use crate::core::errors::ChatError;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ChatError::Internal("embedder returned no vector".to_string()))
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
