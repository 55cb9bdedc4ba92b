//! Vector index clients.
//!
//! A [`VectorIndexClient`] owns the connection to an index service; the
//! [`IndexHandle`]s it returns are what a session keeps for retrieval.

mod memory;
mod pinecone;

pub use memory::MemoryIndexClient;
pub use pinecone::PineconeClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::ChatError;
use crate::embedding::Embedder;
use crate::loader::Document;

#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    fn provider(&self) -> &str;

    /// Names of the secrets this client still needs before it can be used.
    fn missing_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Embeds `documents` and replaces the whole content of `index_name`
    /// with them.
    async fn create_or_overwrite(
        &self,
        index_name: &str,
        documents: Vec<Document>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError>;

    /// Binds to an existing index without modifying it.
    async fn connect(
        &self,
        index_name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError>;
}

#[async_trait]
pub trait IndexHandle: Send + Sync {
    fn index_name(&self) -> &str;

    /// At most `k` documents, most similar first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, ChatError>;
}

/// Embeds documents in `batch_size` groups and checks every vector against
/// the index dimension.
pub(crate) async fn embed_documents(
    embedder: &dyn Embedder,
    documents: &[Document],
    batch_size: usize,
    index_dimension: usize,
) -> Result<Vec<Vec<f32>>, ChatError> {
    let mut vectors = Vec::with_capacity(documents.len());
    for batch in documents.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|doc| doc.text.clone()).collect();
        let embedded = embedder.embed_batch(&texts).await?;
        if embedded.len() != texts.len() {
            return Err(ChatError::Internal(format!(
                "embedder returned {} vectors for {} documents",
                embedded.len(),
                texts.len()
            )));
        }
        vectors.extend(embedded);
    }

    if let Some(bad) = vectors.iter().find(|v| v.len() != index_dimension) {
        return Err(ChatError::Upload(format!(
            "vector dimension {} does not match index dimension {}",
            bad.len(),
            index_dimension
        )));
    }
    Ok(vectors)
}
