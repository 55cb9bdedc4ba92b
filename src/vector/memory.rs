//! In-process vector index.
//!
//! Collections live for the lifetime of the client, keyed by index name.
//! Handles share the collection, so an overwrite is visible through every
//! handle bound to that name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{embed_documents, IndexHandle, VectorIndexClient};
use crate::core::errors::ChatError;
use crate::embedding::Embedder;
use crate::loader::Document;

struct Collection {
    dimension: usize,
    entries: Vec<(Vec<f32>, Document)>,
}

type SharedCollection = Arc<RwLock<Collection>>;

#[derive(Clone, Default)]
pub struct MemoryIndexClient {
    indexes: Arc<RwLock<HashMap<String, SharedCollection>>>,
    batch_size: usize,
}

impl MemoryIndexClient {
    pub fn new(batch_size: usize) -> Self {
        Self {
            indexes: Arc::default(),
            batch_size,
        }
    }

    fn collection(&self, index_name: &str) -> Result<Option<SharedCollection>, ChatError> {
        let indexes = self.indexes.read().map_err(ChatError::internal)?;
        Ok(indexes.get(index_name).cloned())
    }
}

#[async_trait]
impl VectorIndexClient for MemoryIndexClient {
    fn provider(&self) -> &str {
        "memory"
    }

    async fn create_or_overwrite(
        &self,
        index_name: &str,
        documents: Vec<Document>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError> {
        let existing = self.collection(index_name)?;
        let dimension = match &existing {
            Some(collection) => collection.read().map_err(ChatError::internal)?.dimension,
            None => embedder.dimension(),
        };

        let vectors =
            embed_documents(embedder.as_ref(), &documents, self.batch_size, dimension).await?;
        let entries: Vec<_> = vectors.into_iter().zip(documents).collect();
        let count = entries.len();

        let collection = match existing {
            Some(collection) => {
                collection.write().map_err(ChatError::internal)?.entries = entries;
                collection
            }
            None => {
                let collection = Arc::new(RwLock::new(Collection { dimension, entries }));
                self.indexes
                    .write()
                    .map_err(ChatError::internal)?
                    .insert(index_name.to_string(), collection.clone());
                collection
            }
        };

        tracing::info!("Memory index '{}' now holds {} documents", index_name, count);
        Ok(Arc::new(MemoryIndexHandle {
            index_name: index_name.to_string(),
            collection,
            embedder,
        }))
    }

    async fn connect(
        &self,
        index_name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError> {
        let collection = self
            .collection(index_name)?
            .ok_or_else(|| ChatError::NotFound(format!("index '{}'", index_name)))?;
        Ok(Arc::new(MemoryIndexHandle {
            index_name: index_name.to_string(),
            collection,
            embedder,
        }))
    }
}

struct MemoryIndexHandle {
    index_name: String,
    collection: SharedCollection,
    embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl IndexHandle for MemoryIndexHandle {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, ChatError> {
        let query_vector = self.embedder.embed(query).await?;
        let collection = self.collection.read().map_err(ChatError::internal)?;

        let mut scored: Vec<(f32, &Document)> = collection
            .entries
            .iter()
            .map(|(vector, doc)| (cosine_similarity(&query_vector, vector), doc))
            .collect();
        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
