//! ONNX Runtime sentence-transformer embedder.
//!
//! Runs an exported sentence-transformers model (all-mpnet-base-v2 by
//! default): tokenize with truncation, run the encoder, mean-pool token
//! embeddings under the attention mask and L2-normalise.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use super::{l2_normalize, Embedder};
use crate::core::config::EmbeddingSettings;
use crate::core::errors::ChatError;

const ONNX_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Clone)]
pub struct OnnxEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    dimension: usize,
    pad_id: i64,
    /// BERT-style exports take `token_type_ids`; MPNet exports do not.
    uses_token_types: bool,
}

impl std::fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbedder {
    /// Resolves the model files (configured paths, else the HuggingFace
    /// cache) and loads the session on the blocking pool.
    pub async fn from_settings(settings: &EmbeddingSettings, cache_dir: &Path) -> Result<Self> {
        let (model_path, tokenizer_path) = resolve_model_files(settings, cache_dir).await?;

        let model_name = settings.model_name.clone();
        let dimension = settings.dimension;
        let max_length = settings.max_length;
        tokio::task::spawn_blocking(move || {
            Self::load(model_name, &model_path, &tokenizer_path, dimension, max_length)
        })
        .await
        .context("embedding model loader panicked")?
    }

    pub fn load(
        model_name: impl Into<String>,
        model_path: &Path,
        tokenizer_path: &Path,
        dimension: usize,
        max_length: usize,
    ) -> Result<Self> {
        let model_name = model_name.into();
        if !model_path.exists() {
            anyhow::bail!("ONNX model file not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;
        let uses_token_types = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
        let pad_id = tokenizer
            .token_to_id("<pad>")
            .or_else(|| tokenizer.token_to_id("[PAD]"))
            .unwrap_or(0) as i64;

        let embedder = Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            dimension,
            pad_id,
            uses_token_types,
        };

        let sample = embedder.encode_batch(&["dimension check".to_string()])?;
        if sample.first().map(Vec::len) != Some(dimension) {
            anyhow::bail!(
                "Model {} produced {:?} dimensions, expected {}",
                embedder.model_name,
                sample.first().map(Vec::len),
                dimension
            );
        }

        info!(
            "Loaded embedding model {} ({} dims)",
            embedder.model_name, dimension
        );
        Ok(embedder)
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let max_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            input_ids.extend(ids.iter().map(|&id| id as i64));
            attention_mask.extend(mask.iter().map(|&m| m as i64));

            let padding = max_len - ids.len();
            input_ids.extend(std::iter::repeat(self.pad_id).take(padding));
            attention_mask.extend(std::iter::repeat(0i64).take(padding));
        }

        let shape = (texts.len(), max_len);
        let mask_for_pooling = Array2::from_shape_vec(shape, attention_mask.clone())
            .context("Failed to create pooling mask")?;
        let input_ids = Array2::from_shape_vec(shape, input_ids)
            .context("Failed to create input_ids array")?;
        let attention_mask = Array2::from_shape_vec(shape, attention_mask)
            .context("Failed to create attention_mask array")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding session lock poisoned"))?;
        let outputs = if self.uses_token_types {
            let token_type_ids = Array2::<i64>::zeros(shape);
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids)?,
                "attention_mask" => Value::from_array(attention_mask)?,
                "token_type_ids" => Value::from_array(token_type_ids)?
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids)?,
                "attention_mask" => Value::from_array(attention_mask)?
            ])?
        };

        // [batch, seq_len, hidden]
        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;
        if hidden.ndim() != 3 {
            anyhow::bail!("Unexpected model output shape {:?}", hidden.shape());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for (batch_idx, item) in hidden.axis_iter(Axis(0)).enumerate() {
            let hidden_dim = item.shape()[1];
            let mut pooled = vec![0.0f32; hidden_dim];
            let mut mask_sum = 0.0f32;
            for (token_idx, token) in item.axis_iter(Axis(0)).enumerate() {
                let weight = mask_for_pooling[[batch_idx, token_idx]] as f32;
                if weight == 0.0 {
                    continue;
                }
                mask_sum += weight;
                for (slot, value) in pooled.iter_mut().zip(token.iter()) {
                    *slot += value * weight;
                }
            }
            for slot in &mut pooled {
                *slot /= mask_sum.max(1e-9);
            }
            l2_normalize(&mut pooled);
            embeddings.push(pooled);
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        let this = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || this.encode_batch(&texts))
            .await
            .map_err(ChatError::internal)?
            .map_err(|e| ChatError::Internal(format!("embedding failed: {:#}", e)))
    }
}

async fn resolve_model_files(
    settings: &EmbeddingSettings,
    cache_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    if let (Some(model), Some(tokenizer)) = (&settings.model_path, &settings.tokenizer_path) {
        return Ok((model.clone(), tokenizer.clone()));
    }

    info!(
        "Fetching {} from the HuggingFace hub into {}",
        settings.model_name,
        cache_dir.display()
    );
    let api = hf_hub::api::tokio::ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .context("Failed to build HuggingFace hub client")?;
    let repo = api.model(settings.model_name.clone());

    let model = match &settings.model_path {
        Some(path) => path.clone(),
        None => repo
            .get(ONNX_FILE)
            .await
            .with_context(|| format!("Failed to download {}/{}", settings.model_name, ONNX_FILE))?,
    };
    let tokenizer = match &settings.tokenizer_path {
        Some(path) => path.clone(),
        None => repo.get(TOKENIZER_FILE).await.with_context(|| {
            format!("Failed to download {}/{}", settings.model_name, TOKENIZER_FILE)
        })?,
    };
    Ok((model, tokenizer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_settings() -> Option<EmbeddingSettings> {
        let dir = std::env::var("ECOCHAT_TEST_MODEL_DIR").ok()?;
        let dir = PathBuf::from(dir);
        Some(EmbeddingSettings {
            model_path: Some(dir.join(ONNX_FILE)),
            tokenizer_path: Some(dir.join(TOKENIZER_FILE)),
            ..EmbeddingSettings::default()
        })
    }

    #[test]
    fn load_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::load(
            "missing",
            &dir.path().join("model.onnx"),
            &dir.path().join("tokenizer.json"),
            768,
            384,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    #[ignore] // needs ECOCHAT_TEST_MODEL_DIR with an all-mpnet-base-v2 export
    async fn embeddings_are_deterministic_and_normalised() {
        let settings = local_settings().expect("ECOCHAT_TEST_MODEL_DIR not set");
        let cache = tempfile::tempdir().unwrap();
        let embedder = OnnxEmbedder::from_settings(&settings, cache.path())
            .await
            .unwrap();

        let first = embedder.embed("How old is Bob?").await.unwrap();
        let second = embedder.embed("How old is Bob?").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 768);

        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    #[ignore] // needs ECOCHAT_TEST_MODEL_DIR with an all-mpnet-base-v2 export
    async fn batch_matches_single_embeddings() {
        let settings = local_settings().expect("ECOCHAT_TEST_MODEL_DIR not set");
        let cache = tempfile::tempdir().unwrap();
        let embedder = OnnxEmbedder::from_settings(&settings, cache.path())
            .await
            .unwrap();

        let texts = vec!["name: Bob\nage: 25".to_string(), "short".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        let single = embedder.embed("short").await.unwrap();
        for (a, b) in batch[1].iter().zip(single.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
