//! Typed view over the merged YAML configuration.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub drive: DriveSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub llm: LlmSettings,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: defaults::DEFAULT_HOST.to_string(),
            port: defaults::DEFAULT_PORT,
            allowed_origins: defaults::default_local_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub api_base: String,
    pub scope: String,
    /// Text encoding expected for downloaded CSV files.
    pub encoding: String,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            api_base: defaults::DRIVE_API_BASE.to_string(),
            scope: defaults::DRIVE_SCOPE.to_string(),
            encoding: defaults::DEFAULT_ENCODING.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// HuggingFace repository the ONNX export is pulled from.
    pub model_name: String,
    pub model_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub dimension: usize,
    pub max_length: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_name: defaults::EMBEDDING_MODEL.to_string(),
            model_path: None,
            tokenizer_path: None,
            dimension: defaults::EMBEDDING_DIMENSION,
            max_length: defaults::EMBEDDING_MAX_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexProvider {
    Pinecone,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub provider: IndexProvider,
    pub name: String,
    pub namespace: String,
    pub upload_batch_size: usize,
    pub pinecone: PineconeSettings,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            provider: IndexProvider::Pinecone,
            name: defaults::INDEX_NAME.to_string(),
            namespace: String::new(),
            upload_batch_size: defaults::UPLOAD_BATCH_SIZE,
            pinecone: PineconeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeSettings {
    pub controller_url: String,
    pub api_version: String,
    pub cloud: String,
    pub region: String,
    pub metric: String,
    pub ready_timeout_secs: u64,
}

impl Default for PineconeSettings {
    fn default() -> Self {
        Self {
            controller_url: defaults::PINECONE_CONTROLLER_URL.to_string(),
            api_version: defaults::PINECONE_API_VERSION.to_string(),
            cloud: defaults::PINECONE_CLOUD.to_string(),
            region: defaults::PINECONE_REGION.to_string(),
            metric: defaults::PINECONE_METRIC.to_string(),
            ready_timeout_secs: defaults::PINECONE_READY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    /// Number of rows retrieved as context per question.
    pub top_k: usize,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Gemini,
            model: defaults::LLM_MODEL.to_string(),
            base_url: defaults::GEMINI_BASE_URL.to_string(),
            temperature: defaults::LLM_TEMPERATURE,
            top_k: defaults::RETRIEVAL_TOP_K,
            request_timeout_secs: defaults::LLM_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub service_account_file: Option<PathBuf>,
    pub pinecone_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service_account_file", &self.service_account_file)
            .field("pinecone_api_key", &self.pinecone_api_key.as_ref().map(|_| "****"))
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "****"))
            .finish()
    }
}
