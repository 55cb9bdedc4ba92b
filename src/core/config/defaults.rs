pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8501;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_ENCODING: &str = "utf-8";

pub const EMBEDDING_MODEL: &str = "sentence-transformers/all-mpnet-base-v2";
pub const EMBEDDING_DIMENSION: usize = 768;
pub const EMBEDDING_MAX_LENGTH: usize = 384;

pub const INDEX_NAME: &str = "csv-chat";
pub const UPLOAD_BATCH_SIZE: usize = 100;
pub const PINECONE_CONTROLLER_URL: &str = "https://api.pinecone.io";
pub const PINECONE_API_VERSION: &str = "2024-07";
pub const PINECONE_CLOUD: &str = "aws";
pub const PINECONE_REGION: &str = "us-east-1";
pub const PINECONE_METRIC: &str = "cosine";
pub const PINECONE_READY_TIMEOUT_SECS: u64 = 120;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const LLM_MODEL: &str = "gemini-flash-latest";
pub const LLM_TEMPERATURE: f64 = 0.3;
pub const RETRIEVAL_TOP_K: usize = 5;
pub const LLM_REQUEST_TIMEOUT_SECS: u64 = 120;

pub fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:8501".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:8501".to_string(),
    ]
}
