use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths, ConfigService, IndexProvider, LlmProviderKind};
use crate::drive::GoogleDriveFetcher;
use crate::embedding::{Embedder, OnnxEmbedder};
use crate::llm::{GeminiProvider, LlmProvider};
use crate::rag::AnswerEngine;
use crate::session::{ChatServices, SessionManager};
use crate::vector::{MemoryIndexClient, PineconeClient, VectorIndexClient};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Holds the loaded configuration and the session registry; the services
/// inside the registry (fetcher, embedder, index client, answer engine) are
/// built once here and shared by every session.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigService,
    pub settings: Arc<AppConfig>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// 1. Loads `config.yml`, `secrets.yaml` and env overrides
    /// 2. Loads the embedding model (downloading it on first run)
    /// 3. Builds the Drive fetcher, vector index client and LLM provider
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_config()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let embedder: Arc<dyn Embedder> = Arc::new(
            OnnxEmbedder::from_settings(&settings.embedding, &paths.model_cache_dir)
                .await
                .map_err(InitializationError::Embedding)?,
        );

        let services = build_services(&settings, &paths, embedder);
        let missing = services.missing_credentials();
        if !missing.is_empty() {
            tracing::warn!(
                "Missing credentials: {}; initialization requests will fail until they are set",
                missing.join(", ")
            );
        }

        Ok(Self::with_services(config, settings, services))
    }

    pub fn with_services(
        config: ConfigService,
        settings: AppConfig,
        services: ChatServices,
    ) -> Arc<Self> {
        Arc::new(AppState {
            config,
            settings: Arc::new(settings),
            sessions: Arc::new(SessionManager::new(Arc::new(services))),
        })
    }
}

fn build_services(
    settings: &AppConfig,
    paths: &AppPaths,
    embedder: Arc<dyn Embedder>,
) -> ChatServices {
    let credentials = &settings.credentials;

    let index: Arc<dyn VectorIndexClient> = match settings.index.provider {
        IndexProvider::Pinecone => Arc::new(PineconeClient::new(
            &settings.index,
            credentials.pinecone_api_key.clone(),
        )),
        IndexProvider::Memory => Arc::new(MemoryIndexClient::new(settings.index.upload_batch_size)),
    };

    let llm: Arc<dyn LlmProvider> = match settings.llm.provider {
        LlmProviderKind::Gemini => Arc::new(GeminiProvider::new(
            &settings.llm,
            credentials.google_api_key.clone(),
        )),
    };
    tracing::info!(
        "Using {} index '{}' and {} model {}",
        index.provider(),
        settings.index.name,
        llm.name(),
        settings.llm.model
    );

    ChatServices {
        fetcher: Arc::new(GoogleDriveFetcher::new(
            &settings.drive,
            paths.staging_dir.clone(),
        )),
        embedder,
        index,
        engine: AnswerEngine::new(llm, &settings.llm),
        service_account_file: credentials.service_account_file.clone(),
        encoding: settings.drive.encoding.clone(),
        index_name: settings.index.name.clone(),
    }
}
