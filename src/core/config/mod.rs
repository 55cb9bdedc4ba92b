pub mod defaults;
pub mod paths;
pub mod service;
pub mod settings;
pub mod validation;

pub use paths::AppPaths;
pub use service::ConfigService;
pub use settings::{
    AppConfig, Credentials, DriveSettings, EmbeddingSettings, IndexProvider, IndexSettings,
    LlmProviderKind, LlmSettings, PineconeSettings, ServerSettings,
};
