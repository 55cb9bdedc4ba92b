use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Every failure an action (initialize or ask) can surface to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("could not parse file: {0}")]
    Parse(String),
    #[error("upload rejected: {0}")]
    Upload(String),
    #[error("session is not initialized; initialize it with a data source first")]
    NotInitialized,
    #[error("an initialization is already running for this session")]
    Busy,
    #[error("language model call failed: {0}")]
    Inference(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Internal(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Config(_) => "config",
            ChatError::Auth(_) => "auth",
            ChatError::Permission(_) => "permission",
            ChatError::NotFound(_) => "not_found",
            ChatError::Transfer(_) => "transfer",
            ChatError::Parse(_) => "parse",
            ChatError::Upload(_) => "upload",
            ChatError::NotInitialized => "not_initialized",
            ChatError::Busy => "busy",
            ChatError::Inference(_) => "inference",
            ChatError::InvalidInput(_) => "invalid_input",
            ChatError::SessionNotFound(_) => "session_not_found",
            ChatError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Permission(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) | ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Transfer(_) | ChatError::Upload(_) | ChatError::Inference(_) => {
                StatusCode::BAD_GATEWAY
            }
            ChatError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::NotInitialized | ChatError::Busy => StatusCode::CONFLICT,
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (self.status(), body).into_response()
    }
}
