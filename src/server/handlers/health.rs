use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = state.sessions.services();
    Json(json!({
        "status": "ok",
        "index_provider": services.index.provider(),
        "index_name": services.index_name,
        "llm_provider": services.engine.llm().name(),
        "embedding_model": services.embedder.model_name(),
        "missing_credentials": services.missing_credentials(),
    }))
}
