use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use crate::core::errors::ChatError;
use crate::state::AppState;

/// Effective configuration with every secret replaced by a placeholder.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ChatError> {
    let redacted = state.config.redacted(&state.settings)?;
    Ok(Json(redacted))
}
