use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ChatError;
use crate::session::InitMode;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub mode: InitMode,
    #[serde(default)]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ChatError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ChatError::InvalidInput(rejection.body_text()))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "sessions": state.sessions.list() }))
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.sessions.create();
    (
        StatusCode::CREATED,
        Json(json!({ "session": session.summary() })),
    )
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let session = state.sessions.get(&session_id)?;
    Ok(Json(json!({ "session": session.summary() })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    state.sessions.destroy(&session_id)?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn initialize_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<InitializeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let session = state.sessions.get(&session_id)?;
    let request = body(payload)?;
    let outcome = session.initialize(request.mode, &request.file_id).await?;
    Ok(Json(outcome))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let session = state.sessions.get(&session_id)?;
    let request = body(payload)?;
    let answer = session.ask(&request.query).await?;
    Ok(Json(json!({ "answer": answer })))
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let session = state.sessions.get(&session_id)?;
    Ok(Json(json!({ "messages": session.transcript() })))
}
