use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::LlmProvider;
use super::types::GenerationRequest;
use crate::core::config::LlmSettings;
use crate::core::errors::ChatError;

/// Google Generative Language API (`generateContent`).
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(settings: &LlmSettings, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        if self.api_key.is_none() {
            vec!["GOOGLE_API_KEY"]
        } else {
            Vec::new()
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::Inference("GOOGLE_API_KEY is not set".to_string()))?;
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": { "temperature": request.temperature },
        });

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Inference(format!("Gemini unreachable: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Inference(format!(
                "Gemini returned {}: {}",
                status, text
            )));
        }

        let payload: GenerateResponse = res
            .json()
            .await
            .map_err(|e| ChatError::Inference(format!("malformed Gemini response: {}", e)))?;

        let Some(candidate) = payload.candidates.into_iter().next() else {
            let reason = payload
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(ChatError::Inference(format!("Gemini gave no answer: {}", reason)));
        };

        let answer: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    async fn generate(
        State(seen): State<Seen>,
        Path(call): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("g-key") {
            return (StatusCode::FORBIDDEN, "API key not valid").into_response();
        }
        seen.lock().unwrap().push((call.clone(), body.clone()));
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
        if prompt == "blocked" {
            return Json(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).into_response();
        }
        if prompt == "busy" {
            return (StatusCode::TOO_MANY_REQUESTS, "quota exceeded").into_response();
        }
        Json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Bob is " }, { "text": "25." }] },
                "finishReason": "STOP"
            }]
        }))
        .into_response()
    }

    async fn spawn_gemini() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/models/:call", post(generate))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, seen)
    }

    fn provider(base: &str, key: Option<&str>) -> GeminiProvider {
        let settings = LlmSettings {
            base_url: base.to_string(),
            ..LlmSettings::default()
        };
        GeminiProvider::new(&settings, key.map(str::to_string))
    }

    #[tokio::test]
    async fn generate_joins_candidate_parts() {
        let (base, seen) = spawn_gemini().await;
        let answer = provider(&base, Some("g-key"))
            .generate(GenerationRequest::new("gemini-flash-latest", "How old is Bob?"))
            .await
            .unwrap();
        assert_eq!(answer, "Bob is 25.");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "gemini-flash-latest:generateContent");
        assert_eq!(seen[0].1["contents"][0]["role"], "user");
        assert_eq!(seen[0].1["generationConfig"]["temperature"], 0.3);
    }

    #[tokio::test]
    async fn rejections_are_inference_errors() {
        let (base, _) = spawn_gemini().await;

        let err = provider(&base, Some("wrong"))
            .generate(GenerationRequest::new("m", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Inference(_)));

        let err = provider(&base, Some("g-key"))
            .generate(GenerationRequest::new("m", "busy"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Inference(ref m) if m.contains("429")));

        let err = provider(&base, Some("g-key"))
            .generate(GenerationRequest::new("m", "blocked"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Inference(ref m) if m.contains("SAFETY")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_inference_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = provider(&base, Some("g-key"))
            .generate(GenerationRequest::new("m", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Inference(_)));
    }

    #[test]
    fn missing_key_is_reported() {
        assert_eq!(
            provider("http://unused", None).missing_credentials(),
            vec!["GOOGLE_API_KEY"]
        );
    }
}
