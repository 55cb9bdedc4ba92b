//! Pinecone REST client.
//!
//! Control plane calls (describe/create index) go to the controller URL;
//! vector calls go to the per-index host returned by describe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{embed_documents, IndexHandle, VectorIndexClient};
use crate::core::config::IndexSettings;
use crate::core::errors::ChatError;
use crate::embedding::Embedder;
use crate::loader::Document;

const TEXT_KEY: &str = "text";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct PineconeClient {
    client: Client,
    api_key: Option<String>,
    controller_url: String,
    api_version: String,
    cloud: String,
    region: String,
    metric: String,
    ready_timeout: Duration,
    namespace: String,
    batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct IndexDescription {
    dimension: usize,
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeClient {
    pub fn new(settings: &IndexSettings, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            controller_url: settings
                .pinecone
                .controller_url
                .trim_end_matches('/')
                .to_string(),
            api_version: settings.pinecone.api_version.clone(),
            cloud: settings.pinecone.cloud.clone(),
            region: settings.pinecone.region.clone(),
            metric: settings.pinecone.metric.clone(),
            ready_timeout: Duration::from_secs(settings.pinecone.ready_timeout_secs),
            namespace: settings.namespace.clone(),
            batch_size: settings.upload_batch_size,
        }
    }

    fn api_key(&self) -> Result<&str, ChatError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ChatError::Config("PINECONE_API_KEY is not set".to_string()))
    }

    fn request(&self, builder: RequestBuilder) -> Result<RequestBuilder, ChatError> {
        Ok(builder
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", &self.api_version))
    }

    /// `Ok(None)` when the index does not exist.
    async fn describe(&self, index_name: &str) -> Result<Option<IndexDescription>, ChatError> {
        let url = format!(
            "{}/indexes/{}",
            self.controller_url,
            urlencoding::encode(index_name)
        );
        let res = self
            .request(self.client.get(&url))?
            .send()
            .await
            .map_err(|e| ChatError::Transfer(format!("pinecone unreachable: {}", e)))?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => res
                .json::<IndexDescription>()
                .await
                .map(Some)
                .map_err(|e| ChatError::Transfer(format!("malformed index description: {}", e))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let text = res.text().await.unwrap_or_default();
                Err(ChatError::Auth(format!("pinecone rejected API key: {}", text)))
            }
            status => {
                let text = res.text().await.unwrap_or_default();
                Err(ChatError::Transfer(format!(
                    "pinecone describe failed ({}): {}",
                    status, text
                )))
            }
        }
    }

    async fn create_index(
        &self,
        index_name: &str,
        dimension: usize,
    ) -> Result<IndexDescription, ChatError> {
        let body = json!({
            "name": index_name,
            "dimension": dimension,
            "metric": self.metric,
            "spec": { "serverless": { "cloud": self.cloud, "region": self.region } },
        });
        let res = self
            .request(self.client.post(format!("{}/indexes", self.controller_url)))?
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Upload(format!("pinecone unreachable: {}", e)))?;

        let status = res.status();
        if !status.is_success() && status != StatusCode::CONFLICT {
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Upload(format!(
                "index creation rejected ({}): {}",
                status, text
            )));
        }
        tracing::info!("Created Pinecone index '{}' ({} dims)", index_name, dimension);

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            match self.describe(index_name).await {
                Ok(Some(description)) if description.status.ready => return Ok(description),
                Ok(_) => {}
                Err(err) => return Err(ChatError::Upload(err.to_string())),
            }
            if Instant::now() >= deadline {
                return Err(ChatError::Upload(format!(
                    "index '{}' was not ready after {:?}",
                    index_name, self.ready_timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn handle(
        &self,
        index_name: &str,
        description: &IndexDescription,
        embedder: Arc<dyn Embedder>,
    ) -> Result<PineconeIndexHandle, ChatError> {
        Ok(PineconeIndexHandle {
            client: self.clone(),
            api_key: self.api_key()?.to_string(),
            index_name: index_name.to_string(),
            host: data_plane_url(&description.host),
            embedder,
        })
    }
}

#[async_trait]
impl VectorIndexClient for PineconeClient {
    fn provider(&self) -> &str {
        "pinecone"
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        if self.api_key.is_none() {
            vec!["PINECONE_API_KEY"]
        } else {
            Vec::new()
        }
    }

    async fn create_or_overwrite(
        &self,
        index_name: &str,
        documents: Vec<Document>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError> {
        let description = match self.describe(index_name).await {
            Ok(Some(description)) => description,
            Ok(None) => self.create_index(index_name, embedder.dimension()).await?,
            Err(err) => return Err(ChatError::Upload(err.to_string())),
        };

        let vectors = embed_documents(
            embedder.as_ref(),
            &documents,
            self.batch_size,
            description.dimension,
        )
        .await?;

        let handle = self.handle(index_name, &description, embedder)?;
        handle.delete_all().await?;

        let items: Vec<(Vec<f32>, Document)> = vectors.into_iter().zip(documents).collect();
        for batch in items.chunks(self.batch_size.max(1)) {
            handle.upsert(batch).await?;
        }

        tracing::info!(
            "Uploaded {} documents to Pinecone index '{}'",
            items.len(),
            index_name
        );
        Ok(Arc::new(handle))
    }

    async fn connect(
        &self,
        index_name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexHandle>, ChatError> {
        let description = self
            .describe(index_name)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("index '{}'", index_name)))?;
        Ok(Arc::new(self.handle(index_name, &description, embedder)?))
    }
}

struct PineconeIndexHandle {
    client: PineconeClient,
    api_key: String,
    index_name: String,
    host: String,
    embedder: Arc<dyn Embedder>,
}

impl PineconeIndexHandle {
    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.client.api_version)
            .json(body)
            .send()
            .await
    }

    async fn delete_all(&self) -> Result<(), ChatError> {
        let body = json!({ "deleteAll": true, "namespace": self.client.namespace });
        let res = self
            .post("/vectors/delete", &body)
            .await
            .map_err(|e| ChatError::Upload(format!("pinecone unreachable: {}", e)))?;

        let status = res.status();
        // Serverless indexes answer 404 when the namespace is still empty.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = res.text().await.unwrap_or_default();
        Err(ChatError::Upload(format!(
            "clearing index '{}' failed ({}): {}",
            self.index_name, status, text
        )))
    }

    async fn upsert(&self, batch: &[(Vec<f32>, Document)]) -> Result<(), ChatError> {
        let vectors: Vec<Value> = batch
            .iter()
            .map(|(values, doc)| {
                let mut metadata = doc.metadata.clone();
                metadata.insert(TEXT_KEY.to_string(), Value::String(doc.text.clone()));
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "values": values,
                    "metadata": metadata,
                })
            })
            .collect();
        let body = json!({ "vectors": vectors, "namespace": self.client.namespace });

        let res = self
            .post("/vectors/upsert", &body)
            .await
            .map_err(|e| ChatError::Upload(format!("pinecone unreachable: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Upload(format!(
                "upsert into '{}' rejected ({}): {}",
                self.index_name, status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexHandle for PineconeIndexHandle {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, ChatError> {
        let vector = self.embedder.embed(query).await?;
        let body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.client.namespace,
        });

        let res = self
            .post("/query", &body)
            .await
            .map_err(|e| ChatError::Transfer(format!("pinecone unreachable: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Transfer(format!(
                "query against '{}' failed ({}): {}",
                self.index_name, status, text
            )));
        }

        let payload: QueryResponse = res
            .json()
            .await
            .map_err(|e| ChatError::Transfer(format!("malformed query response: {}", e)))?;
        Ok(payload
            .matches
            .into_iter()
            .take(k)
            .map(|m| document_from_metadata(m.metadata.unwrap_or_default()))
            .collect())
    }
}

fn document_from_metadata(mut metadata: Map<String, Value>) -> Document {
    let text = match metadata.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Document { text, metadata }
}

fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
