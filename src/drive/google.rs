use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};

use super::{FileFetcher, ServiceAccountKey, StagedFile};
use crate::core::config::DriveSettings;
use crate::core::errors::ChatError;

/// Google Drive v3 media download authenticated as a service account.
#[derive(Clone)]
pub struct GoogleDriveFetcher {
    client: Client,
    api_base: String,
    scope: String,
    staging_dir: PathBuf,
}

impl GoogleDriveFetcher {
    pub fn new(settings: &DriveSettings, staging_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            scope: settings.scope.clone(),
            staging_dir,
        }
    }

    fn media_url(&self, identifier: &str) -> String {
        format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            self.api_base,
            urlencoding::encode(identifier)
        )
    }
}

#[async_trait]
impl FileFetcher for GoogleDriveFetcher {
    async fn fetch(
        &self,
        identifier: &str,
        credentials: &ServiceAccountKey,
    ) -> Result<StagedFile, ChatError> {
        let token = credentials.access_token(&self.client, &self.scope).await?;

        let res = self
            .client
            .get(self.media_url(identifier))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatError::Transfer(format!("drive unreachable: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED => {
                    ChatError::Auth(format!("drive rejected credentials: {}", text))
                }
                StatusCode::FORBIDDEN => ChatError::Permission(format!(
                    "{} is not shared with {}",
                    identifier, credentials.client_email
                )),
                StatusCode::NOT_FOUND => {
                    ChatError::NotFound(format!("drive file '{}'", identifier))
                }
                _ => ChatError::Transfer(format!("drive download failed ({}): {}", status, text)),
            });
        }

        let mut staged = StagedFile::create_in(&self.staging_dir, identifier)?;
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ChatError::Transfer(format!("download of '{}' interrupted: {}", identifier, e))
            })?;
            staged.append(&chunk)?;
        }
        staged.finish()?;

        tracing::info!(
            "Downloaded drive file {} ({} bytes) to {}",
            identifier,
            staged.size(),
            staged.path().display()
        );
        Ok(staged)
    }
}
