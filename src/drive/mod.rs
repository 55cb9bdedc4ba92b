//! Remote file retrieval.
//!
//! Downloads land in a uniquely named temp file under the staging directory
//! and are removed when the [`StagedFile`] is dropped.

mod credentials;
mod google;

pub use credentials::ServiceAccountKey;
pub use google::GoogleDriveFetcher;

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::core::errors::ChatError;

#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(
        &self,
        identifier: &str,
        credentials: &ServiceAccountKey,
    ) -> Result<StagedFile, ChatError>;
}

/// Bytes of one remote file, staged on local disk.
#[derive(Debug)]
pub struct StagedFile {
    identifier: String,
    file: NamedTempFile,
    size: u64,
}

impl StagedFile {
    pub fn create_in(dir: &Path, identifier: &str) -> Result<Self, ChatError> {
        let file = tempfile::Builder::new()
            .prefix("ecochat-")
            .suffix(".csv")
            .tempfile_in(dir)
            .map_err(|e| {
                ChatError::Transfer(format!(
                    "cannot create staging file in {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        Ok(Self {
            identifier: identifier.to_string(),
            file,
            size: 0,
        })
    }

    /// Stages an in-memory buffer in one go.
    pub fn from_bytes(dir: &Path, identifier: &str, bytes: &[u8]) -> Result<Self, ChatError> {
        let mut staged = Self::create_in(dir, identifier)?;
        staged.append(bytes)?;
        staged.finish()?;
        Ok(staged)
    }

    pub fn append(&mut self, chunk: &[u8]) -> Result<(), ChatError> {
        self.file
            .write_all(chunk)
            .map_err(|e| ChatError::Transfer(format!("cannot write staging file: {}", e)))?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), ChatError> {
        self.file
            .flush()
            .map_err(|e| ChatError::Transfer(format!("cannot flush staging file: {}", e)))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::{FileFetcher, ServiceAccountKey, StagedFile};
    use crate::core::errors::ChatError;

    /// Serves fixed files by identifier. With a gate set, every fetch waits
    /// for one `notify_one` before returning.
    pub(crate) struct StaticFetcher {
        staging: TempDir,
        files: HashMap<String, Vec<u8>>,
        pub gate: Option<Arc<Notify>>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub(crate) fn new(files: &[(&str, &[u8])]) -> Self {
            Self {
                staging: tempfile::tempdir().unwrap(),
                files: files
                    .iter()
                    .map(|(id, bytes)| (id.to_string(), bytes.to_vec()))
                    .collect(),
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl FileFetcher for StaticFetcher {
        async fn fetch(
            &self,
            identifier: &str,
            _credentials: &ServiceAccountKey,
        ) -> Result<StagedFile, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let bytes = self
                .files
                .get(identifier)
                .ok_or_else(|| ChatError::NotFound(format!("file '{}'", identifier)))?;
            StagedFile::from_bytes(self.staging.path(), identifier, bytes)
        }
    }

    /// Writes a service-account key file the loader accepts.
    pub(crate) fn write_service_account(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("service_account.json");
        let key = serde_json::json!({
            "type": "service_account",
            "client_email": "indexer@project.iam.gserviceaccount.com",
            "private_key": super::credentials::tests::TEST_PRIVATE_KEY,
            "token_uri": "http://127.0.0.1:9/token",
        });
        std::fs::write(&path, key.to_string()).unwrap();
        path
    }
}
