//! Chat sessions.
//!
//! A [`Session`] owns at most one index handle and an append-only
//! transcript. Actions (initialize, ask) on one session run one at a time;
//! state and transcript reads never wait for a running action.

mod manager;
mod transcript;

pub use manager::SessionManager;
pub use transcript::{ChatMessage, Role};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::errors::ChatError;
use crate::drive::{FileFetcher, ServiceAccountKey};
use crate::embedding::Embedder;
use crate::loader;
use crate::rag::AnswerEngine;
use crate::vector::{IndexHandle, VectorIndexClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Download a file, index its rows and replace the index content.
    NewUpload,
    /// Bind to whatever the index already holds.
    ConnectExisting,
}

/// Everything an action needs, built once at start-up and shared by all
/// sessions.
pub struct ChatServices {
    pub fetcher: Arc<dyn FileFetcher>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndexClient>,
    pub engine: AnswerEngine,
    pub service_account_file: Option<PathBuf>,
    pub encoding: String,
    pub index_name: String,
}

impl ChatServices {
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = self.index.missing_credentials();
        missing.extend(self.engine.llm().missing_credentials());
        missing
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeOutcome {
    pub state: SessionState,
    pub index_name: String,
    /// Rows indexed by a new upload; `None` when connecting.
    pub documents: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub index_name: Option<String>,
    pub messages: usize,
}

struct SessionInner {
    state: SessionState,
    handle: Option<Arc<dyn IndexHandle>>,
    transcript: Vec<ChatMessage>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    services: Arc<ChatServices>,
    inner: Mutex<SessionInner>,
    actions: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(services: Arc<ChatServices>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            services,
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                handle: None,
                transcript: Vec::new(),
            }),
            actions: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.inner().transcript.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.inner();
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            state: inner.state,
            index_name: inner.handle.as_ref().map(|h| h.index_name().to_string()),
            messages: inner.transcript.len(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rejected(&self, action: &str, err: ChatError) -> ChatError {
        warn!("Session {} {} rejected: {}", self.id, action, err);
        err
    }

    /// Binds the session to an index, replacing any previous handle.
    pub async fn initialize(
        &self,
        mode: InitMode,
        identifier: &str,
    ) -> Result<InitializeOutcome, ChatError> {
        let missing = self.services.missing_credentials();
        if !missing.is_empty() {
            let err =
                ChatError::Config(format!("missing credentials: {}", missing.join(", ")));
            return Err(self.rejected("initialization", err));
        }
        let identifier = identifier.trim();
        if mode == InitMode::NewUpload && identifier.is_empty() {
            let err =
                ChatError::InvalidInput("a file id is required for a new upload".to_string());
            return Err(self.rejected("initialization", err));
        }

        {
            let mut inner = self.inner();
            if inner.state == SessionState::Initializing {
                return Err(self.rejected("initialization", ChatError::Busy));
            }
            inner.state = SessionState::Initializing;
            inner.handle = None;
        }
        let mut reset = ResetOnDrop {
            session: self,
            armed: true,
        };

        let _action = self.actions.lock().await;
        info!("Session {} initializing ({:?})", self.id, mode);
        let result = match mode {
            InitMode::NewUpload => self.upload(identifier).await,
            InitMode::ConnectExisting => self.connect().await,
        };

        reset.armed = false;
        let mut inner = self.inner();
        match result {
            Ok((handle, documents)) => {
                let outcome = InitializeOutcome {
                    state: SessionState::Ready,
                    index_name: handle.index_name().to_string(),
                    documents,
                };
                inner.state = SessionState::Ready;
                inner.handle = Some(handle);
                info!("Session {} ready on index '{}'", self.id, outcome.index_name);
                Ok(outcome)
            }
            Err(err) => {
                inner.state = SessionState::Uninitialized;
                warn!("Session {} initialization failed: {}", self.id, err);
                Err(err)
            }
        }
    }

    async fn upload(
        &self,
        identifier: &str,
    ) -> Result<(Arc<dyn IndexHandle>, Option<usize>), ChatError> {
        let services = &self.services;
        let key = ServiceAccountKey::from_file(services.service_account_file.as_deref())?;

        // The staged file is removed as soon as its rows are parsed.
        let documents = {
            let staged = services.fetcher.fetch(identifier, &key).await?;
            loader::load(&staged, &services.encoding)?
        };

        let count = documents.len();
        info!("Session {} loaded {} rows from '{}'", self.id, count, identifier);
        let handle = services
            .index
            .create_or_overwrite(&services.index_name, documents, services.embedder.clone())
            .await?;
        Ok((handle, Some(count)))
    }

    async fn connect(&self) -> Result<(Arc<dyn IndexHandle>, Option<usize>), ChatError> {
        let handle = self
            .services
            .index
            .connect(&self.services.index_name, self.services.embedder.clone())
            .await?;
        Ok((handle, None))
    }

    /// Answers `query` from the bound index and records the exchange.
    pub async fn ask(&self, query: &str) -> Result<String, ChatError> {
        if self.state() != SessionState::Ready {
            return Err(self.rejected("ask", ChatError::NotInitialized));
        }
        if query.trim().is_empty() {
            let err = ChatError::InvalidInput("the question is empty".to_string());
            return Err(self.rejected("ask", err));
        }

        let _action = self.actions.lock().await;
        let handle = {
            let mut inner = self.inner();
            let handle = match (inner.state, &inner.handle) {
                (SessionState::Ready, Some(handle)) => handle.clone(),
                _ => return Err(self.rejected("ask", ChatError::NotInitialized)),
            };
            inner.transcript.push(ChatMessage::user(query));
            handle
        };

        match self.services.engine.answer(query, handle.as_ref()).await {
            Ok(answer) => {
                self.inner()
                    .transcript
                    .push(ChatMessage::assistant(answer.clone()));
                Ok(answer)
            }
            Err(err) => {
                warn!("Session {} ask failed: {}", self.id, err);
                Err(err)
            }
        }
    }
}

/// Puts an abandoned initialization back to `Uninitialized`.
struct ResetOnDrop<'a> {
    session: &'a Session,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.session.inner();
            inner.state = SessionState::Uninitialized;
            inner.handle = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::config::{IndexSettings, LlmSettings};
    use crate::drive::testing::{write_service_account, StaticFetcher};
    use crate::embedding::testing::HashingEmbedder;
    use crate::llm::testing::RecordingLlm;
    use crate::llm::LlmProvider;
    use crate::vector::{MemoryIndexClient, PineconeClient};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    pub(crate) const PEOPLE: &[u8] = b"name,age\nAlice,30\nBob,25\nCarol,40";
    const CITIES: &[u8] = b"city,country\nOslo,Norway\nLima,Peru";
    const HEADER_ONLY: &[u8] = b"name,age\n";

    pub(crate) struct Fixture {
        pub services: Arc<ChatServices>,
        pub fetcher: Arc<StaticFetcher>,
        pub llm: Arc<RecordingLlm>,
        _dir: TempDir,
    }

    pub(crate) fn fixture_with(
        fetcher: StaticFetcher,
        llm: RecordingLlm,
        index: Arc<dyn VectorIndexClient>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(fetcher);
        let llm = Arc::new(llm);
        let services = Arc::new(ChatServices {
            fetcher: fetcher.clone(),
            embedder: Arc::new(HashingEmbedder::new(128)),
            index,
            engine: AnswerEngine::new(llm.clone() as Arc<dyn LlmProvider>, &LlmSettings::default()),
            service_account_file: Some(write_service_account(dir.path())),
            encoding: "utf-8".to_string(),
            index_name: "csv-chat".to_string(),
        });
        Fixture {
            services,
            fetcher,
            llm,
            _dir: dir,
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Routes this thread's events into a buffer until the guard drops.
    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(
            StaticFetcher::new(&[("people", PEOPLE), ("cities", CITIES), ("empty", HEADER_ONLY)]),
            RecordingLlm::replying("Bob is 25 years old."),
            Arc::new(MemoryIndexClient::new(100)),
        )
    }

    #[tokio::test]
    async fn ask_before_initialize_is_rejected() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());

        let err = session.ask("How old is Bob?").await.unwrap_err();
        assert!(matches!(err, ChatError::NotInitialized));
        assert!(session.transcript().is_empty());
        assert!(fx.llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn upload_then_ask_delivers_bob_row_as_context() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());

        let outcome = session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::Ready);
        assert_eq!(outcome.index_name, "csv-chat");
        assert_eq!(outcome.documents, Some(3));

        let answer = session.ask("How old is Bob?").await.unwrap();
        assert_eq!(answer, "Bob is 25 years old.");
        assert!(fx.llm.prompts()[0].contains("name: Bob\nage: 25"));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "How old is Bob?");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].content, answer);
    }

    #[tokio::test]
    async fn failed_ask_records_only_the_question() {
        let fx = fixture_with(
            StaticFetcher::new(&[("people", PEOPLE)]),
            RecordingLlm::failing(),
            Arc::new(MemoryIndexClient::new(100)),
        );
        let session = Session::new(fx.services.clone());
        session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();

        let err = session.ask("How old is Bob?").await.unwrap_err();
        assert!(matches!(err, ChatError::Inference(_)));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn blank_question_is_invalid_and_not_recorded() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());
        session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();

        let err = session.ask("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn connect_without_index_is_not_found() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());

        let err = session
            .initialize(InitMode::ConnectExisting, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn sessions_connecting_to_the_same_index_retrieve_the_same_rows() {
        let fx = fixture();
        let uploader = Session::new(fx.services.clone());
        uploader
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();

        let first = Session::new(fx.services.clone());
        let second = Session::new(fx.services.clone());
        let outcome = first
            .initialize(InitMode::ConnectExisting, "ignored")
            .await
            .unwrap();
        assert_eq!(outcome.documents, None);
        second
            .initialize(InitMode::ConnectExisting, "")
            .await
            .unwrap();

        first.ask("Where is Carol?").await.unwrap();
        second.ask("Where is Carol?").await.unwrap();
        let prompts = fx.llm.prompts();
        assert_eq!(prompts[0], prompts[1]);
    }

    #[tokio::test]
    async fn reupload_leaves_only_the_second_file_searchable() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());
        session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();
        session
            .initialize(InitMode::NewUpload, "cities")
            .await
            .unwrap();

        session.ask("How old is Bob?").await.unwrap();
        let prompt = &fx.llm.prompts()[0];
        assert!(prompt.contains("city: Oslo"));
        assert!(prompt.contains("city: Lima"));
        assert!(!prompt.contains("name:"));
    }

    #[tokio::test]
    async fn missing_api_keys_are_config_errors_without_state_change() {
        let pinecone = PineconeClient::new(&IndexSettings::default(), None);
        let fx = fixture_with(
            StaticFetcher::new(&[("people", PEOPLE)]),
            RecordingLlm::replying("x"),
            Arc::new(pinecone),
        );
        let session = Session::new(fx.services.clone());

        let err = session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(ref m) if m.contains("PINECONE_API_KEY")));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_file_id_is_rejected_before_fetching() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());

        let err = session
            .initialize(InitMode::NewUpload, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_service_account_is_auth_error() {
        let fx = fixture();
        let services = Arc::new(ChatServices {
            fetcher: fx.fetcher.clone(),
            embedder: fx.services.embedder.clone(),
            index: fx.services.index.clone(),
            engine: AnswerEngine::new(fx.llm.clone() as Arc<dyn LlmProvider>, &LlmSettings::default()),
            service_account_file: None,
            encoding: "utf-8".to_string(),
            index_name: "csv-chat".to_string(),
        });
        let session = Session::new(services);

        let err = session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn failed_reinitialize_drops_the_previous_handle() {
        let fx = fixture();
        let session = Session::new(fx.services.clone());
        session
            .initialize(InitMode::NewUpload, "people")
            .await
            .unwrap();

        let err = session
            .initialize(InitMode::NewUpload, "empty")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Parse(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.summary().index_name.is_none());
        assert!(matches!(
            session.ask("How old is Bob?").await,
            Err(ChatError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_in_flight_rejects_second_initialize_and_asks() {
        let gate = Arc::new(Notify::new());
        let fx = fixture_with(
            StaticFetcher::new(&[("people", PEOPLE)]).gated(gate.clone()),
            RecordingLlm::replying("x"),
            Arc::new(MemoryIndexClient::new(100)),
        );
        let session = Arc::new(Session::new(fx.services.clone()));

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.initialize(InitMode::NewUpload, "people").await })
        };
        while fx.fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(session.state(), SessionState::Initializing);

        let err = session
            .initialize(InitMode::ConnectExisting, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Busy));
        let err = session.ask("How old is Bob?").await.unwrap_err();
        assert!(matches!(err, ChatError::NotInitialized));
        assert!(session.transcript().is_empty());

        gate.notify_one();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.documents, Some(3));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn rejected_requests_are_logged_with_the_session_id() {
        let (logs, _guard) = capture_logs();
        let pinecone = PineconeClient::new(&IndexSettings::default(), None);
        let unkeyed = fixture_with(
            StaticFetcher::new(&[("people", PEOPLE)]),
            RecordingLlm::replying("x"),
            Arc::new(pinecone),
        );
        let session = Session::new(unkeyed.services.clone());
        let _ = session.initialize(InitMode::NewUpload, "people").await;
        let config_line = format!("Session {} initialization rejected: ", session.id());
        assert!(logs.contents().contains(&config_line));
        assert!(logs.contents().contains("PINECONE_API_KEY"));

        let fx = fixture();
        let session = Session::new(fx.services.clone());
        let _ = session.ask("How old is Bob?").await;
        let _ = session.initialize(InitMode::NewUpload, " ").await;
        session.inner().state = SessionState::Initializing;
        let _ = session.initialize(InitMode::ConnectExisting, "").await;

        let out = logs.contents();
        let id = session.id();
        assert!(out.contains(&format!("Session {} ask rejected: ", id)));
        assert_eq!(
            out.matches(&format!("Session {} initialization rejected: ", id)).count(),
            2
        );
        assert!(out.contains("a file id is required"));
    }
}
