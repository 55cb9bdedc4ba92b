use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::{ChatServices, Session, SessionSummary};
use crate::core::errors::ChatError;

/// In-memory registry of live sessions. Nothing outlives the process.
pub struct SessionManager {
    services: Arc<ChatServices>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(services: Arc<ChatServices>) -> Self {
        Self {
            services,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Arc<ChatServices> {
        &self.services
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.services.clone()));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id().to_string(), session.clone());
        info!("Created session {}", session.id());
        session
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, ChatError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Drops the session with its handle and transcript.
    pub fn destroy(&self, id: &str) -> Result<(), ChatError> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|_| info!("Destroyed session {}", id))
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))
    }
}
