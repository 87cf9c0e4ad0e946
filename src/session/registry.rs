// ABOUTME: Concurrent mapping from session key to live session, one session per key

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::session::lifecycle::{Session, SessionError};
use crate::session::SessionKey;

/// Owns every live session. At most one session per key at any time.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-then-insert; a key that is already present is a conflict,
    /// never a merge or restart.
    pub async fn register(
        &self,
        key: SessionKey,
        session: Arc<Session>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                Err(SessionError::Conflict(entry.key().clone()))
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                debug!("registered session {}", entry.key());
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub async fn unregister(&self, key: &SessionKey) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))
    }

    pub async fn lookup(&self, key: &SessionKey) -> Result<Arc<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(key.clone()))
    }

    /// Remove and return every session, for process-wide shutdown.
    pub async fn drain(&self) -> Vec<(SessionKey, Arc<Session>)> {
        let mut sessions = self.sessions.write().await;
        sessions.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
