use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::session::Session;

pub type SharedSession = Arc<Mutex<Session>>;

/// Thread-safe in-memory session registry.
/// Uses DashMap for concurrent access across sessions; each session has its
/// own mutex, never held across an await.
#[derive(Clone)]
pub struct SessionStore {
    /// Session storage: session_id -> Session
    storage: Arc<DashMap<String, SharedSession>>,
    history_capacity: usize,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(history_capacity: usize, idle_ttl: Duration) -> Self {
        info!(
            "Initializing session store (history {}, idle ttl {:?})",
            history_capacity, idle_ttl
        );
        Self {
            storage: Arc::new(DashMap::new()),
            history_capacity,
            idle_ttl,
        }
    }

    /// Get a session by id.
    /// Returns None if not found or expired
    pub fn get(&self, session_id: &str) -> Option<SharedSession> {
        let session = self.storage.get(session_id)?.value().clone();

        // Lazy expiry
        if session.lock().is_expired() {
            self.remove(session_id);
            debug!("Session {} expired, removed from store", session_id);
            return None;
        }

        Some(session)
    }

    /// Get the session, creating an empty one when unknown or expired.
    pub fn get_or_create(&self, session_id: &str) -> SharedSession {
        if let Some(session) = self.get(session_id) {
            return session;
        }

        self.storage
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session {}", session_id);
                Arc::new(Mutex::new(Session::new(
                    session_id,
                    self.history_capacity,
                    self.idle_ttl,
                )))
            })
            .value()
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> Option<SharedSession> {
        self.storage.remove(session_id).map(|(_, session)| session)
    }

    /// Get number of live sessions
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Remove expired sessions. Returns number of sessions removed
    pub fn cleanup_expired(&self) -> usize {
        let start_len = self.storage.len();
        self.storage.retain(|_, session| !session.lock().is_expired());
        let end_len = self.storage.len();

        let count = start_len.saturating_sub(end_len);

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }
}
