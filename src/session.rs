//! Session store
//!
//! Owns session entities: ordered message history, lifecycle timestamps, and
//! lookup by identifier. Sessions are created lazily on first reference and
//! live until explicitly deleted (eviction policy is the embedder's concern).
//!
//! Concurrency contract:
//! - operations on distinct identifiers never contend; the outer map lock is
//!   held only for lookup/insert/remove, entries are `Arc`-shared
//! - operations on the same identifier are linearized by the entry's lock
//! - at most one turn is active per session at a time, enforced by a
//!   per-session turn mutex held for the duration of the turn

use crate::error::{GatewayError, Result};
use crate::event::Message;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// A conversation session: identifier plus append-only message history
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.last_active = Utc::now();
    }
}

/// Shared handle to one session.
///
/// The turn lock linearizes turns on this session: a second `submit` for the
/// same identifier queues behind the active turn instead of interleaving.
pub struct SessionHandle {
    id: String,
    session: RwLock<Session>,
    turn_lock: Mutex<()>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        Self {
            session: RwLock::new(Session::new(id.clone())),
            id,
            turn_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the turn lock. Held for the whole turn; turns on the same
    /// session queue here, turns on other sessions are unaffected.
    pub async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    /// Whether a turn currently holds the turn lock
    pub fn turn_active(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Snapshot of the current history
    pub async fn history(&self) -> Vec<Message> {
        self.session.read().await.messages.clone()
    }

    pub async fn append(&self, message: Message) {
        self.session.write().await.append(message);
    }

    pub async fn append_all(&self, messages: Vec<Message>) {
        let mut session = self.session.write().await;
        for message in messages {
            session.append(message);
        }
    }

    pub async fn created_at(&self) -> DateTime<Utc> {
        self.session.read().await.created_at
    }

    pub async fn last_active(&self) -> DateTime<Utc> {
        self.session.read().await.last_active
    }

    pub async fn message_count(&self) -> usize {
        self.session.read().await.len()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

/// Registry of live sessions, keyed by identifier
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a session, creating it lazily on first reference
    pub async fn get_or_create(&self, id: &str) -> Arc<SessionHandle> {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(id) {
                return handle.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have created it between the read and write lock
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = id, "Creating session");
                Arc::new(SessionHandle::new(id.to_string()))
            })
            .clone()
    }

    /// Look up an existing session; unknown identifiers are an explicit
    /// failure, never a fabricated empty session
    pub async fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))
    }

    /// Append a message to an existing session
    pub async fn append(&self, id: &str, message: Message) -> Result<()> {
        let handle = self.get(id).await?;
        handle.append(message).await;
        Ok(())
    }

    /// Ordered history of an existing session
    pub async fn history(&self, id: &str) -> Result<Vec<Message>> {
        let handle = self.get(id).await?;
        Ok(handle.history().await)
    }

    /// Remove a session. An in-flight turn keeps its own `Arc` and finishes
    /// harmlessly; the identifier is simply unknown afterwards.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_none() {
            return Err(GatewayError::SessionNotFound(id.to_string()));
        }
        tracing::debug!(session_id = id, "Deleted session");
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(id)
    }

    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
