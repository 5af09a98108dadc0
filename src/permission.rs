//! Permission registry
//!
//! Tracks outstanding human-approval requests for gated tool invocations and
//! bridges the asynchronous decision back into the suspended turn.
//!
//! Each request is keyed by a freshly generated identifier (never reused) and
//! holds a oneshot channel; the turn suspends on the receiver while the
//! decision endpoint calls [`PermissionRegistry::resolve`]. Exactly one
//! decision is delivered per request. A resolved request leaves a tombstone
//! so a duplicate `resolve` fails with `PermissionAlreadyResolved`; purging
//! (turn end, timeout, cancellation) removes the entry entirely so late
//! resolves fail with `PermissionNotFound`.

use crate::error::{GatewayError, Result};
use crate::event::ToolInvocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Human decision on a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// The record of one pending human decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Unique request identifier, generated at creation
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// The tool invocation awaiting approval
    pub invocation: ToolInvocation,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

enum RequestState {
    Pending(oneshot::Sender<Decision>),
    Resolved(Decision),
}

struct Entry {
    session_id: String,
    state: RequestState,
}

/// A created request plus the receiver its turn suspends on.
///
/// Consumed by [`PermissionRegistry::await_decision`]; the receiver is not
/// replayable, matching the at-most-once delivery contract.
pub struct PendingPermission {
    pub request: PermissionRequest,
    rx: oneshot::Receiver<Decision>,
}

/// Registry of outstanding permission requests, keyed by request identifier
pub struct PermissionRegistry {
    requests: RwLock<HashMap<String, Entry>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new pending request for a gated invocation
    pub async fn create(&self, session_id: &str, invocation: ToolInvocation) -> PendingPermission {
        let (tx, rx) = oneshot::channel();
        let request = PermissionRequest {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            invocation,
            created_at: Utc::now(),
        };

        let mut requests = self.requests.write().await;
        requests.insert(
            request.id.clone(),
            Entry {
                session_id: session_id.to_string(),
                state: RequestState::Pending(tx),
            },
        );

        tracing::debug!(
            request_id = request.id.as_str(),
            session_id = session_id,
            tool = request.invocation.name.as_str(),
            "Permission request created"
        );

        PendingPermission { request, rx }
    }

    /// Record a human decision for a pending request.
    ///
    /// Fails with `PermissionNotFound` for unknown or purged identifiers and
    /// `PermissionAlreadyResolved` if a decision was already recorded.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> Result<()> {
        let mut requests = self.requests.write().await;
        let entry = requests
            .get_mut(request_id)
            .ok_or_else(|| GatewayError::PermissionNotFound(request_id.to_string()))?;

        match std::mem::replace(&mut entry.state, RequestState::Resolved(decision)) {
            RequestState::Pending(tx) => {
                // The receiver may already be gone if the turn died between
                // create and await; the tombstone still records the decision.
                let _ = tx.send(decision);
                tracing::debug!(
                    request_id = request_id,
                    decision = ?decision,
                    "Permission request resolved"
                );
                Ok(())
            }
            RequestState::Resolved(prior) => {
                entry.state = RequestState::Resolved(prior);
                Err(GatewayError::PermissionAlreadyResolved(
                    request_id.to_string(),
                ))
            }
        }
    }

    /// Suspend until a decision arrives for `pending`, or until the timeout
    /// or cancellation fires, whichever comes first.
    ///
    /// Timeout and cancellation purge the request so late resolves fail with
    /// `PermissionNotFound`.
    pub async fn await_decision(
        &self,
        pending: PendingPermission,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let request_id = pending.request.id.clone();

        tokio::select! {
            decision = pending.rx => match decision {
                Ok(decision) => Ok(decision),
                // Sender dropped without a decision: the request was purged
                // out from under us (e.g. session teardown)
                Err(_) => Err(GatewayError::TurnCancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                self.purge(&request_id).await;
                tracing::info!(request_id = request_id.as_str(), "Permission request timed out");
                Err(GatewayError::TurnTimedOut(timeout))
            }
            _ = cancel.cancelled() => {
                self.purge(&request_id).await;
                tracing::debug!(request_id = request_id.as_str(), "Permission request cancelled");
                Err(GatewayError::TurnCancelled)
            }
        }
    }

    /// Remove a request entirely. Not an error if already gone.
    pub async fn purge(&self, request_id: &str) -> bool {
        let mut requests = self.requests.write().await;
        requests.remove(request_id).is_some()
    }

    /// Remove every request (pending or tombstoned) owned by a session.
    /// Called when the owning turn terminates, normally or not.
    pub async fn purge_session(&self, session_id: &str) -> usize {
        let mut requests = self.requests.write().await;
        let before = requests.len();
        requests.retain(|_, entry| entry.session_id != session_id);
        before - requests.len()
    }

    /// Number of requests still awaiting a decision
    pub async fn pending_count(&self) -> usize {
        let requests = self.requests.read().await;
        requests
            .values()
            .filter(|e| matches!(e.state, RequestState::Pending(_)))
            .count()
    }
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
