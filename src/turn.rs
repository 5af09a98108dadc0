//! Conversation orchestrator
//!
//! Drives one turn of a session from user input to the terminal `done`
//! event, coordinating the provider adapter, tool executor, and permission
//! registry. The state machine:
//!
//! ```text
//! Idle → Generating → (AwaitingPermission ⇄ Generating)* → Finalizing → Done
//!                                   └──────── any state ────────→ Errored
//! ```
//!
//! - `Generating`: provider events are forwarded verbatim; `tool_use` events
//!   are additionally collected for sequential resolution after the round.
//! - `AwaitingPermission`: the only suspension point; the turn parks on the
//!   permission registry until the human decides, the timeout fires, or the
//!   client cancels.
//! - `Finalizing`: the turn's assistant and tool messages are committed to
//!   the session, then `result` and `done` are emitted.
//! - `Errored`: `error` then `done`, exactly once; nothing is committed
//!   beyond the user message, and the session's permission requests are
//!   purged.
//!
//! Invariants: exactly one `done` per turn, always last; a gated
//! invocation's `permission_request` precedes its `tool_result`; tool calls
//! within a turn resolve strictly sequentially, so at most one permission
//! request is outstanding per turn at a time.

use crate::config::{DEFAULT_MAX_ROUNDS, DEFAULT_PERMISSION_TIMEOUT_MS};
use crate::error::{ErrorKind, GatewayError};
use crate::event::{ContentBlock, Message, StreamEvent, TokenUsage, ToolInvocation, ToolOutcome};
use crate::permission::{Decision, PermissionRegistry};
use crate::provider::{Provider, ProviderEvent};
use crate::session::SessionHandle;
use crate::tools::ToolExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Per-turn limits
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// How long a permission request may stay pending
    pub permission_timeout: Duration,
    /// Maximum provider rounds (tool round-trips) per turn
    pub max_rounds: usize,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            permission_timeout: Duration::from_millis(DEFAULT_PERMISSION_TIMEOUT_MS),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Executes one turn at a time; holds no state between turns
#[derive(Clone)]
pub(crate) struct TurnRunner {
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    permissions: Arc<PermissionRegistry>,
    options: TurnOptions,
}

impl TurnRunner {
    pub(crate) fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        permissions: Arc<PermissionRegistry>,
        options: TurnOptions,
    ) -> Self {
        Self {
            provider,
            executor,
            permissions,
            options,
        }
    }

    /// Run one turn to its terminal event
    pub(crate) async fn run(
        &self,
        session: Arc<SessionHandle>,
        user_text: String,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let span = tracing::info_span!(
            "parley.turn",
            "parley.session.id" = %session.id(),
            "parley.provider" = self.provider.name(),
        );
        self.run_inner(session, user_text, tx, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        session: Arc<SessionHandle>,
        user_text: String,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        // One turn per session at a time; later turns queue here
        let _turn_guard = session.begin_turn().await;

        if cancel.is_cancelled() {
            self.finish_err(&tx, session.id(), GatewayError::TurnCancelled)
                .await;
            return;
        }

        // The user message is committed as soon as the turn starts
        session.append(Message::user(&user_text)).await;
        let mut messages = session.history().await;
        let tools = self.executor.catalog();

        if !emit(&tx, StreamEvent::Status {
            message: "generating".to_string(),
        })
        .await
        {
            self.abandon(session.id()).await;
            return;
        }

        // Assistant/tool messages produced by this turn, committed only on
        // successful completion
        let mut appends: Vec<Message> = Vec::new();
        let mut total_usage = TokenUsage::default();
        let mut pending_results: Option<Message> = None;
        let mut round = 0usize;

        loop {
            round += 1;
            if round > self.options.max_rounds {
                self.finish_err(
                    &tx,
                    session.id(),
                    GatewayError::TurnLimitExceeded(self.options.max_rounds),
                )
                .await;
                return;
            }

            tracing::debug!(round, phase = "generating", "Provider round started");

            let stream = match &pending_results {
                None => self.provider.stream_turn(&messages, &tools).await,
                Some(results) => self.provider.continue_turn(&messages, results, &tools).await,
            };
            if let Some(results) = pending_results.take() {
                messages.push(results.clone());
                appends.push(results);
            }

            let mut rx = match stream {
                Ok(rx) => rx,
                Err(e) => {
                    self.finish_err(&tx, session.id(), e).await;
                    return;
                }
            };

            // Generating: forward provider events, collect tool invocations
            let mut invocations: Vec<ToolInvocation> = Vec::new();
            let mut completed: Option<(Message, TokenUsage)> = None;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        self.finish_err(&tx, session.id(), GatewayError::TurnCancelled).await;
                        return;
                    }
                    event = rx.recv() => event,
                };
                let Some(event) = event else { break };

                match event {
                    ProviderEvent::TextDelta(text) => {
                        if !emit(&tx, StreamEvent::Text { text }).await {
                            self.abandon(session.id()).await;
                            return;
                        }
                    }
                    ProviderEvent::ToolUse(invocation) => {
                        let forwarded = emit(&tx, StreamEvent::ToolUse {
                            id: invocation.id.clone(),
                            name: invocation.name.clone(),
                            args: invocation.args.clone(),
                        })
                        .await;
                        if !forwarded {
                            self.abandon(session.id()).await;
                            return;
                        }
                        invocations.push(invocation);
                    }
                    ProviderEvent::Completed { message, usage, .. } => {
                        completed = Some((message, usage));
                    }
                    ProviderEvent::Error { kind, message } => {
                        self.finish_err_kind(&tx, session.id(), kind, message).await;
                        return;
                    }
                }
            }

            let Some((assistant, usage)) = completed else {
                self.finish_err(
                    &tx,
                    session.id(),
                    GatewayError::ProviderProtocol("stream ended without completion".to_string()),
                )
                .await;
                return;
            };

            total_usage.add(&usage);
            messages.push(assistant.clone());
            appends.push(assistant.clone());

            if invocations.is_empty() {
                // Finalizing: commit this turn's messages, then close out
                tracing::debug!(round, phase = "finalizing", "Turn completed");
                session.append_all(appends).await;

                let text = assistant.text();
                tracing::info!(
                    rounds = round,
                    total_tokens = total_usage.total_tokens,
                    "Turn finished"
                );

                if emit(&tx, StreamEvent::Result {
                    text,
                    usage: total_usage.clone(),
                })
                .await
                {
                    let _ = emit(&tx, StreamEvent::Done).await;
                }
                self.permissions.purge_session(session.id()).await;
                return;
            }

            // Resolve tool invocations strictly sequentially
            let mut blocks = Vec::new();
            for invocation in invocations {
                let gated = self
                    .executor
                    .requires_permission(&invocation.name)
                    .unwrap_or(false);

                let outcome = if gated {
                    let pending = self.permissions.create(session.id(), invocation.clone()).await;
                    let request_id = pending.request.id.clone();

                    let forwarded = emit(&tx, StreamEvent::PermissionRequest {
                        request_id: request_id.clone(),
                        tool_id: invocation.id.clone(),
                        name: invocation.name.clone(),
                        args: invocation.args.clone(),
                    })
                    .await;
                    if !forwarded {
                        self.abandon(session.id()).await;
                        return;
                    }

                    tracing::debug!(
                        request_id = request_id.as_str(),
                        tool = invocation.name.as_str(),
                        phase = "awaiting_permission",
                        "Suspended on permission decision"
                    );

                    match self
                        .permissions
                        .await_decision(pending, self.options.permission_timeout, &cancel)
                        .await
                    {
                        Ok(Decision::Allow) => self.execute_tool(&tx, &invocation).await,
                        Ok(Decision::Deny) => ToolOutcome::Denied {
                            reason: "denied by user".to_string(),
                        },
                        Err(e) => {
                            self.finish_err(&tx, session.id(), e).await;
                            return;
                        }
                    }
                } else {
                    self.execute_tool(&tx, &invocation).await
                };

                let forwarded = emit(&tx, StreamEvent::ToolResult {
                    id: invocation.id.clone(),
                    name: invocation.name.clone(),
                    outcome: outcome.clone(),
                })
                .await;
                if !forwarded {
                    self.abandon(session.id()).await;
                    return;
                }

                // Feed the outcome back so the model can adapt; denials and
                // failures are marked as errors
                let (content, is_error) = match outcome {
                    ToolOutcome::Success { content } => (content, false),
                    ToolOutcome::Denied { reason } => (format!("Permission denied: {}", reason), true),
                    ToolOutcome::Failed { message } => (message, true),
                };
                blocks.push(ContentBlock::ToolResult {
                    tool_use_id: invocation.id,
                    content,
                    is_error: Some(is_error),
                });
            }

            pending_results = Some(Message::tool_results(blocks));
        }
    }

    async fn execute_tool(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        invocation: &ToolInvocation,
    ) -> ToolOutcome {
        let _ = emit(tx, StreamEvent::Status {
            message: format!("executing {}", invocation.name),
        })
        .await;

        match self.executor.execute(&invocation.name, &invocation.args).await {
            Ok(output) if output.success => ToolOutcome::Success {
                content: output.content,
            },
            Ok(output) => ToolOutcome::Failed {
                message: output.content,
            },
            Err(e) => ToolOutcome::Failed {
                message: e.to_string(),
            },
        }
    }

    async fn finish_err(&self, tx: &mpsc::Sender<StreamEvent>, session_id: &str, err: GatewayError) {
        self.finish_err_kind(tx, session_id, err.kind(), err.to_string())
            .await
    }

    /// Errored: emit `error` then `done` exactly once, purge the session's
    /// permission requests, commit nothing
    async fn finish_err_kind(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        session_id: &str,
        kind: ErrorKind,
        message: String,
    ) {
        tracing::warn!(session_id, ?kind, message = message.as_str(), "Turn failed");
        if emit(tx, StreamEvent::Error { kind, message }).await {
            let _ = emit(tx, StreamEvent::Done).await;
        }
        self.permissions.purge_session(session_id).await;
    }

    /// The client stopped listening; stop working and clean up
    async fn abandon(&self, session_id: &str) {
        tracing::debug!(session_id, "Event channel closed, abandoning turn");
        self.permissions.purge_session(session_id).await;
    }
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}
