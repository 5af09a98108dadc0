//! Gateway facade
//!
//! Wires the session registry, permission registry, tool executor, and the
//! configured provider adapter behind one entry point. This is the boundary
//! the transport layer consumes:
//!
//! ```rust,no_run
//! use parley::{Gateway, GatewayConfig, ProviderKind, StreamEvent};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let gateway = Gateway::builder()
//!     .config(GatewayConfig::new(
//!         ProviderKind::Claude,
//!         "claude-sonnet-4-20250514",
//!         "sk-ant-...",
//!     ))
//!     .build()?;
//!
//! let mut turn = gateway.submit("session-1", "What's 2+2?").await;
//! while let Some(event) = turn.recv().await {
//!     match event {
//!         StreamEvent::Text { text } => print!("{text}"),
//!         StreamEvent::Done => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::event::{Message, StreamEvent};
use crate::permission::{Decision, PermissionRegistry};
use crate::provider::{create_provider, Provider, ToolDefinition};
use crate::session::SessionRegistry;
use crate::tools::{Tool, ToolExecutor};
use crate::turn::{TurnOptions, TurnRunner};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Capacity of each turn's event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// One in-flight turn: the ordered event stream plus its cancellation handle.
///
/// The transport layer forwards each event as one wire message and closes
/// the wire stream only after `done`; cancelling corresponds to client
/// disconnect.
pub struct TurnHandle {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl TurnHandle {
    /// Next event in turn order; `None` after the terminal event
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Abort the turn (client disconnect)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token tied to this turn's lifetime, for composing with transport
    /// shutdown signals
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the turn task has finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Expose the events as a `Stream` for SSE-style consumers
    pub fn into_stream(self) -> ReceiverStream<StreamEvent> {
        ReceiverStream::new(self.events)
    }
}

/// The conversation gateway
pub struct Gateway {
    sessions: Arc<SessionRegistry>,
    permissions: Arc<PermissionRegistry>,
    executor: Arc<ToolExecutor>,
    runner: TurnRunner,
}

impl Gateway {
    /// Create a new [`GatewayBuilder`]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Submit a user message to a session, starting one turn.
    ///
    /// The session is created lazily on first reference. The turn runs as its
    /// own task; turns for the same session queue, turns for distinct
    /// sessions run independently.
    pub async fn submit(&self, session_id: &str, text: &str) -> TurnHandle {
        let session = self.sessions.get_or_create(session_id).await;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let runner = self.runner.clone();
        let text = text.to_string();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            runner.run(session, text, tx, task_cancel).await;
        });

        TurnHandle {
            events: rx,
            cancel,
            task,
        }
    }

    /// Record a human decision for a pending permission request.
    ///
    /// The decision endpoint maps the outcome to its caller: success,
    /// `PermissionNotFound`, or `PermissionAlreadyResolved`.
    pub async fn resolve_permission(&self, request_id: &str, decision: Decision) -> Result<()> {
        self.permissions.resolve(request_id, decision).await
    }

    /// Ordered history of an existing session
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.sessions.history(session_id).await
    }

    /// Delete a session (external eviction hook)
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete(session_id).await
    }

    /// Identifiers of all live sessions
    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.list().await
    }

    /// The static tool catalog
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.executor.catalog()
    }

    /// Number of permission requests still awaiting a decision
    pub async fn pending_permissions(&self) -> usize {
        self.permissions.pending_count().await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

// ============================================================================
// GatewayBuilder
// ============================================================================

/// Builder for constructing a [`Gateway`]
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    provider: Option<Arc<dyn Provider>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    builtin_tools: bool,
    permission_timeout: Option<Duration>,
    max_rounds: Option<usize>,
}

impl GatewayBuilder {
    fn new() -> Self {
        Self {
            config: None,
            provider: None,
            extra_tools: Vec::new(),
            builtin_tools: true,
            permission_timeout: None,
            max_rounds: None,
        }
    }

    /// Supply static configuration (provider selection, credentials, limits)
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Supply a pre-built provider adapter, overriding config-based selection
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register an additional tool
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// Start from an empty catalog instead of the builtin tools
    pub fn without_builtin_tools(mut self) -> Self {
        self.builtin_tools = false;
        self
    }

    /// Override the permission decision timeout
    pub fn permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout = Some(timeout);
        self
    }

    /// Override the per-turn provider round cap
    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    /// Build the [`Gateway`]
    pub fn build(self) -> anyhow::Result<Gateway> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => {
                let config = self
                    .config
                    .as_ref()
                    .context("a provider or a config is required")?;
                create_provider(config)
            }
        };

        let mut options = TurnOptions::default();
        if let Some(config) = &self.config {
            options.permission_timeout = config.permission_timeout();
            options.max_rounds = config.max_rounds;
        }
        if let Some(timeout) = self.permission_timeout {
            options.permission_timeout = timeout;
        }
        if let Some(max_rounds) = self.max_rounds {
            options.max_rounds = max_rounds;
        }

        let executor = if self.builtin_tools {
            ToolExecutor::with_builtins()
        } else {
            ToolExecutor::new()
        };
        for tool in self.extra_tools {
            executor.register(tool);
        }
        let executor = Arc::new(executor);

        let sessions = Arc::new(SessionRegistry::new());
        let permissions = Arc::new(PermissionRegistry::new());
        let runner = TurnRunner::new(
            provider,
            executor.clone(),
            permissions.clone(),
            options,
        );

        Ok(Gateway {
            sessions,
            permissions,
            executor,
            runner,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
