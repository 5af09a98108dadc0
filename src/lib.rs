//! Parley: streaming conversation gateway
//!
//! Mediates real-time conversational exchanges between a client and one of
//! several interchangeable LLM backends, while allowing the model to request
//! execution of side-effecting tools that must first be approved by the
//! human user.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::{Decision, Gateway, GatewayConfig, ProviderKind, StreamEvent};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let gateway = Gateway::builder()
//!     .config(GatewayConfig::from_env()?)
//!     .build()?;
//!
//! let mut turn = gateway.submit("session-1", "What's 2+2?").await;
//! while let Some(event) = turn.recv().await {
//!     match event {
//!         StreamEvent::Text { text } => print!("{text}"),
//!         StreamEvent::PermissionRequest { request_id, name, .. } => {
//!             // Surface to the human; their decision arrives out of band:
//!             gateway.resolve_permission(&request_id, Decision::Allow).await?;
//!             println!("approved {name}");
//!         }
//!         StreamEvent::Done => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Gateway (facade)
//!   ├── TurnRunner (per-turn state machine)
//!   │     ├── Provider (Claude / OpenAI adapters → ProviderEvent)
//!   │     ├── ToolExecutor (catalog + validated execution)
//!   │     └── PermissionRegistry (suspend/resume on human decisions)
//!   └── SessionRegistry (per-session history + turn lock)
//! ```
//!
//! Each turn runs as its own task and emits a strictly ordered
//! [`StreamEvent`] sequence ending in exactly one `done`. Turns for distinct
//! sessions never block one another; the only suspension point is the wait
//! for a human permission decision.

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod permission;
pub mod provider;
pub mod session;
pub mod tools;
mod turn;

// Re-export key types at crate root for ergonomic usage
pub use config::{GatewayConfig, ProviderKind, SecretString};
pub use error::{ErrorKind, GatewayError, Result};
pub use event::{
    ContentBlock, Message, Role, StreamEvent, TokenUsage, ToolInvocation, ToolOutcome,
};
pub use gateway::{Gateway, GatewayBuilder, TurnHandle};
pub use permission::{Decision, PermissionRegistry, PermissionRequest};
pub use provider::{ClaudeProvider, OpenAiProvider, Provider, ProviderEvent, ToolDefinition};
pub use session::{Session, SessionHandle, SessionRegistry};
pub use tools::{builtin_tools, Tool, ToolExecutor, ToolOutput, ToolRegistry};
pub use turn::TurnOptions;

/// Install a `tracing` subscriber reading `RUST_LOG`, for binaries and tests.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}
