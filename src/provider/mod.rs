//! Provider adapters
//!
//! One seam isolates provider-specific churn from the orchestrator: each
//! adapter translates the session history plus tool catalog into its
//! provider's native API call, and translates the native streaming /
//! tool-call wire shape back into the neutral [`ProviderEvent`] vocabulary.
//! The orchestrator never branches on provider identity.
//!
//! Adapters do not retry. A transient failure surfaces as an `Error` event
//! (or an `Err` before the stream starts); retry policy, if any, belongs to
//! the caller.

mod claude;
mod openai;

pub use claude::ClaudeProvider;
pub use openai::OpenAiProvider;

use crate::config::{GatewayConfig, ProviderKind};
use crate::error::{ErrorKind, Result};
use crate::event::{ContentBlock, Message, TokenUsage, ToolInvocation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel capacity for provider event streams
pub(crate) const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Serializable tool descriptor handed to providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
    /// Whether execution requires an explicit human decision
    pub requires_permission: bool,
}

/// One event on a provider adapter's output stream.
///
/// The sequence is single-pass and finite: it ends with `Completed` (whose
/// message carries any `tool_use` blocks awaiting results) or with `Error`.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Incremental text content
    TextDelta(String),
    /// A fully parsed tool invocation
    ToolUse(ToolInvocation),
    /// Generation round finished
    Completed {
        message: Message,
        usage: TokenUsage,
        stop_reason: Option<String>,
    },
    /// The round cannot continue
    Error { kind: ErrorKind, message: String },
}

/// Provider adapter trait
///
/// `stream_turn` starts a generation round over the given context;
/// `continue_turn` resumes after tool execution by appending the tool
/// outcomes to the provider-native context. Each adapter's message converter
/// renders `Role::Tool` messages in its provider's native shape, so the
/// default `continue_turn` only needs to extend the context and delegate.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs and diagnostics
    fn name(&self) -> &str;

    /// Stream one generation round over the conversation context
    async fn stream_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<ProviderEvent>>;

    /// Resume generation after tool execution. `results` is the tool outcome
    /// message produced for the invocations of the previous round.
    async fn continue_turn(
        &self,
        prior: &[Message],
        results: &Message,
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<ProviderEvent>> {
        let mut context = prior.to_vec();
        context.push(results.clone());
        self.stream_turn(&context, tools).await
    }
}

/// Construct the configured provider adapter
pub fn create_provider(config: &GatewayConfig) -> Arc<dyn Provider> {
    match config.provider {
        ProviderKind::Claude => {
            let mut provider = ClaudeProvider::new(config.api_key.clone(), config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(system) = &config.system_prompt {
                provider = provider.with_system_prompt(system.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::OpenAi => {
            let mut provider = OpenAiProvider::new(config.api_key.clone(), config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(system) = &config.system_prompt {
                provider = provider.with_system_prompt(system.clone());
            }
            Arc::new(provider)
        }
    }
}

/// Normalize base URL by stripping trailing slashes and a trailing /v1
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .trim_end_matches("/v1")
        .trim_end_matches('/')
        .to_string()
}

/// Render a tool outcome message's blocks, asserting the expected shape.
/// Used by adapters when converting `Role::Tool` messages.
pub(crate) fn tool_result_blocks(message: &Message) -> Vec<(&str, &str, bool)> {
    message
        .content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                Some((
                    tool_use_id.as_str(),
                    content.as_str(),
                    is_error.unwrap_or(false),
                ))
            } else {
                None
            }
        })
        .collect()
}

/// Minimal SSE framing shared by both adapters
pub(crate) mod sse {
    /// Drain complete events (terminated by a blank line) from the buffer
    pub fn drain_events(buffer: &mut String) -> Vec<String> {
        let mut events = Vec::new();
        while let Some(pos) = buffer.find("\n\n") {
            let event: String = buffer.drain(..pos).collect();
            buffer.drain(..2);
            if !event.trim().is_empty() {
                events.push(event);
            }
        }
        events
    }

    /// Extract `data:` payload lines from one SSE event
    pub fn data_lines(event: &str) -> Vec<&str> {
        event
            .lines()
            .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
            .map(|data| data.trim_start())
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com/v1"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com/v1/"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_tool_result_blocks_extraction() {
        let message = Message::tool_results(vec![
            ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "4".into(),
                is_error: Some(false),
            },
            ContentBlock::ToolResult {
                tool_use_id: "t2".into(),
                content: "denied".into(),
                is_error: Some(true),
            },
        ]);
        assert_eq!(message.role, Role::Tool);
        let blocks = tool_result_blocks(&message);
        assert_eq!(blocks, vec![("t1", "4", false), ("t2", "denied", true)]);
    }

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters: serde_json::json!({"type": "object"}),
            requires_permission: false,
        };
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], "calculator");
        assert_eq!(json["requires_permission"], false);
    }
}
