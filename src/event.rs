//! Provider-neutral event model
//!
//! The closed vocabulary shared by every other component:
//! - `Message` / `ContentBlock`: the conversation history shape owned by the
//!   session store and translated by each provider adapter
//! - `ToolInvocation`: a tool call parsed out of model output
//! - `StreamEvent`: the ordered, client-facing event stream for one turn
//!
//! Events are serialized with a `type` tag so the transport layer can frame
//! each one as a single tagged wire message.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Tool outcome messages fed back to the model
    Tool,
}

/// Message content types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Message in conversation history. Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    /// Single tool outcome message
    pub fn tool_result(tool_use_id: &str, content: &str, is_error: bool) -> Self {
        Self::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: content.to_string(),
            is_error: Some(is_error),
        }])
    }

    /// Tool outcome message carrying the results of one provider round
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Tool,
            content: blocks,
        }
    }

    /// Extract concatenated text content from the message
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| {
                if let ContentBlock::Text { text } = block {
                    Some(text.as_str())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract tool invocations from the message
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.content
            .iter()
            .filter_map(|block| {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    Some(ToolInvocation {
                        id: id.clone(),
                        name: name.clone(),
                        args: input.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// A tool call requested by the model, unique by `id` within its turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Token usage statistics, accumulated across provider rounds within a turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Tool executed and produced output
    Success { content: String },
    /// Human denied the invocation; the tool never ran
    Denied { reason: String },
    /// Tool was rejected by validation or failed during execution
    Failed { message: String },
}

/// One event on a turn's ordered output stream.
///
/// Events are emitted in strict FIFO order and never reordered, batched, or
/// deduplicated downstream. Every turn ends with exactly one `done`, always
/// last (preceded by `error` if the turn failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Incremental text from the model
    #[serde(rename = "text")]
    Text { text: String },

    /// Model requested a tool invocation
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// Tool invocation outcome (success, denial, or failure)
    #[serde(rename = "tool_result")]
    ToolResult {
        id: String,
        name: String,
        outcome: ToolOutcome,
    },

    /// A gated tool is awaiting a human decision
    #[serde(rename = "permission_request")]
    PermissionRequest {
        request_id: String,
        tool_id: String,
        name: String,
        args: serde_json::Value,
    },

    /// Informational progress marker
    #[serde(rename = "status")]
    Status { message: String },

    /// Final assistant message for the turn
    #[serde(rename = "result")]
    Result { text: String, usage: TokenUsage },

    /// Turn failed; `done` follows immediately
    #[serde(rename = "error")]
    Error { kind: ErrorKind, message: String },

    /// Terminal marker, always last
    #[serde(rename = "done")]
    Done,
}
