//! Core types for the tool system

use anyhow::Result;
use async_trait::async_trait;

/// Tool execution output
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Output content
    pub content: String,
    /// Whether execution was successful
    pub success: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            success: false,
        }
    }
}

/// Tool trait - the core abstraction for all tools
///
/// Tools are stateless: execution is a pure function of the arguments, and a
/// failing tool must not disturb any gateway state. Implement this trait and
/// register the tool with the executor to make it available to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique within the catalog)
    fn name(&self) -> &str;

    /// Human-readable description for the model
    fn description(&self) -> &str;

    /// JSON Schema for tool arguments
    fn parameters(&self) -> serde_json::Value;

    /// Whether execution requires an explicit human decision first
    fn requires_permission(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput>;
}
