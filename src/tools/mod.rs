//! Tool system
//!
//! A static catalog of invocable tools, each with a declared permission
//! requirement, behind a single execution entry point:
//!
//! ```text
//! ToolExecutor
//!   └── ToolRegistry
//!         ├── clock        (ungated)
//!         ├── calculator   (ungated)
//!         └── web_search   (gated)
//! ```
//!
//! The executor validates arguments against each tool's declared schema
//! before dispatch, so tools receive well-shaped input and the orchestrator
//! gets structured failures it can feed back to the model.

mod builtin;
mod registry;
mod types;

pub use builtin::{builtin_tools, CalculatorTool, ClockTool, WebSearchTool};
pub use registry::ToolRegistry;
pub use types::{Tool, ToolOutput};

use crate::error::{GatewayError, Result};
use crate::provider::ToolDefinition;
use std::sync::Arc;

/// Tool executor: catalog plus validated execution
///
/// Owns no mutable state beyond the catalog, which is fixed after startup.
/// A failing tool is contained here: failures surface as structured errors
/// and never touch session or permission state.
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    /// Empty executor (tests, custom catalogs)
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }

    /// Executor preloaded with the builtin catalog
    pub fn with_builtins() -> Self {
        let executor = Self::new();
        for tool in builtin_tools() {
            executor.registry.register(tool);
        }
        executor
    }

    /// Register an additional tool
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.registry.register(tool);
    }

    /// Serializable catalog for provider calls
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Permission requirement for a tool, `None` if unknown
    pub fn requires_permission(&self, name: &str) -> Option<bool> {
        self.registry.get(name).map(|t| t.requires_permission())
    }

    /// Execute a tool by name.
    ///
    /// Failure taxonomy: `ToolUnknown` for names outside the catalog,
    /// `ToolInvalidArguments` when the arguments fail schema validation,
    /// `ToolExecutionFailed` when the tool itself errors. A returned
    /// `ToolOutput` with `success: false` is a soft, tool-level failure.
    pub async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| GatewayError::ToolUnknown(name.to_string()))?;

        validate_args(name, &tool.parameters(), args)?;

        tracing::info!(tool = name, args = %args, "Executing tool");
        let result = tool
            .execute(args)
            .await
            .map_err(|e| GatewayError::ToolExecutionFailed {
                tool: name.to_string(),
                reason: e.to_string(),
            });

        match &result {
            Ok(output) => {
                tracing::info!(tool = name, success = output.success, "Tool completed")
            }
            Err(e) => tracing::warn!(tool = name, error = %e, "Tool failed"),
        }
        result
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Validate arguments against the subset of JSON Schema the catalog uses:
/// an object with typed properties and a `required` list.
fn validate_args(tool: &str, schema: &serde_json::Value, args: &serde_json::Value) -> Result<()> {
    let invalid = |reason: String| GatewayError::ToolInvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    // Adapters substitute null when the provider produced unparsable
    // arguments; treat it as an empty object so required checks fire.
    let object = match args {
        serde_json::Value::Object(map) => Some(map),
        serde_json::Value::Null => None,
        other => {
            return Err(invalid(format!(
                "expected an object, got {}",
                json_type_name(other)
            )))
        }
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for key in required.iter().filter_map(|v| v.as_str()) {
            let present = object.map(|map| map.contains_key(key)).unwrap_or(false);
            if !present {
                return Err(invalid(format!("missing required argument '{}'", key)));
            }
        }
    }

    let (Some(object), Some(properties)) = (
        object,
        schema.get("properties").and_then(|v| v.as_object()),
    ) else {
        return Ok(());
    };

    for (key, value) in object {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
        else {
            // Unknown or untyped properties pass through
            continue;
        };

        let ok = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(invalid(format!(
                "argument '{}' must be a {}, got {}",
                key,
                expected,
                json_type_name(value)
            )));
        }
    }

    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
