//! Builtin tool catalog
//!
//! Three reference tools exercising the three execution contracts:
//! - `clock`: pure local lookup, ungated
//! - `calculator`: pure computation, ungated
//! - `web_search`: outbound HTTP, gated behind a human decision

use super::types::{Tool, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Current date/time lookup
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Look up the current date and time. Accepts an optional UTC offset in minutes."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "offset_minutes": {
                    "type": "integer",
                    "description": "UTC offset in minutes, e.g. -300 for UTC-5. Defaults to 0 (UTC)."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let offset_minutes = args
            .get("offset_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let offset = match FixedOffset::east_opt((offset_minutes * 60) as i32) {
            Some(offset) => offset,
            None => {
                return Ok(ToolOutput::error(format!(
                    "offset_minutes {} is out of range",
                    offset_minutes
                )))
            }
        };

        let now = Utc::now().with_timezone(&offset);
        Ok(ToolOutput::success(now.to_rfc3339()))
    }
}

/// Basic arithmetic over two operands
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic on two numbers. Supported operators: +, -, *, /."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "Left operand" },
                "b": { "type": "number", "description": "Right operand" },
                "op": {
                    "type": "string",
                    "enum": ["+", "-", "*", "/"],
                    "description": "Operator"
                }
            },
            "required": ["a", "b", "op"]
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let a = args
            .get("a")
            .and_then(|v| v.as_f64())
            .context("argument 'a' must be a number")?;
        let b = args
            .get("b")
            .and_then(|v| v.as_f64())
            .context("argument 'b' must be a number")?;
        let op = args
            .get("op")
            .and_then(|v| v.as_str())
            .context("argument 'op' must be a string")?;

        let value = match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" => {
                if b == 0.0 {
                    return Ok(ToolOutput::error("division by zero"));
                }
                a / b
            }
            other => {
                return Ok(ToolOutput::error(format!(
                    "unsupported operator '{}' (expected +, -, *, /)",
                    other
                )))
            }
        };

        // Render integers without a trailing ".0"
        let rendered = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{}", value)
        };
        Ok(ToolOutput::success(rendered))
    }
}

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_RESULTS: usize = 5;

/// Web search via the DuckDuckGo instant-answer API. Gated: every invocation
/// requires an explicit human decision before the request leaves the process.
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.duckduckgo.com".to_string(),
        }
    }

    /// Point the tool at a different endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return a short list of result summaries."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .context("argument 'query' must be a string")?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let url = format!("{}/", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("search request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolOutput::error(format!(
                "search backend returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("search backend returned malformed JSON")?;

        let mut lines = Vec::new();
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str()) {
            if !abstract_text.is_empty() {
                lines.push(abstract_text.to_string());
            }
        }
        if let Some(topics) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
            for topic in topics {
                if lines.len() >= max_results {
                    break;
                }
                if let Some(text) = topic.get("Text").and_then(|v| v.as_str()) {
                    lines.push(text.to_string());
                }
            }
        }

        if lines.is_empty() {
            Ok(ToolOutput::success(format!("No results for '{}'", query)))
        } else {
            Ok(ToolOutput::success(lines.join("\n")))
        }
    }
}

/// The default tool catalog
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ClockTool),
        Arc::new(CalculatorTool),
        Arc::new(WebSearchTool::new()),
    ]
}
