//! OpenAI adapter (Chat Completions API, SSE streaming)
//!
//! Also serves OpenAI-compatible backends (custom `base_url`).

use super::{normalize_base_url, sse, tool_result_blocks, Provider, ProviderEvent, ToolDefinition};
use crate::config::SecretString;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::event::{ContentBlock, Message, Role, TokenUsage, ToolInvocation};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::Instrument;

/// OpenAI provider adapter
pub struct OpenAiProvider {
    api_key: SecretString,
    model: String,
    base_url: String,
    system: Option<String>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<SecretString>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com".to_string(),
            system: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(base_url.as_ref());
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Render the internal message model in Chat Completions wire shape.
    /// Tool outcome messages expand into one `tool` role message per result
    /// block, correlated by `tool_call_id`.
    fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        let mut converted = Vec::new();
        for msg in messages {
            match msg.role {
                Role::User => {
                    converted.push(serde_json::json!({
                        "role": "user",
                        "content": msg.text(),
                    }));
                }
                Role::Assistant => {
                    let tool_calls: Vec<serde_json::Value> = msg
                        .tool_invocations()
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.args.to_string(),
                                }
                            })
                        })
                        .collect();

                    if tool_calls.is_empty() {
                        converted.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.text(),
                        }));
                    } else {
                        converted.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.text(),
                            "tool_calls": tool_calls,
                        }));
                    }
                }
                Role::Tool => {
                    for (tool_use_id, content, _is_error) in tool_result_blocks(msg) {
                        converted.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
        converted
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> serde_json::Value {
        let mut wire_messages = Vec::new();
        if let Some(system) = &self.system {
            wire_messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }
        wire_messages.extend(Self::convert_messages(messages));

        let mut request = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !tools.is_empty() {
            request["tools"] = serde_json::json!(Self::convert_tools(tools));
        }

        request
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<ProviderEvent>> {
        let span = tracing::info_span!(
            "parley.provider.stream",
            "parley.provider" = "openai",
            "parley.provider.model" = %self.model,
        );
        async {
            let request_body = self.build_request(messages, tools);
            let url = format!("{}/v1/chat/completions", self.base_url);

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key.expose()))
                .json(&request_body)
                .send()
                .await
                .map_err(|e| {
                    GatewayError::ProviderTransport(format!("request to {} failed: {}", url, e))
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GatewayError::ProviderTransport(format!(
                    "OpenAI API error ({}): {}",
                    status, body
                )));
            }

            let (tx, rx) = mpsc::channel(super::STREAM_CHANNEL_CAPACITY);
            let mut stream = response.bytes_stream();

            tokio::spawn(async move {
                let mut buffer = String::new();
                let mut state = StreamState::new();

                'outer: while let Some(chunk_result) = stream.next().await {
                    let chunk = match chunk_result {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = tx
                                .send(ProviderEvent::Error {
                                    kind: ErrorKind::ProviderTransport,
                                    message: format!("stream read failed: {}", e),
                                })
                                .await;
                            return;
                        }
                    };

                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    for event in sse::drain_events(&mut buffer) {
                        for data in sse::data_lines(&event) {
                            for out in state.handle_data(data) {
                                let terminal = matches!(
                                    out,
                                    ProviderEvent::Completed { .. } | ProviderEvent::Error { .. }
                                );
                                if tx.send(out).await.is_err() || terminal {
                                    break 'outer;
                                }
                            }
                        }
                    }
                }

                if !state.terminated {
                    let _ = tx
                        .send(ProviderEvent::Error {
                            kind: ErrorKind::ProviderProtocol,
                            message: "stream ended before completion".to_string(),
                        })
                        .await;
                }
            });

            Ok(rx)
        }
        .instrument(span)
        .await
    }
}

/// Incremental assembly of one streamed completion.
///
/// Tool-call arguments arrive as split fragments keyed by index; invocations
/// are only complete at the `[DONE]` marker, where they are emitted ahead of
/// the final `Completed` event.
struct StreamState {
    text: String,
    tool_calls: BTreeMap<usize, (String, String, String)>,
    usage: TokenUsage,
    finish_reason: Option<String>,
    terminated: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            text: String::new(),
            tool_calls: BTreeMap::new(),
            usage: TokenUsage::default(),
            finish_reason: None,
            terminated: false,
        }
    }

    fn handle_data(&mut self, data: &str) -> Vec<ProviderEvent> {
        if data == "[DONE]" {
            return self.finish();
        }

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.terminated = true;
                return vec![ProviderEvent::Error {
                    kind: ErrorKind::ProviderProtocol,
                    message: format!("unexpected stream chunk: {} ({})", e, data),
                }];
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage.prompt_tokens = usage.prompt_tokens;
            self.usage.completion_tokens = usage.completion_tokens;
            self.usage.total_tokens = usage.total_tokens;
        }

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }

            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        self.text.push_str(&content);
                        events.push(ProviderEvent::TextDelta(content));
                    }
                }

                if let Some(tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = self.tool_calls.entry(tc.index).or_default();
                        if let Some(id) = tc.id {
                            entry.0 = id;
                        }
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                entry.1 = name;
                            }
                            if let Some(arguments) = function.arguments {
                                entry.2.push_str(&arguments);
                            }
                        }
                    }
                }
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        self.terminated = true;

        let mut blocks = Vec::new();
        let mut events = Vec::new();

        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: std::mem::take(&mut self.text),
            });
        }

        for (_, (id, name, arguments)) in std::mem::take(&mut self.tool_calls) {
            let args = serde_json::from_str(&arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    tool = name.as_str(),
                    "Malformed tool arguments from provider: {}",
                    e
                );
                serde_json::Value::Null
            });
            blocks.push(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: args.clone(),
            });
            events.push(ProviderEvent::ToolUse(ToolInvocation { id, name, args }));
        }

        events.push(ProviderEvent::Completed {
            message: Message {
                role: Role::Assistant,
                content: blocks,
            },
            usage: self.usage.clone(),
            stop_reason: self.finish_reason.take(),
        });
        events
    }
}

// OpenAI streaming types
#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}
