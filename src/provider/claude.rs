//! Anthropic Claude adapter (Messages API, SSE streaming)

use super::{normalize_base_url, sse, Provider, ProviderEvent, ToolDefinition};
use crate::config::SecretString;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::event::{ContentBlock, Message, Role, TokenUsage, ToolInvocation};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Default max tokens for model responses
const DEFAULT_MAX_TOKENS: usize = 8192;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider adapter
pub struct ClaudeProvider {
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: usize,
    system: Option<String>,
    client: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(api_key: impl Into<SecretString>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
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

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Render the internal message model in Anthropic's wire shape.
    /// Tool outcome messages become `user` messages carrying `tool_result`
    /// blocks, which is how the Messages API resumes after tool use.
    fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::Tool => "user",
                };
                serde_json::json!({
                    "role": role,
                    "content": msg.content,
                })
            })
            .collect()
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> serde_json::Value {
        let mut request = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": Self::convert_messages(messages),
            "stream": true,
        });

        if let Some(system) = &self.system {
            request["system"] = serde_json::json!(system);
        }

        if !tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            request["tools"] = serde_json::json!(tool_defs);
        }

        request
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn stream_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<ProviderEvent>> {
        let span = tracing::info_span!(
            "parley.provider.stream",
            "parley.provider" = "claude",
            "parley.provider.model" = %self.model,
        );
        async {
            let request_body = self.build_request(messages, tools);
            let url = format!("{}/v1/messages", self.base_url);

            let response = self
                .client
                .post(&url)
                .header("x-api-key", self.api_key.expose())
                .header("anthropic-version", ANTHROPIC_VERSION)
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
                    "Anthropic API error ({}): {}",
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
                                // A closed receiver means the turn was
                                // abandoned; stop reading the wire.
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

/// Incremental assembly of one streamed response
struct StreamState {
    blocks: Vec<ContentBlock>,
    current_text: String,
    current_tool: Option<(String, String, String)>,
    usage: TokenUsage,
    stop_reason: Option<String>,
    terminated: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current_text: String::new(),
            current_tool: None,
            usage: TokenUsage::default(),
            stop_reason: None,
            terminated: false,
        }
    }

    fn handle_data(&mut self, data: &str) -> Vec<ProviderEvent> {
        let event = match serde_json::from_str::<ClaudeStreamEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                self.terminated = true;
                return vec![ProviderEvent::Error {
                    kind: ErrorKind::ProviderProtocol,
                    message: format!("unexpected stream event: {} ({})", e, data),
                }];
            }
        };
        self.handle_event(event)
    }

    fn handle_event(&mut self, event: ClaudeStreamEvent) -> Vec<ProviderEvent> {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.usage.prompt_tokens = message.usage.input_tokens;
                vec![]
            }
            ClaudeStreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                ClaudeContentBlock::Text { text } => {
                    self.current_text = text;
                    vec![]
                }
                ClaudeContentBlock::ToolUse { id, name, .. } => {
                    self.current_tool = Some((id, name, String::new()));
                    vec![]
                }
            },
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ClaudeDelta::TextDelta { text } => {
                    self.current_text.push_str(&text);
                    vec![ProviderEvent::TextDelta(text)]
                }
                ClaudeDelta::InputJsonDelta { partial_json } => {
                    if let Some((_, _, input)) = self.current_tool.as_mut() {
                        input.push_str(&partial_json);
                    }
                    vec![]
                }
            },
            ClaudeStreamEvent::ContentBlockStop { .. } => {
                if let Some((id, name, input)) = self.current_tool.take() {
                    // Unparsable arguments degrade to null; downstream
                    // validation reports the failure to the model.
                    let args = serde_json::from_str(&input).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = name.as_str(),
                            "Malformed tool input from provider: {}",
                            e
                        );
                        serde_json::Value::Null
                    });
                    self.blocks.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: args.clone(),
                    });
                    vec![ProviderEvent::ToolUse(ToolInvocation { id, name, args })]
                } else {
                    if !self.current_text.is_empty() {
                        self.blocks.push(ContentBlock::Text {
                            text: std::mem::take(&mut self.current_text),
                        });
                    }
                    vec![]
                }
            }
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                self.usage.completion_tokens = usage.output_tokens;
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                vec![]
            }
            ClaudeStreamEvent::MessageStop => {
                self.terminated = true;
                vec![ProviderEvent::Completed {
                    message: Message {
                        role: Role::Assistant,
                        content: std::mem::take(&mut self.blocks),
                    },
                    usage: self.usage.clone(),
                    stop_reason: self.stop_reason.clone(),
                }]
            }
            ClaudeStreamEvent::Ping => vec![],
            ClaudeStreamEvent::Error { error } => {
                self.terminated = true;
                vec![ProviderEvent::Error {
                    kind: ErrorKind::ProviderTransport,
                    message: format!("{}: {}", error.error_type, error.message),
                }]
            }
        }
    }
}

// Anthropic streaming event types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: ClaudeMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        #[allow(dead_code)]
        index: usize,
        content_block: ClaudeContentBlock,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        #[allow(dead_code)]
        index: usize,
        delta: ClaudeDelta,
    },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: ClaudeMessageDelta,
        usage: ClaudeOutputUsage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error { error: ClaudeApiError },
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageStart {
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        #[allow(dead_code)]
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ClaudeOutputUsage {
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new("test-key", "claude-sonnet-4-20250514")
            .with_system_prompt("You are helpful.")
    }

    fn drive(datas: &[&str]) -> Vec<ProviderEvent> {
        let mut state = StreamState::new();
        datas
            .iter()
            .flat_map(|data| state.handle_data(data))
            .collect()
    }

    #[test]
    fn test_build_request_shape() {
        let tools = vec![ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters: serde_json::json!({"type": "object"}),
            requires_permission: false,
        }];
        let request = provider().build_request(&[Message::user("hi")], &tools);

        assert_eq!(request["model"], "claude-sonnet-4-20250514");
        assert_eq!(request["stream"], true);
        assert_eq!(request["system"], "You are helpful.");
        assert_eq!(request["messages"][0]["role"], "user");
        assert_eq!(request["messages"][0]["content"][0]["type"], "text");
        assert_eq!(request["tools"][0]["name"], "calculator");
        assert!(request["tools"][0]["input_schema"].is_object());
    }

    #[test]
    fn test_convert_tool_message_to_user_role() {
        let messages = vec![Message::tool_result("t1", "4", false)];
        let converted = ClaudeProvider::convert_messages(&messages);
        assert_eq!(converted[0]["role"], "user");
        assert_eq!(converted[0]["content"][0]["type"], "tool_result");
        assert_eq!(converted[0]["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn test_stream_text_then_stop() {
        let events = drive(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
            r#"{"type":"message_stop"}"#,
        ]);

        assert!(matches!(&events[0], ProviderEvent::TextDelta(t) if t == "Hel"));
        assert!(matches!(&events[1], ProviderEvent::TextDelta(t) if t == "lo"));
        match &events[2] {
            ProviderEvent::Completed {
                message,
                usage,
                stop_reason,
            } => {
                assert_eq!(message.role, Role::Assistant);
                assert_eq!(message.text(), "Hello");
                assert_eq!(usage.prompt_tokens, 12);
                assert_eq!(usage.completion_tokens, 5);
                assert_eq!(usage.total_tokens, 17);
                assert_eq!(stop_reason.as_deref(), Some("end_turn"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_stream_tool_use_assembly() {
        let events = drive(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":3}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"calculator","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"a\":2,"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"b\":2,\"op\":\"+\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
            r#"{"type":"message_stop"}"#,
        ]);

        match &events[0] {
            ProviderEvent::ToolUse(inv) => {
                assert_eq!(inv.id, "toolu_1");
                assert_eq!(inv.name, "calculator");
                assert_eq!(inv.args, serde_json::json!({"a": 2, "b": 2, "op": "+"}));
            }
            other => panic!("expected ToolUse, got {:?}", other),
        }
        match &events[1] {
            ProviderEvent::Completed {
                message,
                stop_reason,
                ..
            } => {
                assert_eq!(stop_reason.as_deref(), Some("tool_use"));
                assert_eq!(message.tool_invocations().len(), 1);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_tool_input_degrades_to_null() {
        let events = drive(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"calculator","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{not json"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
        ]);
        match &events[0] {
            ProviderEvent::ToolUse(inv) => assert!(inv.args.is_null()),
            other => panic!("expected ToolUse, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_event_is_protocol_error() {
        let events = drive(&[r#"{"type":"wat","payload":1}"#]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProviderEvent::Error { kind, .. } => {
                assert_eq!(*kind, ErrorKind::ProviderProtocol)
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_api_error_event_is_transport_error() {
        let events =
            drive(&[r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#]);
        match &events[0] {
            ProviderEvent::Error { kind, message } => {
                assert_eq!(*kind, ErrorKind::ProviderTransport);
                assert!(message.contains("overloaded_error"));
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_text_and_tool_blocks() {
        let events = drive(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me check."}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"clock","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":4}}"#,
            r#"{"type":"message_stop"}"#,
        ]);

        let completed = events
            .iter()
            .find_map(|e| {
                if let ProviderEvent::Completed { message, .. } = e {
                    Some(message.clone())
                } else {
                    None
                }
            })
            .expect("no Completed event");
        assert_eq!(completed.text(), "Let me check.");
        assert_eq!(completed.content.len(), 2);
    }
}
