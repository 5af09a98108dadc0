//! End-to-end turn flows through the public gateway API, driven by scripted
//! provider adapters.

use async_trait::async_trait;
use parley::{
    ContentBlock, Decision, ErrorKind, Gateway, GatewayError, Message, Provider, ProviderEvent,
    Role, StreamEvent, TokenUsage, ToolDefinition, ToolInvocation, ToolOutcome,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Scripted providers
// ============================================================================

/// Plays back pre-scripted rounds, one per `stream_turn` call
struct ScriptedProvider {
    rounds: tokio::sync::Mutex<VecDeque<Vec<ProviderEvent>>>,
    round_delay: Duration,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            rounds: tokio::sync::Mutex::new(rounds.into()),
            round_delay: Duration::ZERO,
        }
    }

    fn with_round_delay(mut self, delay: Duration) -> Self {
        self.round_delay = delay;
        self
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }
    }

    fn text_round(deltas: &[&str]) -> Vec<ProviderEvent> {
        let text: String = deltas.concat();
        let mut events: Vec<ProviderEvent> = deltas
            .iter()
            .map(|d| ProviderEvent::TextDelta(d.to_string()))
            .collect();
        events.push(ProviderEvent::Completed {
            message: Message::assistant(&text),
            usage: Self::usage(),
            stop_reason: Some("end_turn".to_string()),
        });
        events
    }

    fn tool_round(preamble: &str, id: &str, name: &str, args: serde_json::Value) -> Vec<ProviderEvent> {
        let invocation = ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            args: args.clone(),
        };
        let mut content = Vec::new();
        let mut events = Vec::new();
        if !preamble.is_empty() {
            events.push(ProviderEvent::TextDelta(preamble.to_string()));
            content.push(ContentBlock::Text {
                text: preamble.to_string(),
            });
        }
        content.push(ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input: args,
        });
        events.push(ProviderEvent::ToolUse(invocation));
        events.push(ProviderEvent::Completed {
            message: Message {
                role: Role::Assistant,
                content,
            },
            usage: Self::usage(),
            stop_reason: Some("tool_use".to_string()),
        });
        events
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> parley::Result<mpsc::Receiver<ProviderEvent>> {
        let round = self
            .rounds
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| GatewayError::ProviderTransport("scripted rounds exhausted".into()))?;

        let delay = self.round_delay;
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            for event in round {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Echoes the latest user message back, prefixed; used to verify stream
/// isolation across concurrent sessions
struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_turn(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> parley::Result<mpsc::Receiver<ProviderEvent>> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let reply = format!("echo:{}", last_user);
            // Small delay to force turns to interleave on the runtime
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(ProviderEvent::TextDelta(reply.clone())).await;
            let _ = tx
                .send(ProviderEvent::Completed {
                    message: Message::assistant(&reply),
                    usage: ScriptedProvider::usage(),
                    stop_reason: Some("end_turn".to_string()),
                })
                .await;
        });
        Ok(rx)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn gateway_with(provider: impl Provider + 'static) -> Gateway {
    Gateway::builder()
        .provider(Arc::new(provider))
        .build()
        .unwrap()
}

async fn collect(turn: &mut parley::TurnHandle) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = turn.recv().await {
        events.push(event);
    }
    events
}

/// Event kind tags in emission order, with informational `status` dropped
fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Text { .. } => Some("text"),
            StreamEvent::ToolUse { .. } => Some("tool_use"),
            StreamEvent::ToolResult { .. } => Some("tool_result"),
            StreamEvent::PermissionRequest { .. } => Some("permission_request"),
            StreamEvent::Status { .. } => None,
            StreamEvent::Result { .. } => Some("result"),
            StreamEvent::Error { .. } => Some("error"),
            StreamEvent::Done => Some("done"),
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn ungated_calculator_turn_emits_expected_sequence() {
    parley::init_tracing();
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_round(
            "Let me compute that. ",
            "t1",
            "calculator",
            serde_json::json!({"a": 2, "b": 2, "op": "+"}),
        ),
        ScriptedProvider::text_round(&["2+2 equals 4."]),
    ]);
    let gateway = gateway_with(provider);

    let mut turn = gateway.submit("s1", "What's 2+2?").await;
    let events = collect(&mut turn).await;

    assert_eq!(
        kinds(&events),
        vec!["text", "tool_use", "tool_result", "text", "result", "done"]
    );

    // The calculator actually ran
    let outcome = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(outcome, ToolOutcome::Success { content: "4".into() });

    // Accumulated usage across both rounds
    match events.iter().rev().nth(1) {
        Some(StreamEvent::Result { usage, .. }) => assert_eq!(usage.total_tokens, 30),
        other => panic!("expected result, got {:?}", other),
    }
}

#[tokio::test]
async fn gated_web_search_denied_turn() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_round(
            "",
            "t1",
            "web_search",
            serde_json::json!({"query": "rust async"}),
        ),
        ScriptedProvider::text_round(&["I won't search without permission."]),
    ]);
    let gateway = gateway_with(provider);

    let mut turn = gateway.submit("s1", "search the web").await;

    let mut events = Vec::new();
    let request_id = loop {
        let event = turn.recv().await.expect("stream ended early");
        let id = match &event {
            StreamEvent::PermissionRequest { request_id, .. } => Some(request_id.clone()),
            _ => None,
        };
        events.push(event);
        if let Some(id) = id {
            break id;
        }
    };

    gateway
        .resolve_permission(&request_id, Decision::Deny)
        .await
        .unwrap();

    events.extend(collect(&mut turn).await);

    assert_eq!(
        kinds(&events),
        vec![
            "tool_use",
            "permission_request",
            "tool_result",
            "text",
            "result",
            "done"
        ]
    );

    let outcome = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .unwrap();
    assert!(matches!(outcome, ToolOutcome::Denied { .. }));
}

#[tokio::test]
async fn permission_timeout_then_late_resolve_is_not_found() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::tool_round(
        "",
        "t1",
        "web_search",
        serde_json::json!({"query": "rust"}),
    )]);
    let gateway = Gateway::builder()
        .provider(Arc::new(provider))
        .permission_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let mut turn = gateway.submit("s1", "search").await;

    let request_id = loop {
        match turn.recv().await.expect("stream ended early") {
            StreamEvent::PermissionRequest { request_id, .. } => break request_id,
            _ => continue,
        }
    };

    let events = collect(&mut turn).await;
    let trailing = kinds(&events);
    assert_eq!(trailing.last(), Some(&"done"));
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::Error { kind, .. } if *kind == ErrorKind::TurnTimedOut)
    ));

    // The request was purged; a late decision hits an unknown identifier
    let late = gateway.resolve_permission(&request_id, Decision::Allow).await;
    assert!(matches!(late, Err(GatewayError::PermissionNotFound(_))));
}

#[tokio::test]
async fn duplicate_resolve_while_turn_is_running_is_already_resolved() {
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_round("", "t1", "web_search", serde_json::json!({"query": "x"})),
        ScriptedProvider::text_round(&["ok"]),
    ])
    // Keep the turn alive after the decision so the tombstone is observable
    .with_round_delay(Duration::from_millis(150));
    let gateway = gateway_with(provider);

    let mut turn = gateway.submit("s1", "search").await;
    let request_id = loop {
        match turn.recv().await.expect("stream ended early") {
            StreamEvent::PermissionRequest { request_id, .. } => break request_id,
            _ => continue,
        }
    };

    gateway
        .resolve_permission(&request_id, Decision::Deny)
        .await
        .unwrap();

    let second = gateway.resolve_permission(&request_id, Decision::Allow).await;
    assert!(matches!(
        second,
        Err(GatewayError::PermissionAlreadyResolved(_))
    ));

    // No extra tool_result appeared because of the duplicate resolve
    let events = collect(&mut turn).await;
    let result_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolResult { .. }))
        .count();
    assert_eq!(result_count, 1);
}

#[tokio::test]
async fn history_of_unknown_session_is_explicit_failure() {
    let gateway = gateway_with(EchoProvider);
    let result = gateway.history("never-seen").await;
    assert!(matches!(result, Err(GatewayError::SessionNotFound(id)) if id == "never-seen"));
}

#[tokio::test]
async fn concurrent_sessions_do_not_cross_streams() {
    let gateway = Arc::new(gateway_with(EchoProvider));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let gateway = gateway.clone();
        tasks.push(tokio::spawn(async move {
            let session_id = format!("session-{}", i);
            let prompt = format!("hello-{}", i);
            let mut turn = gateway.submit(&session_id, &prompt).await;
            let mut events = Vec::new();
            while let Some(event) = turn.recv().await {
                events.push(event);
            }
            (session_id, prompt, events)
        }));
    }

    for task in tasks {
        let (session_id, prompt, events) = task.await.unwrap();
        assert!(matches!(events.last(), Some(StreamEvent::Done)));

        // Every text event on this channel belongs to this session's turn
        for event in &events {
            if let StreamEvent::Text { text } = event {
                assert_eq!(
                    text,
                    &format!("echo:{}", prompt),
                    "session {} received another session's event",
                    session_id
                );
            }
        }

        let history = gateway.history(&session_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), prompt);
        assert_eq!(history[1].text(), format!("echo:{}", prompt));
    }
}

#[tokio::test]
async fn multi_turn_history_accumulates_in_order() {
    let gateway = gateway_with(EchoProvider);

    for n in 0..3 {
        let mut turn = gateway.submit("s1", &format!("turn-{}", n)).await;
        let _ = collect(&mut turn).await;
    }

    let history = gateway.history("s1").await.unwrap();
    assert_eq!(history.len(), 6);
    for n in 0..3 {
        assert_eq!(history[2 * n].text(), format!("turn-{}", n));
        assert_eq!(history[2 * n].role, Role::User);
        assert_eq!(history[2 * n + 1].text(), format!("echo:turn-{}", n));
        assert_eq!(history[2 * n + 1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn provider_failure_before_stream_is_terminal_error() {
    // Zero scripted rounds: the very first stream_turn fails
    let gateway = gateway_with(ScriptedProvider::new(vec![]));

    let mut turn = gateway.submit("s1", "hi").await;
    let events = collect(&mut turn).await;

    assert_eq!(kinds(&events), vec!["error", "done"]);
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::Error { kind, .. } if *kind == ErrorKind::ProviderTransport)
    ));

    // Only the user message survives in history
    let history = gateway.history("s1").await.unwrap();
    assert_eq!(history.len(), 1);
}
