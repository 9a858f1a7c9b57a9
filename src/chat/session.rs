// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation data model
//!
//! A session owns its messages by value; the engine addresses the open
//! assistant message by index. Message order is the turn order sent to the
//! provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::message::{ContentBlock, Role, WireMessage};
use crate::llm::usage::UsageSnapshot;

/// Characters of the first user message kept as the session label
const LABEL_CHARS: usize = 40;

/// Output recorded for tool calls that never ran because the chain moved on
pub const INTERRUPTED_TOOL_OUTPUT: &str = "Tool call was interrupted before it ran.";

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    /// Paused while the tool calls of the last turn run
    ToolExecution,
    Error,
}

impl SessionStatus {
    /// Whether a new user turn may be sent
    pub fn accepts_send(&self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Error)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, SessionStatus::Streaming | SessionStatus::ToolExecution)
    }
}

/// Lifecycle of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Aborted,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// One tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned or synthesized (`tool-<uuid>`)
    pub id: String,
    pub name: String,
    /// Parsed input; only meaningful once the call leaves Pending
    pub input: Value,
    /// Raw JSON fragments collected while the block is open
    #[serde(skip)]
    pub raw_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub status: ToolCallStatus,
    /// Gemini thought signature to echo back with the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_signature: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: Value::Object(Default::default()),
            raw_input: String::new(),
            output: None,
            status: ToolCallStatus::Pending,
            reasoning_signature: None,
        }
    }

    /// Synthesized id for vendors that do not assign one
    pub fn synthesize_id() -> String {
        format!("tool-{}", Uuid::new_v4())
    }

    /// Parse the collected fragments. Anything unparseable becomes `{}`.
    pub fn finish_input(&mut self) {
        let raw = std::mem::take(&mut self.raw_input);
        if raw.trim().is_empty() {
            return;
        }
        self.input = match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) | Err(_) => {
                tracing::debug!(
                    target: "shoulders.engine",
                    tool = %self.name,
                    raw = %raw,
                    "tool input did not parse as an object, using {{}}"
                );
                Value::Object(Default::default())
            }
        };
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolCallStatus::Error
    }
}

/// Model reasoning with its opaque signature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A tool result carried on a synthetic user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub tool_name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: call.output.clone().unwrap_or_default(),
            is_error: call.is_error(),
        }
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    /// Append-only while streaming
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking: Vec<ThinkingBlock>,
    /// Results fed back to the model (synthetic user turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub status: MessageStatus,
    /// Priced usage of the turn that produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            tool_calls: Vec::new(),
            thinking: Vec::new(),
            tool_results: Vec::new(),
            status,
            usage: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), MessageStatus::Complete)
    }

    /// Synthetic user turn carrying tool results
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            tool_results: results,
            ..Self::user(String::new())
        }
    }

    /// Open assistant message for a new turn
    pub fn streaming_assistant() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    /// Assistant message that only reports a failure
    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), MessageStatus::Error)
    }

    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    pub fn has_pending_tools(&self) -> bool {
        self.tool_calls
            .iter()
            .any(|call| call.status == ToolCallStatus::Pending)
    }
}

/// One conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    /// Catalog model id resolved through the access resolver
    pub model_id: String,
    pub label: Option<String>,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    /// Estimated prompt tokens of the last request
    pub token_estimate: u64,
    /// Sum of every turn's usage
    pub usage: UsageSnapshot,
    /// Keeps running after the caller stops observing it
    pub background: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.into(),
            label: None,
            messages: Vec::new(),
            status: SessionStatus::Idle,
            token_estimate: 0,
            usage: UsageSnapshot::default(),
            background: false,
            created_at: Utc::now(),
        }
    }

    /// Label from the first user message: newlines flattened, trimmed,
    /// at most 40 characters.
    pub fn label_from(text: &str) -> Option<String> {
        let flat: String = text
            .chars()
            .take(LABEL_CHARS)
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let label = flat.trim();
        (!label.is_empty()).then(|| label.to_string())
    }

    /// Recompute totals from per-message usage.
    pub fn recompute_usage(&mut self) {
        self.usage = self.messages.iter().filter_map(|m| m.usage).sum();
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Render the history sent to the provider.
    ///
    /// The open message and failed turns are skipped. A user turn that
    /// follows an assistant turn with unanswered tool calls gets an
    /// interrupted result for each, since every vendor rejects a tool use
    /// without a result.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        let mut wire = Vec::with_capacity(self.messages.len());
        let mut unanswered: Vec<&ToolCall> = Vec::new();

        for message in &self.messages {
            if matches!(message.status, MessageStatus::Streaming | MessageStatus::Error) {
                continue;
            }
            match message.role {
                Role::User => {
                    let mut blocks = Vec::new();
                    let answered: Vec<&str> = message
                        .tool_results
                        .iter()
                        .map(|r| r.tool_use_id.as_str())
                        .collect();
                    for call in unanswered.drain(..) {
                        if !answered.contains(&call.id.as_str()) {
                            blocks.push(ContentBlock::ToolResult {
                                tool_use_id: call.id.clone(),
                                content: INTERRUPTED_TOOL_OUTPUT.to_string(),
                                is_error: Some(true),
                                tool_name: Some(call.name.clone()),
                            });
                        }
                    }
                    blocks.extend(message.tool_results.iter().map(|result| {
                        ContentBlock::ToolResult {
                            tool_use_id: result.tool_use_id.clone(),
                            content: result.content.clone(),
                            is_error: result.is_error.then_some(true),
                            tool_name: Some(result.tool_name.clone()),
                        }
                    }));

                    if blocks.is_empty() {
                        wire.push(WireMessage::user(message.content.clone()));
                    } else {
                        if !message.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: message.content.clone(),
                            });
                        }
                        wire.push(WireMessage::blocks(Role::User, blocks));
                    }
                }
                Role::Assistant => {
                    unanswered.clear();
                    // Calls of an aborted turn never ran and are not replayed.
                    let calls: &[ToolCall] = if message.status == MessageStatus::Aborted {
                        &[]
                    } else {
                        &message.tool_calls[..]
                    };
                    if calls.is_empty() && message.thinking.is_empty() {
                        if !message.content.is_empty() {
                            wire.push(WireMessage::assistant(message.content.clone()));
                        }
                        continue;
                    }

                    let mut blocks: Vec<ContentBlock> = message
                        .thinking
                        .iter()
                        .map(|block| ContentBlock::Thinking {
                            thinking: block.text.clone(),
                            signature: block.signature.clone(),
                        })
                        .collect();
                    if !message.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    for call in calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.input.clone(),
                            thought_signature: call.reasoning_signature.clone(),
                        });
                        unanswered.push(call);
                    }
                    wire.push(WireMessage::blocks(Role::Assistant, blocks));
                }
            }
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::WireContent;
    use serde_json::json;

    fn tool_call(id: &str, name: &str, input: Value) -> ToolCall {
        ToolCall {
            input,
            status: ToolCallStatus::Done,
            output: Some("ok".into()),
            ..ToolCall::new(id, name)
        }
    }

    #[test]
    fn test_finish_input_parses_fragments() {
        let mut call = ToolCall::new("t1", "read_file");
        call.raw_input.push_str("{\"x\":");
        call.raw_input.push_str("1}");
        call.finish_input();
        assert_eq!(call.input, json!({"x": 1}));
        assert!(call.raw_input.is_empty());
    }

    #[test]
    fn test_finish_input_invalid_becomes_empty_object() {
        let mut call = ToolCall::new("t1", "read_file");
        call.raw_input.push_str("{\"x\":");
        call.finish_input();
        assert_eq!(call.input, json!({}));

        let mut array = ToolCall::new("t2", "read_file");
        array.raw_input.push_str("[1,2]");
        array.finish_input();
        assert_eq!(array.input, json!({}));
    }

    #[test]
    fn test_synthesized_id_shape() {
        let id = ToolCall::synthesize_id();
        assert!(id.starts_with("tool-"));
        assert_eq!(id.len(), "tool-".len() + 36);
    }

    #[test]
    fn test_label_from() {
        assert_eq!(
            Session::label_from("  Summarize\nthis paper  "),
            Some("Summarize this paper".to_string())
        );
        let long = "a".repeat(60);
        assert_eq!(Session::label_from(&long).map(|l| l.len()), Some(40));
        assert_eq!(Session::label_from("\n\n"), None);
    }

    #[test]
    fn test_status_helpers() {
        assert!(SessionStatus::Idle.accepts_send());
        assert!(SessionStatus::Error.accepts_send());
        assert!(!SessionStatus::Streaming.accepts_send());
        assert!(SessionStatus::ToolExecution.is_busy());
    }

    #[test]
    fn test_to_wire_plain_turns() {
        let mut session = Session::new("sonnet");
        session.messages.push(Message::user("hi"));
        let mut reply = Message::streaming_assistant();
        reply.content = "hello".into();
        reply.status = MessageStatus::Complete;
        session.messages.push(reply);
        session.messages.push(Message::streaming_assistant());

        assert_eq!(
            session.to_wire(),
            vec![WireMessage::user("hi"), WireMessage::assistant("hello")]
        );
    }

    #[test]
    fn test_to_wire_tool_loop() {
        let mut session = Session::new("gemini");
        session.messages.push(Message::user("read a.md"));

        let mut assistant = Message::streaming_assistant();
        assistant.status = MessageStatus::Complete;
        assistant.thinking.push(ThinkingBlock {
            text: "plan".into(),
            signature: Some("sig".into()),
        });
        let mut call = tool_call("t1", "read_file", json!({"path": "a.md"}));
        call.reasoning_signature = Some("fsig".into());
        assistant.tool_calls.push(call.clone());
        session.messages.push(assistant);
        session
            .messages
            .push(Message::tool_results(vec![ToolResult::from_call(&call)]));

        let wire = session.to_wire();
        assert_eq!(wire.len(), 3);
        assert_eq!(
            wire[1].content,
            WireContent::Blocks(vec![
                ContentBlock::Thinking {
                    thinking: "plan".into(),
                    signature: Some("sig".into()),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "read_file".into(),
                    input: json!({"path": "a.md"}),
                    thought_signature: Some("fsig".into()),
                },
            ])
        );
        assert_eq!(
            wire[2].content,
            WireContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "ok".into(),
                is_error: None,
                tool_name: Some("read_file".into()),
            }])
        );
    }

    #[test]
    fn test_to_wire_synthesizes_missing_results() {
        let mut session = Session::new("sonnet");
        session.messages.push(Message::user("go"));
        let mut assistant = Message::streaming_assistant();
        assistant.status = MessageStatus::Complete;
        assistant.tool_calls.push(ToolCall::new("t1", "search"));
        session.messages.push(assistant);
        session.messages.push(Message::user("never mind"));

        let wire = session.to_wire();
        let WireContent::Blocks(blocks) = &wire[2].content else {
            panic!("expected blocks");
        };
        assert!(matches!(
            &blocks[0],
            ContentBlock::ToolResult { tool_use_id, is_error: Some(true), .. } if tool_use_id == "t1"
        ));
        assert_eq!(
            blocks[1],
            ContentBlock::Text {
                text: "never mind".into()
            }
        );
    }

    #[test]
    fn test_to_wire_skips_errors_and_aborted_calls() {
        let mut session = Session::new("sonnet");
        session.messages.push(Message::user("first"));
        session
            .messages
            .push(Message::assistant_error("**Error:** Rate limit exceeded."));
        session.messages.push(Message::user("again"));
        let mut aborted = Message::streaming_assistant();
        aborted.content = "partial\n\n*[Aborted]*".into();
        aborted.status = MessageStatus::Aborted;
        aborted.tool_calls.push(ToolCall::new("t9", "search"));
        session.messages.push(aborted);

        let wire = session.to_wire();
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2], WireMessage::assistant("partial\n\n*[Aborted]*"));
    }

    #[test]
    fn test_recompute_usage_sums_turns() {
        let mut session = Session::new("sonnet");
        let mut first = Message::streaming_assistant();
        first.usage = Some(UsageSnapshot {
            output: 10,
            cost: 0.5,
            ..Default::default()
        });
        let mut second = Message::streaming_assistant();
        second.usage = Some(UsageSnapshot {
            output: 5,
            cost: 0.25,
            ..Default::default()
        });
        session.messages.extend([first, second, Message::user("x")]);
        session.recompute_usage();
        assert_eq!(session.usage.output, 15);
        assert!((session.usage.cost - 0.75).abs() < 1e-9);
    }
}
