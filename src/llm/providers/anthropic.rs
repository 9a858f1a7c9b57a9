// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API format
//!
//! Request bodies are typed; the relay reuses them with a few extra fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::event::{BlockKind, NormalizedEvent, StopReason};
use crate::llm::message::{ContentBlock, WireContent, WireMessage};
use crate::llm::provider::{
    FormattedRequest, RequestOptions, ToolChoice, ToolDefinition, NON_STREAMING_MAX_TOKENS,
};
use crate::llm::providers::{json_headers, log_unhandled, Vendor};
use crate::llm::thinking::ReasoningConfig;

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Build a streaming Messages request.
pub fn format_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let (thinking, output_config) = reasoning_fields(options.reasoning.as_ref());
    let body = AnthropicRequest {
        model: &options.model,
        max_tokens: options.streaming_max_tokens(),
        stream: Some(true),
        messages: strip_foreign_fields(&options.messages),
        system: options.system_prompt().map(SystemPrompt::cached),
        cache_control: Some(CacheControl::ephemeral()),
        tools: options.tools.iter().collect(),
        tool_choice: options.tool_choice.as_ref().map(AnthropicToolChoice::from),
        thinking,
        output_config,
    };

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(&options.api_key),
        body: serde_json::to_value(&body)?,
    })
}

/// Build a non-streaming Messages request.
pub fn format_non_streaming_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let body = AnthropicRequest {
        model: &options.model,
        max_tokens: options.max_tokens.unwrap_or(NON_STREAMING_MAX_TOKENS),
        stream: None,
        messages: strip_foreign_fields(&options.messages),
        system: options.system_prompt().map(SystemPrompt::cached),
        cache_control: None,
        tools: options.tools.iter().collect(),
        tool_choice: options.tool_choice.as_ref().map(AnthropicToolChoice::from),
        thinking: None,
        output_config: None,
    };

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(&options.api_key),
        body: serde_json::to_value(&body)?,
    })
}

fn endpoint(options: &RequestOptions) -> String {
    options
        .endpoint
        .clone()
        .unwrap_or_else(|| API_URL.to_string())
}

fn headers(api_key: &str) -> Vec<(String, String)> {
    json_headers([
        ("x-api-key", api_key.to_string()),
        ("anthropic-version", ANTHROPIC_VERSION.to_string()),
    ])
}

/// Drop fields Anthropic rejects: Gemini thought signatures and tool names
/// carried on results for Gemini's benefit.
fn strip_foreign_fields(messages: &[WireMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|message| match &message.content {
            WireContent::Text(_) => message.clone(),
            WireContent::Blocks(blocks) => WireMessage::blocks(
                message.role,
                blocks
                    .iter()
                    .cloned()
                    .map(|block| match block {
                        ContentBlock::ToolUse {
                            id, name, input, ..
                        } => ContentBlock::ToolUse {
                            id,
                            name,
                            input,
                            thought_signature: None,
                        },
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                            ..
                        } => ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                            tool_name: None,
                        },
                        other => other,
                    })
                    .collect(),
            ),
        })
        .collect()
}

/// Map a reasoning request onto `thinking` / `output_config`.
pub(super) fn reasoning_fields(
    reasoning: Option<&ReasoningConfig>,
) -> (Option<AnthropicThinking>, Option<OutputConfig>) {
    match reasoning {
        Some(ReasoningConfig::AnthropicAdaptive { effort }) => (
            Some(AnthropicThinking::Adaptive),
            Some(OutputConfig {
                effort: effort.as_str(),
            }),
        ),
        Some(ReasoningConfig::AnthropicBudget { budget_tokens }) => (
            Some(AnthropicThinking::Enabled {
                budget_tokens: *budget_tokens,
            }),
            None,
        ),
        _ => (None, None),
    }
}

/// Interpret one Anthropic-shaped stream record.
pub fn interpret_event(value: &Value) -> Vec<NormalizedEvent> {
    let event: AnthropicStreamEvent = match serde_json::from_value(value.clone()) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                target: "shoulders.provider",
                error = %e,
                "malformed Anthropic stream event"
            );
            return Vec::new();
        }
    };

    let interpreted = match event {
        AnthropicStreamEvent::MessageStart { message } => NormalizedEvent::MessageStart {
            usage: NormalizedEvent::present(message.as_ref().and_then(|m| m.get("usage"))),
        },
        AnthropicStreamEvent::ContentBlockStart { content_block } => match content_block {
            StreamBlock::Text => NormalizedEvent::block_start(BlockKind::Text),
            StreamBlock::Thinking => NormalizedEvent::block_start(BlockKind::Thinking),
            StreamBlock::ToolUse {
                id,
                name,
                thought_signature,
            } => NormalizedEvent::BlockStart {
                kind: BlockKind::ToolUse,
                tool_name: Some(name),
                tool_id: Some(id),
                reasoning_signature: thought_signature,
            },
            StreamBlock::Unknown => {
                log_unhandled(Vendor::Anthropic, "content_block_start", value);
                return Vec::new();
            }
        },
        AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
            StreamDelta::TextDelta { text } => NormalizedEvent::TextDelta { text },
            StreamDelta::InputJsonDelta { partial_json } => NormalizedEvent::ToolInputDelta {
                json_fragment: partial_json,
            },
            StreamDelta::ThinkingDelta { thinking } => {
                NormalizedEvent::ThinkingDelta { text: thinking }
            }
            StreamDelta::SignatureDelta { signature } => {
                NormalizedEvent::SignatureDelta { signature }
            }
            StreamDelta::Unknown => {
                log_unhandled(Vendor::Anthropic, "content_block_delta", value);
                return Vec::new();
            }
        },
        AnthropicStreamEvent::ContentBlockStop => NormalizedEvent::BlockStop,
        AnthropicStreamEvent::MessageDelta { delta, usage } => NormalizedEvent::MessageDelta {
            stop_reason: StopReason::from_wire(delta.and_then(|d| d.stop_reason).as_deref()),
            usage: NormalizedEvent::present(usage.as_ref()),
        },
        AnthropicStreamEvent::MessageStop => NormalizedEvent::MessageStop { usage: None },
        AnthropicStreamEvent::Ping => return Vec::new(),
        AnthropicStreamEvent::Error { error } => {
            let error = error.unwrap_or(serde_json::Value::Null);
            tracing::warn!(
                target: "shoulders.provider",
                error = %error,
                "provider reported a stream error"
            );
            NormalizedEvent::MessageDelta {
                stop_reason: Some(StopReason::Error),
                usage: None,
            }
        }
        AnthropicStreamEvent::Unknown => {
            let kind = value["type"].as_str().unwrap_or("<untyped>");
            log_unhandled(Vendor::Anthropic, kind, value);
            return Vec::new();
        }
    };

    vec![interpreted]
}

// Anthropic API types

#[derive(Debug, Serialize)]
pub(super) struct AnthropicRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<&'a ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<AnthropicThinking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_config: Option<OutputConfig>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum SystemPrompt<'a> {
    Plain(&'a str),
    Blocks(Vec<SystemBlock<'a>>),
}

impl<'a> SystemPrompt<'a> {
    /// One text block marked for prompt caching
    pub fn cached(text: &'a str) -> Self {
        SystemPrompt::Blocks(vec![SystemBlock {
            block_type: "text",
            text,
            cache_control: CacheControl::ephemeral(),
        }])
    }
}

#[derive(Debug, Serialize)]
pub(super) struct SystemBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: &'a str,
    cache_control: CacheControl,
}

#[derive(Debug, Serialize)]
pub(super) struct CacheControl {
    #[serde(rename = "type")]
    cache_type: &'static str,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            cache_type: "ephemeral",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

impl From<&ToolChoice> for AnthropicToolChoice {
    fn from(choice: &ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => AnthropicToolChoice::Auto,
            ToolChoice::Any => AnthropicToolChoice::Any,
            ToolChoice::Tool(name) => AnthropicToolChoice::Tool { name: name.clone() },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicThinking {
    Adaptive,
    Enabled { budget_tokens: u32 },
}

#[derive(Debug, Serialize)]
pub(super) struct OutputConfig {
    effort: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        #[serde(default)]
        message: Option<Value>,
    },
    ContentBlockStart {
        content_block: StreamBlock,
    },
    ContentBlockDelta {
        delta: StreamDelta,
    },
    ContentBlockStop,
    MessageDelta {
        #[serde(default)]
        delta: Option<MessageDeltaBody>,
        #[serde(default)]
        usage: Option<Value>,
    },
    MessageStop,
    Ping,
    Error {
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamBlock {
    Text,
    Thinking,
    ToolUse {
        id: String,
        name: String,
        /// Present when the relay carries a Gemini call in Anthropic shape
        #[serde(rename = "_googleThoughtSignature", default)]
        thought_signature: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}
