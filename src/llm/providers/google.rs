// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini `generateContent` format
//!
//! Gemini streams complete parts rather than deltas, and one record can carry
//! several of them, so interpretation may yield several events per record.
//! Function calls arrive whole and carry a thought signature that must be
//! echoed back on the next turn.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::llm::event::{NormalizedEvent, StopReason};
use crate::llm::message::{ContentBlock, Role, WireContent, WireMessage};
use crate::llm::provider::{
    FormattedRequest, RequestOptions, ToolChoice, ToolDefinition, DEFAULT_MAX_TOKENS,
    NON_STREAMING_MAX_TOKENS,
};
use crate::llm::providers::json_headers;
use crate::llm::thinking::ReasoningConfig;

pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Name used for a function response when the tool name is unknown
const FALLBACK_TOOL_NAME: &str = "tool";

/// Build a streaming `streamGenerateContent` request.
pub fn format_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let mut generation_config = Map::new();
    generation_config.insert(
        "maxOutputTokens".into(),
        json!(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    match options.reasoning {
        Some(ReasoningConfig::GoogleLevel { level }) => {
            generation_config.insert(
                "thinkingConfig".into(),
                json!({"thinkingLevel": level.as_str(), "includeThoughts": true}),
            );
        }
        Some(ReasoningConfig::GoogleBudget { budget }) => {
            generation_config.insert(
                "thinkingConfig".into(),
                json!({"thinkingBudget": budget, "includeThoughts": true}),
            );
        }
        _ => {}
    }

    let body = base_body(options, generation_config);
    Ok(FormattedRequest {
        url: format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            base_url(options),
            options.model,
            options.api_key
        ),
        headers: json_headers([]),
        body: Value::Object(body),
    })
}

/// Build a non-streaming `generateContent` request.
pub fn format_non_streaming_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let mut generation_config = Map::new();
    generation_config.insert(
        "maxOutputTokens".into(),
        json!(options.max_tokens.unwrap_or(NON_STREAMING_MAX_TOKENS)),
    );

    let body = base_body(options, generation_config);
    Ok(FormattedRequest {
        url: format!(
            "{}/{}:generateContent?key={}",
            base_url(options),
            options.model,
            options.api_key
        ),
        headers: json_headers([]),
        body: Value::Object(body),
    })
}

fn base_url(options: &RequestOptions) -> &str {
    options
        .endpoint
        .as_deref()
        .unwrap_or(API_BASE_URL)
        .trim_end_matches('/')
}

fn base_body(options: &RequestOptions, generation_config: Map<String, Value>) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(
        "contents".into(),
        Value::Array(convert_contents(&options.messages)),
    );
    body.insert("generationConfig".into(), Value::Object(generation_config));
    if let Some(system) = options.system_prompt() {
        body.insert(
            "systemInstruction".into(),
            json!({"parts": [{"text": system}]}),
        );
    }
    if !options.tools.is_empty() {
        body.insert("tools".into(), function_declarations(&options.tools));
    }
    // Only a named tool maps onto Gemini's function calling modes.
    if let Some(ToolChoice::Tool(name)) = &options.tool_choice {
        body.insert(
            "toolConfig".into(),
            json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}}),
        );
    }
    body
}

fn function_declarations(tools: &[ToolDefinition]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.schema_value(),
            })
        })
        .collect();
    json!([{"functionDeclarations": declarations}])
}

/// Convert history into Gemini `contents` with user/model roles.
fn convert_contents(messages: &[WireMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let parts: Vec<Value> = match &message.content {
                WireContent::Text(text) => vec![json!({"text": text})],
                WireContent::Blocks(blocks) => blocks.iter().map(convert_block).collect(),
            };
            json!({"role": role, "parts": parts})
        })
        .collect()
}

fn convert_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"text": text}),
        ContentBlock::Thinking {
            thinking,
            signature,
        } => {
            let mut part = json!({"text": thinking, "thought": true});
            if let Some(signature) = signature {
                part["thoughtSignature"] = json!(signature);
            }
            part
        }
        ContentBlock::ToolUse {
            name,
            input,
            thought_signature,
            ..
        } => {
            let mut part = json!({"functionCall": {"name": name, "args": input}});
            if let Some(signature) = thought_signature {
                part["thoughtSignature"] = json!(signature);
            }
            part
        }
        ContentBlock::ToolResult {
            content, tool_name, ..
        } => json!({
            "functionResponse": {
                "name": tool_name.as_deref().unwrap_or(FALLBACK_TOOL_NAME),
                "response": {"content": content},
            }
        }),
    }
}

/// Interpret one Gemini stream record into zero or more events.
pub fn interpret_event(value: &Value) -> Vec<NormalizedEvent> {
    let usage = NormalizedEvent::present(value.get("usageMetadata"));

    let Some(candidate) = value["candidates"].as_array().and_then(|c| c.first()) else {
        // Usage-only trailer records have no candidates.
        return usage
            .map(|usage| vec![NormalizedEvent::UsageOnly { usage }])
            .unwrap_or_default();
    };
    let finished = candidate["finishReason"] == "STOP";

    let mut events = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if part["thought"].as_bool().unwrap_or(false) {
                    events.push(NormalizedEvent::ThinkingDelta {
                        text: text.to_string(),
                    });
                    if let Some(signature) = part["thoughtSignature"].as_str() {
                        events.push(NormalizedEvent::SignatureDelta {
                            signature: signature.to_string(),
                        });
                    }
                } else {
                    events.push(NormalizedEvent::TextDelta {
                        text: text.to_string(),
                    });
                }
            }
            if let Some(call) = part.get("functionCall") {
                events.push(NormalizedEvent::DirectToolCall {
                    tool_name: call["name"].as_str().unwrap_or_default().to_string(),
                    tool_input: match &call["args"] {
                        Value::Object(args) => Value::Object(args.clone()),
                        _ => json!({}),
                    },
                    reasoning_signature: part["thoughtSignature"].as_str().map(str::to_string),
                });
            }
        }
    }

    if events.is_empty() {
        if finished {
            return vec![NormalizedEvent::MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                usage,
            }];
        }
        return usage
            .map(|usage| vec![NormalizedEvent::UsageOnly { usage }])
            .unwrap_or_default();
    }

    if let Some(usage) = usage {
        events.push(NormalizedEvent::UsageOnly { usage });
    }
    events
}
