// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI Responses API format
//!
//! Tool calls and tool results are top-level `input` items rather than parts
//! of a message. Reasoning is managed server-side, so thinking blocks from
//! earlier turns are not sent back.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::llm::event::{BlockKind, NormalizedEvent, StopReason};
use crate::llm::message::{ContentBlock, Role, WireContent, WireMessage};
use crate::llm::provider::{
    FormattedRequest, RequestOptions, ToolChoice, ToolDefinition, NON_STREAMING_MAX_TOKENS,
    REASONING_MAX_TOKENS,
};
use crate::llm::providers::{json_headers, log_unhandled, Vendor};
use crate::llm::thinking::ReasoningConfig;

pub const API_URL: &str = "https://api.openai.com/v1/responses";

/// Event kinds that carry nothing the engine needs
const IGNORED_EVENTS: &[&str] = &[
    "response.in_progress",
    "response.output_item.done",
    "response.content_part.added",
    "response.content_part.done",
    "response.output_text.done",
    "response.reasoning_summary_part.added",
    "response.reasoning_summary_part.done",
    "response.reasoning_summary_text.done",
];

/// Build a streaming Responses request.
pub fn format_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let mut body = Map::new();
    body.insert("model".into(), json!(options.model));
    body.insert("input".into(), Value::Array(convert_input(&options.messages)));
    body.insert("stream".into(), json!(true));
    if let Some(system) = options.system_prompt() {
        body.insert("instructions".into(), json!(system));
    }
    if options.reasoning.is_some() {
        body.insert("max_output_tokens".into(), json!(REASONING_MAX_TOKENS));
    } else if let Some(max_tokens) = options.max_tokens {
        body.insert("max_output_tokens".into(), json!(max_tokens));
    }
    insert_tools(&mut body, &options.tools, options.tool_choice.as_ref());
    if let Some(ReasoningConfig::OpenAiEffort { effort }) = options.reasoning {
        body.insert(
            "reasoning".into(),
            json!({"effort": effort.as_str(), "summary": "auto"}),
        );
    }

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(&options.api_key),
        body: Value::Object(body),
    })
}

/// Build a non-streaming Responses request with minimal reasoning.
pub fn format_non_streaming_request(options: &RequestOptions) -> Result<FormattedRequest> {
    let mut body = Map::new();
    body.insert("model".into(), json!(options.model));
    body.insert(
        "max_output_tokens".into(),
        json!(options.max_tokens.unwrap_or(NON_STREAMING_MAX_TOKENS)),
    );
    body.insert("input".into(), Value::Array(convert_input(&options.messages)));
    // Reasoning tokens count against max_output_tokens.
    body.insert("reasoning".into(), json!({"effort": "low"}));
    if let Some(system) = options.system_prompt() {
        body.insert("instructions".into(), json!(system));
    }
    insert_tools(&mut body, &options.tools, options.tool_choice.as_ref());

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(&options.api_key),
        body: Value::Object(body),
    })
}

fn endpoint(options: &RequestOptions) -> String {
    options
        .endpoint
        .clone()
        .unwrap_or_else(|| API_URL.to_string())
}

fn headers(api_key: &str) -> Vec<(String, String)> {
    json_headers([("Authorization", format!("Bearer {}", api_key))])
}

fn insert_tools(body: &mut Map<String, Value>, tools: &[ToolDefinition], choice: Option<&ToolChoice>) {
    if !tools.is_empty() {
        let converted = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.schema_value(),
                    // Schemas lack additionalProperties:false, which strict mode requires.
                    "strict": false,
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(converted));
    }
    if let Some(choice) = choice {
        let mapped = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::Tool(name) => json!({"type": "function", "name": name}),
        };
        body.insert("tool_choice".into(), mapped);
    }
}

/// Flatten history into Responses `input` items.
fn convert_input(messages: &[WireMessage]) -> Vec<Value> {
    let mut input = Vec::new();
    for message in messages {
        match (&message.role, &message.content) {
            (role, WireContent::Text(text)) => {
                input.push(json!({"role": role.to_string(), "content": text}));
            }
            (Role::User, WireContent::Blocks(blocks)) => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => input.push(json!({
                            "type": "function_call_output",
                            "call_id": tool_use_id,
                            "output": content,
                        })),
                        ContentBlock::Text { text } => {
                            input.push(json!({"role": "user", "content": text}));
                        }
                        _ => {}
                    }
                }
            }
            (Role::Assistant, WireContent::Blocks(blocks)) => {
                let text = message.text();
                if !text.is_empty() {
                    input.push(json!({"role": "assistant", "content": text}));
                }
                for block in blocks {
                    if let ContentBlock::ToolUse {
                        id, name, input: args, ..
                    } = block
                    {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": id,
                            "name": name,
                            "arguments": args.to_string(),
                        }));
                    }
                }
            }
        }
    }
    input
}

/// Interpret one Responses stream event.
pub fn interpret_event(value: &Value) -> Vec<NormalizedEvent> {
    let Some(kind) = value["type"].as_str() else {
        return Vec::new();
    };

    let interpreted = match kind {
        "response.created" => NormalizedEvent::MessageStart {
            usage: NormalizedEvent::present(value["response"].get("usage")),
        },
        "response.output_item.added" => {
            let item = &value["item"];
            if item["type"] != "function_call" {
                return Vec::new();
            }
            NormalizedEvent::BlockStart {
                kind: BlockKind::ToolUse,
                tool_name: item["name"].as_str().map(str::to_string),
                tool_id: item["call_id"]
                    .as_str()
                    .or_else(|| item["id"].as_str())
                    .map(str::to_string),
                reasoning_signature: None,
            }
        }
        "response.output_text.delta" => NormalizedEvent::TextDelta {
            text: delta_text(value),
        },
        "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
            NormalizedEvent::ThinkingDelta {
                text: delta_text(value),
            }
        }
        "response.function_call_arguments.delta" => NormalizedEvent::ToolInputDelta {
            json_fragment: delta_text(value),
        },
        "response.function_call_arguments.done" => NormalizedEvent::BlockStop,
        "response.completed" => {
            let response = &value["response"];
            let has_tool_calls = response["output"]
                .as_array()
                .is_some_and(|items| items.iter().any(|item| item["type"] == "function_call"));
            NormalizedEvent::MessageDelta {
                stop_reason: Some(if has_tool_calls {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                }),
                usage: NormalizedEvent::present(response.get("usage")),
            }
        }
        "response.failed" => {
            tracing::warn!(
                target: "shoulders.provider",
                error = %value["response"]["error"],
                "OpenAI response failed"
            );
            NormalizedEvent::MessageDelta {
                stop_reason: Some(StopReason::Error),
                usage: None,
            }
        }
        "response.incomplete" => {
            tracing::warn!(
                target: "shoulders.provider",
                reason = %value["response"]["incomplete_details"],
                "OpenAI response incomplete"
            );
            NormalizedEvent::MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                usage: NormalizedEvent::present(value["response"].get("usage")),
            }
        }
        ignored if IGNORED_EVENTS.contains(&ignored) => return Vec::new(),
        other => {
            log_unhandled(Vendor::OpenAi, other, value);
            return Vec::new();
        }
    };

    vec![interpreted]
}

fn delta_text(value: &Value) -> String {
    value["delta"].as_str().unwrap_or_default().to_string()
}
