// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shoulders relay format
//!
//! The relay accepts Anthropic-shaped bodies for every vendor and forwards
//! them to the vendor named in `X-Shoulders-Provider`. Its stream comes back
//! in Anthropic event shape, with a balance trailer at the end.

use serde_json::{json, Value};

use crate::error::Result;
use crate::llm::provider::{FormattedRequest, RequestOptions, NON_STREAMING_MAX_TOKENS};
use crate::llm::providers::anthropic::{
    reasoning_fields, AnthropicRequest, AnthropicToolChoice, CacheControl, SystemPrompt,
};
use crate::llm::providers::{json_headers, Vendor};
use crate::llm::thinking::ReasoningConfig;

pub const API_URL: &str = "https://shoulde.rs/api/v1/proxy";

/// Build a streaming relay request for a model of vendor `hint`.
pub fn format_request(hint: Vendor, options: &RequestOptions) -> Result<FormattedRequest> {
    let anthropic_hint = hint == Vendor::Anthropic;
    let (thinking, output_config) = if anthropic_hint {
        reasoning_fields(options.reasoning.as_ref())
    } else {
        (None, None)
    };

    let request = AnthropicRequest {
        model: &options.model,
        max_tokens: options.streaming_max_tokens(),
        stream: Some(true),
        // Signatures and tool names stay; the relay routes them onward.
        messages: options.messages.clone(),
        system: options.system_prompt().map(|system| {
            if anthropic_hint {
                SystemPrompt::cached(system)
            } else {
                SystemPrompt::Plain(system)
            }
        }),
        cache_control: anthropic_hint.then(CacheControl::ephemeral),
        tools: options.tools.iter().collect(),
        tool_choice: options.tool_choice.as_ref().map(AnthropicToolChoice::from),
        thinking,
        output_config,
    };

    let mut body = serde_json::to_value(&request)?;
    if let Value::Object(map) = &mut body {
        match options.reasoning {
            Some(ReasoningConfig::OpenAiEffort { effort }) => {
                map.insert("reasoning_effort".into(), json!(effort.as_str()));
                map.insert(
                    "reasoning".into(),
                    json!({"effort": effort.as_str(), "summary": "auto"}),
                );
            }
            Some(ReasoningConfig::GoogleLevel { level }) => {
                map.insert(
                    "thinking_config".into(),
                    json!({"thinkingLevel": level.as_str(), "includeThoughts": true}),
                );
            }
            Some(ReasoningConfig::GoogleBudget { budget }) => {
                map.insert(
                    "thinking_config".into(),
                    json!({"thinkingBudget": budget, "includeThoughts": true}),
                );
            }
            _ => {}
        }
    }

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(hint, &options.api_key),
        body,
    })
}

/// Build a non-streaming relay request.
pub fn format_non_streaming_request(
    hint: Vendor,
    options: &RequestOptions,
) -> Result<FormattedRequest> {
    let request = AnthropicRequest {
        model: &options.model,
        max_tokens: options.max_tokens.unwrap_or(NON_STREAMING_MAX_TOKENS),
        stream: None,
        messages: options.messages.clone(),
        system: options.system_prompt().map(SystemPrompt::cached),
        cache_control: None,
        tools: options.tools.iter().collect(),
        tool_choice: options.tool_choice.as_ref().map(AnthropicToolChoice::from),
        thinking: None,
        output_config: None,
    };

    Ok(FormattedRequest {
        url: endpoint(options),
        headers: headers(hint, &options.api_key),
        body: serde_json::to_value(&request)?,
    })
}

fn endpoint(options: &RequestOptions) -> String {
    options
        .endpoint
        .clone()
        .unwrap_or_else(|| API_URL.to_string())
}

fn headers(hint: Vendor, token: &str) -> Vec<(String, String)> {
    json_headers([
        ("Authorization", format!("Bearer {}", token)),
        ("X-Shoulders-Provider", hint.as_str().to_string()),
    ])
}
