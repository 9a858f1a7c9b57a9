// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Request types shared by every provider adapter
//!
//! `RequestOptions` is what the engine hands to an adapter; `FormattedRequest`
//! is what the adapter hands to the transport.

use serde::{Deserialize, Serialize};

use crate::llm::message::WireMessage;
use crate::llm::thinking::ReasoningConfig;

/// Output cap when reasoning is off and the caller gave none
pub const DEFAULT_MAX_TOKENS: u32 = 16_384;

/// Output cap whenever reasoning is requested
pub const REASONING_MAX_TOKENS: u32 = 32_768;

/// Output cap for non-streaming calls
pub const NON_STREAMING_MAX_TOKENS: u32 = 4_096;

/// Everything an adapter needs to build one request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Endpoint override (adapter default when None)
    pub endpoint: Option<String>,

    /// API key or relay token
    pub api_key: String,

    /// Provider-side model identifier
    pub model: String,

    /// Conversation history
    pub messages: Vec<WireMessage>,

    /// System prompt
    pub system: Option<String>,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,

    /// How to handle tool choice (provider default when None)
    pub tool_choice: Option<ToolChoice>,

    /// Maximum tokens in response
    pub max_tokens: Option<u32>,

    /// Reasoning request, already mapped to the model's vendor shape
    pub reasoning: Option<ReasoningConfig>,
}

impl RequestOptions {
    /// Create request options with the required fields
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<WireMessage>,
    ) -> Self {
        Self {
            endpoint: None,
            api_key: api_key.into(),
            model: model.into(),
            messages,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            reasoning: None,
        }
    }

    /// Override the endpoint
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set tool choice
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Request reasoning
    pub fn with_reasoning(mut self, reasoning: Option<ReasoningConfig>) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// Non-empty system prompt, if any
    pub(crate) fn system_prompt(&self) -> Option<&str> {
        self.system.as_deref().filter(|s| !s.is_empty())
    }

    /// Streaming output cap: reasoning forces the larger reserve.
    pub(crate) fn streaming_max_tokens(&self) -> u32 {
        if self.reasoning.is_some() {
            REASONING_MAX_TOKENS
        } else {
            self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
        }
    }
}

/// A fully built HTTP request, ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl FormattedRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        properties: serde_json::Value,
        required: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties,
                required,
            },
        }
    }

    /// Schema as a JSON value
    pub(crate) fn schema_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.input_schema).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// How the model should choose to use tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Let the model decide
    Auto,
    /// Must use some tool
    Any,
    /// Use a specific tool
    Tool(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::thinking::ReasoningConfig;
    use serde_json::json;

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new("key", "model", vec![WireMessage::user("hi")])
            .with_system("be brief")
            .with_max_tokens(100)
            .with_tool_choice(ToolChoice::Any);

        assert_eq!(options.system_prompt(), Some("be brief"));
        assert_eq!(options.max_tokens, Some(100));
        assert_eq!(options.tool_choice, Some(ToolChoice::Any));
        assert_eq!(options.streaming_max_tokens(), 100);
    }

    #[test]
    fn test_streaming_max_tokens_defaults() {
        let options = RequestOptions::new("key", "model", vec![]);
        assert_eq!(options.streaming_max_tokens(), DEFAULT_MAX_TOKENS);

        let reasoning = options
            .with_max_tokens(100)
            .with_reasoning(Some(ReasoningConfig::AnthropicBudget {
                budget_tokens: 10_000,
            }));
        assert_eq!(reasoning.streaming_max_tokens(), REASONING_MAX_TOKENS);
    }

    #[test]
    fn test_empty_system_prompt_is_none() {
        let options = RequestOptions::new("key", "model", vec![]).with_system("");
        assert_eq!(options.system_prompt(), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = FormattedRequest {
            url: "https://example.com".into(),
            headers: vec![("X-Api-Key".into(), "k".into())],
            body: json!({}),
        };
        assert_eq!(request.header("x-api-key"), Some("k"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn test_tool_definition_schema_value() {
        let tool = ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({"path": {"type": "string"}}),
            vec!["path".into()],
        );
        assert_eq!(
            tool.schema_value(),
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]})
        );
    }
}
