// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider-neutral request history
//!
//! The engine renders a session into these messages once per turn; each
//! provider adapter then reshapes them into its own wire format. The shape
//! follows the Anthropic Messages API, which is also what the relay accepts.

use serde::{Deserialize, Serialize};

/// A message in the outbound history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Role of the message sender
    pub role: Role,

    /// Content of the message
    pub content: WireContent,
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    /// Simple text content
    Text(String),
    /// Multiple content blocks (text, thinking, tool use, tool result)
    Blocks(Vec<ContentBlock>),
}

/// A block of content within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Model reasoning, echoed back with its signature on later turns
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Tool use request from assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        /// Gemini thought signature attached to a function call
        #[serde(
            rename = "_googleThoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },

    /// Tool result from user
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        /// Name of the tool that produced the result (Gemini needs it)
        #[serde(rename = "_toolName", default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
}

impl WireMessage {
    /// Create a user text message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: WireContent::Text(content.into()),
        }
    }

    /// Create an assistant text message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: WireContent::Text(content.into()),
        }
    }

    /// Create a message from blocks
    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: WireContent::Blocks(blocks),
        }
    }

    /// Concatenated text blocks (or the plain text)
    pub fn text(&self) -> String {
        match &self.content {
            WireContent::Text(text) => text.clone(),
            WireContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Blocks view; plain text becomes a single text block.
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            WireContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            WireContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Whether any block is a tool use
    pub fn has_tool_use(&self) -> bool {
        matches!(&self.content, WireContent::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}
