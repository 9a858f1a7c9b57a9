// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Normalized stream events
//!
//! Every provider's stream is interpreted into this one union. Usage carried by
//! an event is the vendor's raw counter object; it is normalized by whoever
//! knows which vendor produced it.

use serde_json::Value;

/// Kind of block opened by `BlockStart`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Why the model stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Model wants tool results before continuing
    ToolUse,
    /// Natural end of turn (also max_tokens and friends)
    EndTurn,
    /// Provider reported a failed response
    Error,
}

impl StopReason {
    /// Map an Anthropic-style stop_reason string.
    pub fn from_wire(reason: Option<&str>) -> Option<Self> {
        match reason? {
            "tool_use" => Some(StopReason::ToolUse),
            "error" => Some(StopReason::Error),
            _ => Some(StopReason::EndTurn),
        }
    }
}

/// One logical stream event
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    BlockStart {
        kind: BlockKind,
        tool_name: Option<String>,
        tool_id: Option<String>,
        reasoning_signature: Option<String>,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    SignatureDelta {
        signature: String,
    },
    ToolInputDelta {
        json_fragment: String,
    },
    BlockStop,
    /// `stop_reason` is None when a vendor sends a delta without one
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Option<Value>,
    },
    MessageStop {
        usage: Option<Value>,
    },
    MessageStart {
        usage: Option<Value>,
    },
    UsageOnly {
        usage: Value,
    },
    BalanceUpdate {
        credits: f64,
    },
    DirectToolCall {
        tool_name: String,
        tool_input: Value,
        reasoning_signature: Option<String>,
    },
}

impl NormalizedEvent {
    /// Raw usage carried by this event, if any
    pub fn usage(&self) -> Option<&Value> {
        match self {
            NormalizedEvent::MessageDelta { usage, .. }
            | NormalizedEvent::MessageStop { usage }
            | NormalizedEvent::MessageStart { usage } => usage.as_ref(),
            NormalizedEvent::UsageOnly { usage } => Some(usage),
            _ => None,
        }
    }

    pub(crate) fn block_start(kind: BlockKind) -> Self {
        NormalizedEvent::BlockStart {
            kind,
            tool_name: None,
            tool_id: None,
            reasoning_signature: None,
        }
    }

    /// Treat JSON null the same as an absent field.
    pub(crate) fn present(value: Option<&Value>) -> Option<Value> {
        value.filter(|v| !v.is_null()).cloned()
    }
}
