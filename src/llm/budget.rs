// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Token estimation and context-window truncation
//!
//! The estimate is a byte heuristic (about four bytes per token). It only has
//! to be stable and monotonic, not accurate.

use std::collections::HashSet;

use crate::llm::message::{ContentBlock, Role, WireContent, WireMessage};
use crate::llm::provider::{DEFAULT_MAX_TOKENS, REASONING_MAX_TOKENS};

/// Stands in for a turn whose tool results were all truncated away
const ORPHANED_RESULTS_NOTE: &str = "[earlier tool results omitted]";

/// Context window assumed for models that do not declare one
pub const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

/// Estimated tokens for a piece of text.
pub fn estimate(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimated tokens for a system prompt plus history.
///
/// Counts text, tool results and tool inputs. Reasoning text is not counted.
pub fn estimate_conversation(system: Option<&str>, messages: &[WireMessage]) -> u64 {
    system.map(estimate).unwrap_or(0) + messages.iter().map(estimate_message).sum::<u64>()
}

fn estimate_message(message: &WireMessage) -> u64 {
    match &message.content {
        WireContent::Text(text) => estimate(text),
        WireContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => estimate(text),
                ContentBlock::ToolResult { content, .. } => estimate(content),
                ContentBlock::ToolUse { input, .. } => estimate(&input.to_string()),
                ContentBlock::Thinking { .. } => 0,
            })
            .sum(),
    }
}

/// Headroom left for the response.
pub fn output_reserve(reasoning: bool) -> u64 {
    if reasoning {
        u64::from(REASONING_MAX_TOKENS)
    } else {
        u64::from(DEFAULT_MAX_TOKENS)
    }
}

/// Tokens the prompt may use for a model.
pub fn prompt_budget(context_window: u32, reasoning: bool) -> u64 {
    u64::from(context_window).saturating_sub(output_reserve(reasoning))
}

/// Outcome of fitting a history into a budget
#[derive(Debug, Clone, PartialEq)]
pub struct Fitted {
    pub messages: Vec<WireMessage>,
    /// Messages removed from position 1
    pub dropped: usize,
    /// Estimate after truncation, system prompt included
    pub estimate: u64,
}

/// Sliding-window truncation.
///
/// Drops the second message until the estimate fits or two messages remain.
/// The first message and the last message are never removed. A user turn
/// left at position 1 whose tool results answer calls that were dropped goes
/// with them, so no tool result is ever sent without its call.
pub fn fit_to_budget(system: Option<&str>, mut messages: Vec<WireMessage>, budget: u64) -> Fitted {
    let original = estimate_conversation(system, &messages);
    let mut estimate = original;
    let mut dropped = 0;

    while estimate > budget && messages.len() > 2 {
        messages.remove(1);
        dropped += 1;
        while messages.len() > 2 && answers_missing_call(&messages[1], &messages) {
            messages.remove(1);
            dropped += 1;
        }
        estimate = estimate_conversation(system, &messages);
    }

    if dropped > 0 {
        strip_orphaned_results(&mut messages);
        estimate = estimate_conversation(system, &messages);
    }

    if dropped > 0 {
        tracing::info!(
            target: "shoulders.budget",
            dropped,
            before = original,
            after = estimate,
            budget,
            "truncated conversation to fit context window"
        );
    }

    Fitted {
        messages,
        dropped,
        estimate,
    }
}

fn tool_use_ids(messages: &[WireMessage]) -> HashSet<String> {
    messages
        .iter()
        .flat_map(|message| message.content_blocks())
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, .. } => Some(id),
            _ => None,
        })
        .collect()
}

fn answers_missing_call(message: &WireMessage, messages: &[WireMessage]) -> bool {
    if message.role != Role::User {
        return false;
    }
    let WireContent::Blocks(blocks) = &message.content else {
        return false;
    };
    let known = tool_use_ids(messages);
    blocks.iter().any(|block| {
        matches!(block, ContentBlock::ToolResult { tool_use_id, .. } if !known.contains(tool_use_id))
    })
}

/// Removes tool results whose call is gone from the two-message floor.
fn strip_orphaned_results(messages: &mut [WireMessage]) {
    let known = tool_use_ids(messages);
    for message in messages.iter_mut() {
        let WireContent::Blocks(blocks) = &mut message.content else {
            continue;
        };
        blocks.retain(|block| {
            !matches!(block, ContentBlock::ToolResult { tool_use_id, .. } if !known.contains(tool_use_id))
        });
        if blocks.is_empty() {
            message.content = WireContent::Text(ORPHANED_RESULTS_NOTE.to_string());
        }
    }
}
