// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming turn accumulation
//!
//! Applies normalized events to the open assistant message. The accumulator
//! tracks which block is open and the usage reported so far; the engine
//! decides what a stop signal means for the session.

use crate::chat::session::{Message, ThinkingBlock, ToolCall};
use crate::llm::event::{BlockKind, NormalizedEvent, StopReason};
use crate::llm::providers::Provider;
use crate::llm::usage::{self, UsageSnapshot};

/// The block currently receiving deltas
#[derive(Debug)]
enum OpenBlock {
    Text,
    Thinking(ThinkingBlock),
    /// Index into the message's tool calls
    ToolUse(usize),
}

/// What an applied event means for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSignal {
    None,
    Text(String),
    Thinking(String),
    /// `MessageDelta`; None when the vendor sent no stop reason
    Stop(Option<StopReason>),
    MessageStop,
    Balance(f64),
}

/// Accumulator for one assistant turn
#[derive(Debug)]
pub struct TurnAccumulator {
    provider: Provider,
    open: Option<OpenBlock>,
    /// Reasoning streamed without a BlockStart
    implicit_thinking: Option<ThinkingBlock>,
    usage: Option<UsageSnapshot>,
}

impl TurnAccumulator {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            open: None,
            implicit_thinking: None,
            usage: None,
        }
    }

    /// Usage reported so far, merged across snapshots
    pub fn usage(&self) -> Option<UsageSnapshot> {
        self.usage
    }

    /// Merge one raw usage report. Returns the merged snapshot.
    pub fn merge_usage(&mut self, raw: &serde_json::Value) -> Option<UsageSnapshot> {
        let snapshot = usage::normalize(self.provider.vendor(), raw);
        if snapshot.is_empty() {
            return self.usage;
        }
        let merged = match self.usage {
            Some(current) => current.merge(&snapshot),
            None => snapshot,
        };
        self.usage = Some(merged);
        self.usage
    }

    /// Apply one event to the open message.
    pub fn apply(&mut self, message: &mut Message, event: NormalizedEvent) -> TurnSignal {
        if let Some(raw) = event.usage() {
            self.merge_usage(raw);
        }

        match event {
            NormalizedEvent::BlockStart {
                kind,
                tool_name,
                tool_id,
                reasoning_signature,
            } => {
                self.close_block(message);
                self.open = Some(match kind {
                    BlockKind::Text => OpenBlock::Text,
                    BlockKind::Thinking => OpenBlock::Thinking(ThinkingBlock {
                        text: String::new(),
                        signature: reasoning_signature,
                    }),
                    BlockKind::ToolUse => {
                        let mut call = ToolCall::new(
                            tool_id.unwrap_or_else(ToolCall::synthesize_id),
                            tool_name.unwrap_or_default(),
                        );
                        call.reasoning_signature = reasoning_signature;
                        message.tool_calls.push(call);
                        OpenBlock::ToolUse(message.tool_calls.len() - 1)
                    }
                });
                TurnSignal::None
            }
            NormalizedEvent::TextDelta { text } => {
                message.content.push_str(&text);
                TurnSignal::Text(text)
            }
            NormalizedEvent::ThinkingDelta { text } => {
                match &mut self.open {
                    Some(OpenBlock::Thinking(block)) => block.text.push_str(&text),
                    _ => self
                        .implicit_thinking
                        .get_or_insert_with(ThinkingBlock::default)
                        .text
                        .push_str(&text),
                }
                TurnSignal::Thinking(text)
            }
            NormalizedEvent::SignatureDelta { signature } => {
                match (&mut self.open, &mut self.implicit_thinking) {
                    (Some(OpenBlock::Thinking(block)), _) | (_, Some(block)) => {
                        block.signature = Some(signature);
                    }
                    _ => match message.thinking.last_mut() {
                        Some(block) => block.signature = Some(signature),
                        None => tracing::debug!(
                            target: "shoulders.engine",
                            "signature without a thinking block, dropped"
                        ),
                    },
                }
                TurnSignal::None
            }
            NormalizedEvent::ToolInputDelta { json_fragment } => {
                match self.open {
                    Some(OpenBlock::ToolUse(index)) => {
                        if let Some(call) = message.tool_calls.get_mut(index) {
                            call.raw_input.push_str(&json_fragment);
                        }
                    }
                    _ => tracing::debug!(
                        target: "shoulders.engine",
                        "tool input without an open tool block, dropped"
                    ),
                }
                TurnSignal::None
            }
            NormalizedEvent::BlockStop => {
                self.close_block(message);
                TurnSignal::None
            }
            NormalizedEvent::DirectToolCall {
                tool_name,
                tool_input,
                reasoning_signature,
            } => {
                let mut call = ToolCall::new(ToolCall::synthesize_id(), tool_name);
                call.input = tool_input;
                call.reasoning_signature = reasoning_signature;
                message.tool_calls.push(call);
                TurnSignal::None
            }
            NormalizedEvent::MessageDelta { stop_reason, .. } => {
                if !self.provider.closes_thinking_at_stop() {
                    self.close_implicit_thinking(message);
                }
                TurnSignal::Stop(stop_reason)
            }
            NormalizedEvent::MessageStop { .. } => {
                self.close_implicit_thinking(message);
                TurnSignal::MessageStop
            }
            NormalizedEvent::MessageStart { .. } | NormalizedEvent::UsageOnly { .. } => {
                TurnSignal::None
            }
            NormalizedEvent::BalanceUpdate { credits } => TurnSignal::Balance(credits),
        }
    }

    /// Close every open block; called once the turn settles.
    pub fn finish(&mut self, message: &mut Message) {
        self.close_block(message);
        self.close_implicit_thinking(message);
    }

    fn close_block(&mut self, message: &mut Message) {
        match self.open.take() {
            Some(OpenBlock::ToolUse(index)) => {
                if let Some(call) = message.tool_calls.get_mut(index) {
                    call.finish_input();
                }
            }
            Some(OpenBlock::Thinking(block)) => message.thinking.push(block),
            Some(OpenBlock::Text) | None => {}
        }
    }

    fn close_implicit_thinking(&mut self, message: &mut Message) {
        if let Some(block) = self.implicit_thinking.take() {
            message.thinking.push(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::session::ToolCallStatus;
    use crate::llm::providers::Vendor;
    use serde_json::json;

    fn apply_all(
        provider: Provider,
        events: Vec<NormalizedEvent>,
    ) -> (TurnAccumulator, Message, Vec<TurnSignal>) {
        let mut accumulator = TurnAccumulator::new(provider);
        let mut message = Message::streaming_assistant();
        let signals = events
            .into_iter()
            .map(|event| accumulator.apply(&mut message, event))
            .collect();
        (accumulator, message, signals)
    }

    #[test]
    fn test_tool_use_block_sequence() {
        let (_, message, signals) = apply_all(
            Provider::Anthropic,
            vec![
                NormalizedEvent::BlockStart {
                    kind: BlockKind::ToolUse,
                    tool_name: Some("read_file".into()),
                    tool_id: Some("toolu_1".into()),
                    reasoning_signature: None,
                },
                NormalizedEvent::ToolInputDelta {
                    json_fragment: "{\"path\":".into(),
                },
                NormalizedEvent::ToolInputDelta {
                    json_fragment: "\"a.md\"}".into(),
                },
                NormalizedEvent::BlockStop,
                NormalizedEvent::MessageDelta {
                    stop_reason: Some(StopReason::ToolUse),
                    usage: None,
                },
            ],
        );

        assert_eq!(message.tool_calls.len(), 1);
        let call = &message.tool_calls[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.input, json!({"path": "a.md"}));
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert_eq!(
            signals.last(),
            Some(&TurnSignal::Stop(Some(StopReason::ToolUse)))
        );
    }

    #[test]
    fn test_invalid_tool_input_becomes_empty_object() {
        let (_, message, _) = apply_all(
            Provider::Anthropic,
            vec![
                NormalizedEvent::block_start(BlockKind::ToolUse),
                NormalizedEvent::ToolInputDelta {
                    json_fragment: "{\"x\":".into(),
                },
                NormalizedEvent::BlockStop,
            ],
        );
        assert_eq!(message.tool_calls[0].input, json!({}));
        assert!(message.tool_calls[0].id.starts_with("tool-"));
    }

    #[test]
    fn test_explicit_thinking_with_signature() {
        let (_, message, _) = apply_all(
            Provider::Anthropic,
            vec![
                NormalizedEvent::block_start(BlockKind::Thinking),
                NormalizedEvent::ThinkingDelta {
                    text: "step one".into(),
                },
                NormalizedEvent::SignatureDelta {
                    signature: "sig".into(),
                },
                NormalizedEvent::BlockStop,
                NormalizedEvent::block_start(BlockKind::Text),
                NormalizedEvent::TextDelta {
                    text: "Done.".into(),
                },
                NormalizedEvent::BlockStop,
            ],
        );
        assert_eq!(
            message.thinking,
            vec![ThinkingBlock {
                text: "step one".into(),
                signature: Some("sig".into()),
            }]
        );
        assert_eq!(message.content, "Done.");
    }

    #[test]
    fn test_implicit_thinking_closes_on_message_delta() {
        let (_, message, _) = apply_all(
            Provider::OpenAi,
            vec![
                NormalizedEvent::ThinkingDelta {
                    text: "weighing".into(),
                },
                NormalizedEvent::TextDelta {
                    text: "Answer".into(),
                },
                NormalizedEvent::MessageDelta {
                    stop_reason: Some(StopReason::EndTurn),
                    usage: None,
                },
            ],
        );
        assert_eq!(message.thinking.len(), 1);
        assert_eq!(message.thinking[0].text, "weighing");
    }

    #[test]
    fn test_google_thinking_stays_open_until_message_stop() {
        let mut accumulator = TurnAccumulator::new(Provider::Google);
        let mut message = Message::streaming_assistant();
        accumulator.apply(
            &mut message,
            NormalizedEvent::ThinkingDelta { text: "a".into() },
        );
        accumulator.apply(
            &mut message,
            NormalizedEvent::MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                usage: None,
            },
        );
        assert!(message.thinking.is_empty());
        accumulator.apply(&mut message, NormalizedEvent::MessageStop { usage: None });
        assert_eq!(message.thinking.len(), 1);
    }

    #[test]
    fn test_direct_tool_call_keeps_signature() {
        let (_, message, _) = apply_all(
            Provider::Google,
            vec![NormalizedEvent::DirectToolCall {
                tool_name: "search".into(),
                tool_input: json!({"q": "rust"}),
                reasoning_signature: Some("sig".into()),
            }],
        );
        let call = &message.tool_calls[0];
        assert!(call.id.starts_with("tool-"));
        assert_eq!(call.input, json!({"q": "rust"}));
        assert_eq!(call.reasoning_signature.as_deref(), Some("sig"));
        assert!(message.has_pending_tools());
    }

    #[test]
    fn test_usage_merges_across_snapshots() {
        let (accumulator, _, _) = apply_all(
            Provider::Anthropic,
            vec![
                NormalizedEvent::MessageStart {
                    usage: Some(json!({"input_tokens": 100, "output_tokens": 1})),
                },
                NormalizedEvent::MessageDelta {
                    stop_reason: Some(StopReason::EndTurn),
                    usage: Some(json!({"output_tokens": 40})),
                },
            ],
        );
        let usage = accumulator.usage().unwrap();
        assert_eq!(usage.input_total, 100);
        assert_eq!(usage.output, 40);
    }

    #[test]
    fn test_relay_usage_uses_anthropic_shape() {
        let relay = Provider::new(Vendor::Shoulders, Some(Vendor::Google));
        let mut accumulator = TurnAccumulator::new(relay);
        let usage = accumulator
            .merge_usage(&json!({"input_tokens": 7, "output_tokens": 3}))
            .unwrap();
        assert_eq!(usage.total, 10);
    }

    #[test]
    fn test_finish_closes_open_tool_block() {
        let mut accumulator = TurnAccumulator::new(Provider::Anthropic);
        let mut message = Message::streaming_assistant();
        accumulator.apply(&mut message, NormalizedEvent::block_start(BlockKind::ToolUse));
        accumulator.apply(
            &mut message,
            NormalizedEvent::ToolInputDelta {
                json_fragment: "{\"n\":2}".into(),
            },
        );
        accumulator.finish(&mut message);
        assert_eq!(message.tool_calls[0].input, json!({"n": 2}));
    }

    #[test]
    fn test_balance_signal() {
        let (_, _, signals) = apply_all(
            Provider::new(Vendor::Shoulders, None),
            vec![NormalizedEvent::BalanceUpdate { credits: 4.5 }],
        );
        assert_eq!(signals, vec![TurnSignal::Balance(4.5)]);
    }
}
