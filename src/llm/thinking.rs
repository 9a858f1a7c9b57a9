// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Reasoning ("extended thinking") selection
//!
//! Each vendor asks for reasoning differently: Anthropic takes an adaptive
//! effort or a token budget, OpenAI an effort, Gemini 3 a level enum and
//! Gemini 2.5 a budget. Only models known to accept one get one.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::providers::Vendor;

static CLAUDE_ADAPTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"claude-(opus|sonnet)-4-6").unwrap());
static CLAUDE_BUDGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"claude-(opus|sonnet)-4").unwrap());
static OPENAI_REASONING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"gpt-5|o\d").unwrap());

const CLAUDE_BUDGET_TOKENS: u32 = 10_000;
const GEMINI_25_BUDGET_TOKENS: u32 = 8_192;

/// Reasoning level configured on a model entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// Reasoning explicitly disabled
    None,
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::None => "none",
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reasoning request in one vendor's own shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningConfig {
    /// `thinking: {type: adaptive}` plus `output_config.effort`
    AnthropicAdaptive { effort: ThinkingLevel },
    /// `thinking: {type: enabled, budget_tokens}`
    AnthropicBudget { budget_tokens: u32 },
    /// `reasoning: {effort, summary: auto}`
    OpenAiEffort { effort: ThinkingLevel },
    /// `thinkingConfig.thinkingLevel`
    GoogleLevel { level: ThinkingLevel },
    /// `thinkingConfig.thinkingBudget`
    GoogleBudget { budget: u32 },
}

/// Pick the reasoning request for a model, or None when it has none.
///
/// `vendor` is the wire format the model is reached through; for the relay
/// pass the hint so the inner vendor's rules apply.
pub fn select_reasoning(
    vendor: Vendor,
    model: &str,
    level: Option<ThinkingLevel>,
) -> Option<ReasoningConfig> {
    if level == Some(ThinkingLevel::None) {
        return None;
    }

    match vendor {
        Vendor::Anthropic | Vendor::Shoulders => {
            if CLAUDE_ADAPTIVE.is_match(model) {
                Some(ReasoningConfig::AnthropicAdaptive {
                    effort: level.unwrap_or(ThinkingLevel::Medium),
                })
            } else if CLAUDE_BUDGET.is_match(model) {
                Some(ReasoningConfig::AnthropicBudget {
                    budget_tokens: CLAUDE_BUDGET_TOKENS,
                })
            } else {
                None
            }
        }
        Vendor::OpenAi => OPENAI_REASONING
            .is_match(model)
            .then(|| ReasoningConfig::OpenAiEffort {
                effort: level.unwrap_or(ThinkingLevel::Medium),
            }),
        Vendor::Google => {
            if model.contains("lite") {
                None
            } else if model.contains("gemini-3") {
                Some(ReasoningConfig::GoogleLevel {
                    level: level.unwrap_or(ThinkingLevel::High),
                })
            } else if model.contains("gemini-2.5") {
                Some(ReasoningConfig::GoogleBudget {
                    budget: GEMINI_25_BUDGET_TOKENS,
                })
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_none_disables() {
        assert_eq!(
            select_reasoning(Vendor::Anthropic, "claude-opus-4-6", Some(ThinkingLevel::None)),
            None
        );
    }

    #[test]
    fn test_anthropic_selection() {
        assert_eq!(
            select_reasoning(Vendor::Anthropic, "claude-sonnet-4-6", None),
            Some(ReasoningConfig::AnthropicAdaptive {
                effort: ThinkingLevel::Medium
            })
        );
        assert_eq!(
            select_reasoning(Vendor::Shoulders, "claude-opus-4-6", Some(ThinkingLevel::High)),
            Some(ReasoningConfig::AnthropicAdaptive {
                effort: ThinkingLevel::High
            })
        );
        assert_eq!(
            select_reasoning(Vendor::Anthropic, "claude-sonnet-4-5-20250929", None),
            Some(ReasoningConfig::AnthropicBudget {
                budget_tokens: 10_000
            })
        );
        assert_eq!(
            select_reasoning(Vendor::Anthropic, "claude-haiku-4-5-20251001", None),
            None
        );
    }

    #[test]
    fn test_openai_selection() {
        assert_eq!(
            select_reasoning(Vendor::OpenAi, "gpt-5.2-2025-12-11", Some(ThinkingLevel::Low)),
            Some(ReasoningConfig::OpenAiEffort {
                effort: ThinkingLevel::Low
            })
        );
        assert!(select_reasoning(Vendor::OpenAi, "o3-mini", None).is_some());
        assert_eq!(select_reasoning(Vendor::OpenAi, "gpt-4.1", None), None);
    }

    #[test]
    fn test_google_selection() {
        assert_eq!(
            select_reasoning(Vendor::Google, "gemini-3.1-pro-preview", None),
            Some(ReasoningConfig::GoogleLevel {
                level: ThinkingLevel::High
            })
        );
        assert_eq!(
            select_reasoning(Vendor::Google, "gemini-2.5-pro", None),
            Some(ReasoningConfig::GoogleBudget { budget: 8_192 })
        );
        assert_eq!(
            select_reasoning(Vendor::Google, "gemini-2.5-flash-lite", None),
            None
        );
    }

    #[test]
    fn test_thinking_level_serde() {
        let level: ThinkingLevel = serde_json::from_str("\"minimal\"").unwrap();
        assert_eq!(level, ThinkingLevel::Minimal);
        assert_eq!(serde_json::to_string(&ThinkingLevel::High).unwrap(), "\"high\"");
    }
}
