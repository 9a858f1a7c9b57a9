// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model pricing and cost calculation
//!
//! Prices are USD per million tokens. Model ids are reduced to a table key by
//! stripping date stamps and `-preview`.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::usage::UsageSnapshot;

/// Total input above which large-prompt rates apply.
pub const LARGE_PROMPT_THRESHOLD: u64 = 200_000;

// Model ids end in -20251001, -2025-12-11 or -preview.
static COMPACT_DATE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-\d{8,}$").unwrap());
static DASHED_DATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d{4}-\d{2}-\d{2}$").unwrap());
static PREVIEW_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-preview$").unwrap());

/// Per-MTok rates for one model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: Option<f64>,
    pub cache_read: Option<f64>,
    /// Rates above [`LARGE_PROMPT_THRESHOLD`], where the model has a tier
    pub large_prompt: Option<LargePromptPricing>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LargePromptPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: Option<f64>,
    pub cache_read: Option<f64>,
}

const fn flat(input: f64, output: f64, cache_write: Option<f64>, cache_read: f64) -> ModelPricing {
    ModelPricing {
        input,
        output,
        cache_write,
        cache_read: Some(cache_read),
        large_prompt: None,
    }
}

/// Built-in price table
pub const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    // Anthropic
    ("claude-opus-4-6", flat(5.00, 25.00, Some(6.25), 0.50)),
    (
        "claude-sonnet-4-6",
        ModelPricing {
            large_prompt: Some(LargePromptPricing {
                input: 6.00,
                output: 22.50,
                cache_write: Some(7.50),
                cache_read: Some(0.60),
            }),
            ..flat(3.00, 15.00, Some(3.75), 0.30)
        },
    ),
    ("claude-haiku-4-5", flat(1.00, 5.00, Some(1.25), 0.10)),
    // Google
    ("gemini-2.5-flash-lite", flat(0.10, 0.40, None, 0.001)),
    ("gemini-3-flash", flat(0.50, 3.00, None, 0.05)),
    (
        "gemini-3.1-pro",
        ModelPricing {
            large_prompt: Some(LargePromptPricing {
                input: 4.00,
                output: 18.00,
                cache_write: None,
                cache_read: Some(0.40),
            }),
            ..flat(2.00, 12.00, None, 0.20)
        },
    ),
    // OpenAI
    ("gpt-5.2", flat(1.75, 14.00, None, 0.175)),
    ("gpt-5-mini", flat(0.25, 2.00, None, 0.025)),
    ("gpt-5-nano", flat(0.05, 0.40, None, 0.005)),
];

/// Reduce a provider model id to its price-table key.
pub fn price_key(model: &str) -> String {
    let key = COMPACT_DATE_SUFFIX.replace(model, "");
    let key = DASHED_DATE_SUFFIX.replace(&key, "");
    PREVIEW_SUFFIX.replace(&key, "").into_owned()
}

/// Look up pricing for a model id; returns the resolved key too.
pub fn pricing_for(model: &str) -> Option<(&'static str, ModelPricing)> {
    let key = price_key(model);
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(name, pricing)| (*name, *pricing))
}

/// USD cost of a usage snapshot, rounded to the micro-dollar.
///
/// Unknown models cost zero and log a warning.
pub fn price(usage: &UsageSnapshot, model: &str) -> f64 {
    let Some((_, pricing)) = pricing_for(model) else {
        tracing::warn!(
            target: "shoulders.usage",
            model = %model,
            key = %price_key(model),
            "no pricing for model"
        );
        return 0.0;
    };

    let tier = pricing
        .large_prompt
        .filter(|_| usage.input_total > LARGE_PROMPT_THRESHOLD);
    let (input, output, cache_write, cache_read) = match tier {
        Some(large) => (
            large.input,
            large.output,
            large.cache_write.or(pricing.cache_write),
            large.cache_read.or(pricing.cache_read),
        ),
        None => (
            pricing.input,
            pricing.output,
            pricing.cache_write,
            pricing.cache_read,
        ),
    };

    let per_token = |rate: f64, tokens: u64| tokens as f64 * rate / 1_000_000.0;
    let cost = per_token(input, usage.input_cache_miss)
        + per_token(cache_write.unwrap_or(0.0), usage.input_cache_write)
        + per_token(cache_read.unwrap_or(0.0), usage.input_cache_hit)
        + per_token(output, usage.output);

    let rounded = (cost * 1_000_000.0).round() / 1_000_000.0;
    if rounded.is_finite() {
        rounded
    } else {
        0.0
    }
}

/// Return the snapshot with its cost filled in.
pub fn priced(usage: UsageSnapshot, model: &str) -> UsageSnapshot {
    UsageSnapshot {
        cost: price(&usage, model),
        ..usage
    }
}

/// Format a USD amount for display.
pub fn format_cost(cost: f64) -> String {
    if cost <= 0.0 || !cost.is_finite() {
        "$0.00".to_string()
    } else if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_key_strips_suffixes() {
        assert_eq!(price_key("claude-opus-4-6"), "claude-opus-4-6");
        assert_eq!(price_key("claude-haiku-4-5-20251001"), "claude-haiku-4-5");
        assert_eq!(price_key("gemini-3-flash-preview"), "gemini-3-flash");
        assert_eq!(price_key("gemini-3.1-pro-preview"), "gemini-3.1-pro");
        assert_eq!(price_key("gpt-5.2-2025-12-11"), "gpt-5.2");
        assert_eq!(price_key("gpt-5-mini-2025-08-07"), "gpt-5-mini");
    }

    #[test]
    fn test_price_reference_scenario() {
        // $3 input / $15 output per MTok
        let usage = UsageSnapshot {
            input_cache_miss: 1000,
            input_total: 1000,
            output: 500,
            total: 1500,
            ..Default::default()
        };
        assert_eq!(price(&usage, "claude-sonnet-4-6"), 0.0105);
    }

    #[test]
    fn test_price_cache_rates() {
        let usage = UsageSnapshot {
            input_cache_hit: 1_000_000,
            input_cache_write: 1_000_000,
            input_total: 2_000_000,
            ..Default::default()
        };
        // Large tier applies: 0.60 read + 7.50 write
        assert!((price(&usage, "claude-sonnet-4-6") - 8.10).abs() < 1e-9);
        // Opus has no large tier: 0.50 + 6.25
        assert!((price(&usage, "claude-opus-4-6") - 6.75).abs() < 1e-9);
    }

    #[test]
    fn test_large_prompt_tier_threshold() {
        let at = UsageSnapshot {
            input_cache_miss: 200_000,
            input_total: 200_000,
            ..Default::default()
        };
        let above = UsageSnapshot {
            input_cache_miss: 200_001,
            input_total: 200_001,
            ..Default::default()
        };
        assert!((price(&at, "gemini-3.1-pro-preview") - 0.4).abs() < 1e-9);
        assert!((price(&above, "gemini-3.1-pro-preview") - 0.800004).abs() < 1e-9);
    }

    #[test]
    fn test_missing_cache_write_rate_is_zero() {
        let usage = UsageSnapshot {
            input_cache_write: 1_000_000,
            ..Default::default()
        };
        assert_eq!(price(&usage, "gpt-5.2"), 0.0);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let usage = UsageSnapshot {
            input_cache_miss: 1000,
            output: 1000,
            ..Default::default()
        };
        assert_eq!(price(&usage, "mystery-model"), 0.0);
        assert!(pricing_for("mystery-model").is_none());
    }

    #[test]
    fn test_priced_fills_cost() {
        let usage = UsageSnapshot {
            output: 1_000_000,
            ..Default::default()
        };
        assert!((priced(usage, "gpt-5-nano").cost - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(0.0042), "$0.0042");
        assert_eq!(format_cost(0.1234), "$0.123");
        assert_eq!(format_cost(1.234), "$1.23");
    }
}
