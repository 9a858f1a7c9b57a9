// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Token usage normalization
//!
//! Two combination rules exist and are not interchangeable:
//! [`UsageSnapshot::merge`] takes the per-field maximum and reconciles
//! successive cumulative reports of one turn; [`UsageSnapshot::sum`] adds
//! fields and combines separate turns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::providers::Vendor;

/// Cross-vendor usage counters for one or more turns
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Input billed at the standard rate
    pub input_cache_miss: u64,
    /// Input read from the prompt cache
    pub input_cache_hit: u64,
    /// Input written to the prompt cache
    pub input_cache_write: u64,
    pub input_total: u64,
    /// All output tokens, thinking included
    pub output: u64,
    /// Reasoning tokens; informational subset of `output`
    pub thinking: u64,
    pub total: u64,
    /// USD, set by pricing
    #[serde(default)]
    pub cost: f64,
}

impl UsageSnapshot {
    /// Per-field maximum.
    pub fn merge(&self, other: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            input_cache_miss: self.input_cache_miss.max(other.input_cache_miss),
            input_cache_hit: self.input_cache_hit.max(other.input_cache_hit),
            input_cache_write: self.input_cache_write.max(other.input_cache_write),
            input_total: self.input_total.max(other.input_total),
            output: self.output.max(other.output),
            thinking: self.thinking.max(other.thinking),
            total: self.total.max(other.total),
            cost: self.cost.max(other.cost),
        }
    }

    /// Per-field addition.
    pub fn sum(&self, other: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            input_cache_miss: self.input_cache_miss + other.input_cache_miss,
            input_cache_hit: self.input_cache_hit + other.input_cache_hit,
            input_cache_write: self.input_cache_write + other.input_cache_write,
            input_total: self.input_total + other.input_total,
            output: self.output + other.output,
            thinking: self.thinking + other.thinking,
            total: self.total + other.total,
            cost: self.cost + other.cost,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.input_total == 0 && self.output == 0
    }
}

impl std::iter::Sum for UsageSnapshot {
    fn sum<I: Iterator<Item = UsageSnapshot>>(iter: I) -> Self {
        iter.fold(UsageSnapshot::default(), |acc, usage| acc.sum(&usage))
    }
}

/// Normalize one vendor's raw usage object. Cost is left at zero.
pub fn normalize(vendor: Vendor, raw: &Value) -> UsageSnapshot {
    if !raw.is_object() {
        return UsageSnapshot::default();
    }

    let counters = match vendor {
        Vendor::Anthropic | Vendor::Shoulders => {
            let miss = field(raw, &["input_tokens"]);
            let hit = field(raw, &["cache_read_input_tokens"]);
            let write = field(raw, &["cache_creation_input_tokens"]);
            let input_total = miss + hit + write;
            let output = field(raw, &["output_tokens"]);
            // Anthropic folds thinking into output_tokens without a breakdown.
            Counters {
                miss,
                hit,
                write,
                input_total,
                output,
                thinking: 0,
                total: input_total + output,
            }
        }
        Vendor::OpenAi => {
            let prompt = field(raw, &["prompt_tokens", "input_tokens"]);
            let cached = first_positive(&[
                nested(raw, "prompt_tokens_details", "cached_tokens"),
                nested(raw, "input_tokens_details", "cached_tokens"),
            ]);
            let output = field(raw, &["completion_tokens", "output_tokens"]);
            let thinking = first_positive(&[
                nested(raw, "completion_tokens_details", "reasoning_tokens"),
                nested(raw, "output_tokens_details", "reasoning_tokens"),
            ]);
            let total = match field(raw, &["total_tokens"]) {
                0 => prompt + output,
                n => n,
            };
            Counters {
                miss: prompt - cached,
                hit: cached,
                write: 0,
                input_total: prompt,
                output,
                thinking,
                total,
            }
        }
        Vendor::Google => {
            let prompt = field(raw, &["promptTokenCount"]);
            let cached = field(raw, &["cachedContentTokenCount"]);
            let thoughts = field(raw, &["thoughtsTokenCount"]);
            let output = field(raw, &["candidatesTokenCount"]) + thoughts;
            let total = match field(raw, &["totalTokenCount"]) {
                0 => prompt + output,
                n => n,
            };
            Counters {
                miss: prompt - cached,
                hit: cached,
                write: 0,
                input_total: prompt,
                output,
                thinking: thoughts,
                total,
            }
        }
    };

    counters.into_snapshot()
}

/// Signed intermediate so a vendor reporting more cached than prompt tokens
/// clamps to zero instead of wrapping.
struct Counters {
    miss: i64,
    hit: i64,
    write: i64,
    input_total: i64,
    output: i64,
    thinking: i64,
    total: i64,
}

impl Counters {
    fn into_snapshot(self) -> UsageSnapshot {
        let clamp = |n: i64| n.max(0) as u64;
        UsageSnapshot {
            input_cache_miss: clamp(self.miss),
            input_cache_hit: clamp(self.hit),
            input_cache_write: clamp(self.write),
            input_total: clamp(self.input_total),
            output: clamp(self.output),
            thinking: clamp(self.thinking),
            total: clamp(self.total),
            cost: 0.0,
        }
    }
}

/// First present, positive numeric field among `names`.
fn field(raw: &Value, names: &[&str]) -> i64 {
    first_positive(&names.iter().map(|name| number(&raw[*name])).collect::<Vec<_>>())
}

fn nested(raw: &Value, outer: &str, inner: &str) -> i64 {
    number(&raw[outer][inner])
}

fn first_positive(values: &[i64]) -> i64 {
    values.iter().copied().find(|n| *n > 0).unwrap_or(0)
}

fn number(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
        .unwrap_or(0)
}
