// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider wire formats
//!
//! The vendor set is closed: three native formats plus the Shoulders relay,
//! which accepts an Anthropic-shaped body on behalf of any of the three.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ShouldersError};
use crate::llm::event::NormalizedEvent;
use crate::llm::provider::{FormattedRequest, RequestOptions};
use crate::llm::sse::{self, CarryOver, SseRecord};

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod relay;

const BALANCE_TRAILER: &str = "shoulders_balance";

/// Who serves a model: a native API or the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    Shoulders,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
            Vendor::Google => "google",
            Vendor::Shoulders => "shoulders",
        }
    }

    /// Environment variable holding a direct API key
    pub fn default_key_env(&self) -> Option<&'static str> {
        match self {
            Vendor::Anthropic => Some("ANTHROPIC_API_KEY"),
            Vendor::OpenAi => Some("OPENAI_API_KEY"),
            Vendor::Google => Some("GOOGLE_API_KEY"),
            Vendor::Shoulders => None,
        }
    }

    /// Public endpoint used when settings carry no override
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Vendor::Anthropic => anthropic::API_URL,
            Vendor::OpenAi => openai::API_URL,
            Vendor::Google => google::API_BASE_URL,
            Vendor::Shoulders => relay::API_URL,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = ShouldersError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Vendor::Anthropic),
            "openai" => Ok(Vendor::OpenAi),
            "google" => Ok(Vendor::Google),
            "shoulders" => Ok(Vendor::Shoulders),
            other => Err(ShouldersError::InvalidInput(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// One wire format, selected per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    /// Relay in front of `hint`; the stream comes back Anthropic-shaped
    Relay { hint: Vendor },
}

impl Provider {
    /// Select the format for a resolved vendor and optional relay hint.
    pub fn new(vendor: Vendor, hint: Option<Vendor>) -> Self {
        match vendor {
            Vendor::Anthropic => Provider::Anthropic,
            Vendor::OpenAi => Provider::OpenAi,
            Vendor::Google => Provider::Google,
            Vendor::Shoulders => Provider::Relay {
                hint: hint
                    .filter(|h| *h != Vendor::Shoulders)
                    .unwrap_or(Vendor::Anthropic),
            },
        }
    }

    /// Vendor whose wire format this is (the relay reports itself)
    pub fn vendor(&self) -> Vendor {
        match self {
            Provider::Anthropic => Vendor::Anthropic,
            Provider::OpenAi => Vendor::OpenAi,
            Provider::Google => Vendor::Google,
            Provider::Relay { .. } => Vendor::Shoulders,
        }
    }

    pub fn hint(&self) -> Option<Vendor> {
        match self {
            Provider::Relay { hint } => Some(*hint),
            _ => None,
        }
    }

    /// Vendor whose model rules decide reasoning support
    pub fn model_vendor(&self) -> Vendor {
        match self {
            Provider::Relay { hint } => *hint,
            other => other.vendor(),
        }
    }

    /// Whether spend on this route is billed to the user's own key
    pub fn is_direct(&self) -> bool {
        !matches!(self, Provider::Relay { .. })
    }

    /// Build a streaming request.
    pub fn format_request(&self, options: &RequestOptions) -> Result<FormattedRequest> {
        match self {
            Provider::Anthropic => anthropic::format_request(options),
            Provider::OpenAi => openai::format_request(options),
            Provider::Google => google::format_request(options),
            Provider::Relay { hint } => relay::format_request(*hint, options),
        }
    }

    /// Build a non-streaming request.
    pub fn format_non_streaming_request(&self, options: &RequestOptions) -> Result<FormattedRequest> {
        match self {
            Provider::Anthropic => anthropic::format_non_streaming_request(options),
            Provider::OpenAi => openai::format_non_streaming_request(options),
            Provider::Google => google::format_non_streaming_request(options),
            Provider::Relay { hint } => relay::format_non_streaming_request(*hint, options),
        }
    }

    /// Frame raw stream bytes into records. Identical for every vendor.
    pub fn parse_chunk(&self, raw: &[u8], carry_over: CarryOver) -> (Vec<SseRecord>, CarryOver) {
        sse::parse_chunk(raw, carry_over)
    }

    /// Interpret one record. An empty vector means nothing to apply.
    pub fn interpret_event(&self, record: &SseRecord) -> Vec<NormalizedEvent> {
        let value = match record {
            SseRecord::Done => return vec![NormalizedEvent::MessageStop { usage: None }],
            SseRecord::Json(value) => value,
        };

        if value["type"].as_str() == Some(BALANCE_TRAILER) {
            return value["credits"]
                .as_f64()
                .map(|credits| vec![NormalizedEvent::BalanceUpdate { credits }])
                .unwrap_or_default();
        }

        match self {
            Provider::Anthropic | Provider::Relay { .. } => anthropic::interpret_event(value),
            Provider::OpenAi => openai::interpret_event(value),
            Provider::Google => google::interpret_event(value),
        }
    }

    /// Vendors that stream reasoning without a thinking BlockStart
    pub fn opens_thinking_implicitly(&self) -> bool {
        matches!(self, Provider::OpenAi | Provider::Google)
    }

    /// Vendors whose implicit thinking block only closes at message stop
    pub fn closes_thinking_at_stop(&self) -> bool {
        matches!(self, Provider::Google)
    }

    /// Text of a non-streaming response.
    pub fn extract_text(&self, response: &Value) -> Option<String> {
        let text = match self {
            Provider::Anthropic | Provider::Relay { .. } => response["content"]
                .as_array()?
                .iter()
                .find(|block| block["type"] == "text")?["text"]
                .as_str(),
            Provider::OpenAi => response["output"]
                .as_array()?
                .iter()
                .find(|item| item["type"] == "message")?["content"]
                .as_array()?
                .iter()
                .find(|part| part["type"] == "output_text")?["text"]
                .as_str(),
            Provider::Google => response["candidates"][0]["content"]["parts"][0]["text"].as_str(),
        };
        text.filter(|t| !t.is_empty()).map(str::to_string)
    }

    /// Raw usage object of a non-streaming response.
    pub fn extract_usage(&self, response: &Value) -> Option<Value> {
        let usage = match self {
            Provider::Google => &response["usageMetadata"],
            _ => &response["usage"],
        };
        NormalizedEvent::present(Some(usage))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Relay { hint } => write!(f, "shoulders ({})", hint),
            other => f.write_str(other.vendor().as_str()),
        }
    }
}

/// Content-Type plus vendor-specific headers.
pub(crate) fn json_headers<const N: usize>(extra: [(&str, String); N]) -> Vec<(String, String)> {
    std::iter::once(("Content-Type".to_string(), "application/json".to_string()))
        .chain(extra.into_iter().map(|(k, v)| (k.to_string(), v)))
        .collect()
}

/// Log a record kind no interpreter handles.
pub(crate) fn log_unhandled(vendor: Vendor, kind: &str, value: &Value) {
    let mut raw = value.to_string();
    if raw.len() > 500 {
        let mut cut = 500;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        raw.truncate(cut);
    }
    tracing::warn!(
        target: "shoulders.provider",
        vendor = %vendor,
        kind = %kind,
        raw = %raw,
        "unhandled stream event"
    );
}
