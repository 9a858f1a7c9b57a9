// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Non-streaming model calls
//!
//! Used for quick tasks that want a single answer: format the request,
//! POST it, pull out the first text block and the usage.

use reqwest::Client;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::llm::pricing;
use crate::llm::provider::RequestOptions;
use crate::llm::providers::Provider;
use crate::llm::usage::{self, UsageSnapshot};

/// Relay bookkeeping attached to non-streaming responses
const RELAY_TRAILER: &str = "_shoulders";

/// Result of a non-streaming call
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    /// First text of the response, None when the model produced none
    pub text: Option<String>,
    /// Priced usage
    pub usage: Option<UsageSnapshot>,
    /// Relay credit balance reported with the response
    pub balance: Option<f64>,
    /// Response body without relay bookkeeping
    pub raw: Value,
}

/// Make one non-streaming call.
pub async fn call_model(
    client: &Client,
    provider: Provider,
    options: &RequestOptions,
) -> Result<ModelReply> {
    let request = provider.format_non_streaming_request(options)?;

    let mut builder = client.post(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder
        .json(&request.body)
        .send()
        .await
        .map_err(|e| ApiError::from_reqwest(&e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::from_reqwest(&e))?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &body).into());
    }

    let mut raw: Value = serde_json::from_str(&body)
        .map_err(|e| ApiError::InvalidResponse(format!("response is not JSON: {}", e)))?;

    let balance = raw
        .as_object_mut()
        .and_then(|map| map.remove(RELAY_TRAILER))
        .and_then(|trailer| trailer["balance"].as_f64().or(trailer["credits"].as_f64()));

    let usage = provider.extract_usage(&raw).map(|raw_usage| {
        let snapshot = usage::normalize(provider.vendor(), &raw_usage);
        pricing::priced(snapshot, &options.model)
    });

    tracing::debug!(
        target: "shoulders.provider",
        provider = %provider,
        model = %options.model,
        cost = usage.map(|u| u.cost).unwrap_or_default(),
        "non-streaming call finished"
    );

    Ok(ModelReply {
        text: provider.extract_text(&raw),
        usage,
        balance,
        raw,
    })
}
