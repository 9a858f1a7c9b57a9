// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::llm::providers::Vendor;

use super::{DirectProviderConfig, Settings};

/// Keys still holding template text such as "your-api-key-here" are unset.
fn usable(key: String) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() || trimmed.contains("your-") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Settings {
    fn direct_config(&self, vendor: Vendor) -> Option<&DirectProviderConfig> {
        match vendor {
            Vendor::Anthropic => Some(&self.providers.anthropic),
            Vendor::OpenAi => Some(&self.providers.openai),
            Vendor::Google => Some(&self.providers.google),
            Vendor::Shoulders => None,
        }
    }

    /// Environment variable consulted for a provider's key.
    pub fn api_key_env(&self, vendor: Vendor) -> Option<String> {
        let config = self.direct_config(vendor)?;
        config
            .api_key_env
            .clone()
            .or_else(|| vendor.default_key_env().map(str::to_string))
    }

    /// Get the direct API key for a provider, checking env var first.
    pub fn get_api_key(&self, vendor: Vendor) -> Option<String> {
        let config = self.direct_config(vendor)?;
        // Priority: env var > config file.
        self.api_key_env(vendor)
            .and_then(|name| std::env::var(name).ok())
            .and_then(usable)
            .or_else(|| config.api_key.clone().and_then(usable))
    }

    /// Base URL override for a direct provider.
    pub fn get_base_url(&self, vendor: Vendor) -> Option<String> {
        match vendor {
            Vendor::Shoulders => Some(self.get_shoulders_base_url()),
            other => self.direct_config(other)?.base_url.clone(),
        }
    }

    /// Get the Shoulders account token, checking env var first.
    pub fn get_shoulders_token(&self) -> Option<String> {
        std::env::var(&self.providers.shoulders.token_env)
            .ok()
            .and_then(usable)
            .or_else(|| self.providers.shoulders.token.clone().and_then(usable))
    }

    /// Get the relay base URL, checking env var first.
    pub fn get_shoulders_base_url(&self) -> String {
        std::env::var("SHOULDERS_BASE_URL")
            .ok()
            .unwrap_or_else(|| self.providers.shoulders.base_url.clone())
    }

    /// Whether any route (direct key or relay token) exists for a provider.
    pub fn is_provider_configured(&self, vendor: Vendor) -> bool {
        self.get_api_key(vendor).is_some() || self.get_shoulders_token().is_some()
    }
}
