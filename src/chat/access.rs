// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Credential resolution from settings
//!
//! Direct keys win over the relay: a model is called with the user's own key
//! for its provider when one exists, otherwise through the Shoulders relay
//! with the provider passed as hint.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::chat::interfaces::{Access, AccessRequest, AccessResolver, FallbackStrategy};
use crate::config::Settings;
use crate::error::AccessError;
use crate::llm::providers::Vendor;

/// A provider model a fallback strategy may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackModel {
    pub vendor: Vendor,
    pub model: &'static str,
}

const fn fallback(vendor: Vendor, model: &'static str) -> FallbackModel {
    FallbackModel { vendor, model }
}

pub const GHOST_MODELS: &[FallbackModel] = &[
    fallback(Vendor::Anthropic, "claude-haiku-4-5-20251001"),
    fallback(Vendor::Google, "gemini-2.5-flash-lite"),
    fallback(Vendor::OpenAi, "gpt-5-nano-2025-08-07"),
];

pub const CHEAP_MODELS: &[FallbackModel] = &[
    fallback(Vendor::Google, "gemini-2.5-flash-lite"),
    fallback(Vendor::Anthropic, "claude-haiku-4-5-20251001"),
    fallback(Vendor::OpenAi, "gpt-5-nano-2025-08-07"),
];

/// Resolves access from the settings file and environment
#[derive(Debug)]
pub struct SettingsAccessResolver {
    settings: Settings,
    /// Set by callers that know the relay cannot be reached
    offline: AtomicBool,
}

impl SettingsAccessResolver {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn direct(&self, vendor: Vendor, model: &str) -> Option<Access> {
        let api_key = self.settings.get_api_key(vendor)?;
        Some(Access {
            endpoint: self.settings.get_base_url(vendor).map(migrate_endpoint),
            api_key,
            vendor,
            vendor_hint: None,
            model: model.to_string(),
            context_window: None,
            thinking: None,
        })
    }

    /// Relay access, or why it is unavailable.
    fn relay(&self, hint: Vendor, model: &str) -> Result<Access, AccessError> {
        let token = self
            .settings
            .get_shoulders_token()
            .ok_or(AccessError::NoCredentials)?;
        if self.offline.load(Ordering::Relaxed) {
            return Err(AccessError::Offline);
        }
        Ok(Access {
            endpoint: Some(self.settings.get_shoulders_base_url()),
            api_key: token,
            vendor: Vendor::Shoulders,
            vendor_hint: Some(hint),
            model: model.to_string(),
            context_window: None,
            thinking: None,
        })
    }

    fn resolve_model(&self, id: &str) -> Result<Access, AccessError> {
        let entry = self
            .settings
            .model_entry(id)
            .ok_or(AccessError::NoCredentials)?;

        let access = match entry.provider {
            Vendor::Shoulders => self.relay(Vendor::Anthropic, &entry.model)?,
            vendor => match self.direct(vendor, &entry.model) {
                Some(access) => access,
                None => self.relay(vendor, &entry.model)?,
            },
        };
        Ok(Access {
            context_window: entry.context_window,
            thinking: entry.thinking,
            ..access
        })
    }

    fn resolve_strategy(&self, strategy: FallbackStrategy) -> Result<Access, AccessError> {
        let list = match strategy {
            FallbackStrategy::Ghost => GHOST_MODELS,
            FallbackStrategy::Cheapest => CHEAP_MODELS,
        };

        let preferred = match strategy {
            FallbackStrategy::Ghost => self
                .settings
                .defaults
                .ghost_model
                .as_deref()
                .and_then(|model| list.iter().find(|m| m.model == model)),
            FallbackStrategy::Cheapest => None,
        };
        if let Some(candidate) = preferred {
            if let Some(access) = self.direct(candidate.vendor, candidate.model) {
                return Ok(access);
            }
            if let Ok(access) = self.relay(candidate.vendor, candidate.model) {
                return Ok(access);
            }
        }

        if let Some(access) = list
            .iter()
            .find_map(|candidate| self.direct(candidate.vendor, candidate.model))
        {
            return Ok(access);
        }
        let first = list.first().ok_or(AccessError::NoCredentials)?;
        self.relay(first.vendor, first.model)
    }
}

/// Saved OpenAI endpoints may still point at Chat Completions.
fn migrate_endpoint(url: String) -> String {
    if url.contains("/v1/chat/completions") {
        url.replace("/v1/chat/completions", "/v1/responses")
    } else {
        url
    }
}

#[async_trait]
impl AccessResolver for SettingsAccessResolver {
    async fn resolve(&self, request: &AccessRequest) -> Result<Access, AccessError> {
        let result = match request {
            AccessRequest::Model(id) => self.resolve_model(id),
            AccessRequest::Strategy(strategy) => self.resolve_strategy(*strategy),
        };
        match &result {
            Ok(access) => tracing::debug!(
                target: "shoulders.access",
                request = ?request,
                vendor = %access.vendor,
                model = %access.model,
                "access resolved"
            ),
            Err(e) => tracing::debug!(
                target: "shoulders.access",
                request = ?request,
                error = %e,
                "access unavailable"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::thinking::ThinkingLevel;

    // Env var names that cannot collide with a developer's real keys.
    fn isolated() -> Settings {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key_env = Some("SHOULDERS_TEST_UNSET_ANTHROPIC".into());
        settings.providers.openai.api_key_env = Some("SHOULDERS_TEST_UNSET_OPENAI".into());
        settings.providers.google.api_key_env = Some("SHOULDERS_TEST_UNSET_GOOGLE".into());
        settings.providers.shoulders.token_env = "SHOULDERS_TEST_UNSET_TOKEN".into();
        settings
    }

    #[tokio::test]
    async fn test_direct_key_wins() {
        let mut settings = isolated();
        settings.providers.anthropic.api_key = Some("sk-ant".into());
        settings.providers.shoulders.token = Some("relay".into());
        let resolver = SettingsAccessResolver::new(settings);

        let access = resolver
            .resolve(&AccessRequest::Model("sonnet".into()))
            .await
            .unwrap();
        assert_eq!(access.vendor, Vendor::Anthropic);
        assert_eq!(access.api_key, "sk-ant");
        assert_eq!(access.model, "claude-sonnet-4-6");
        assert!(access.is_direct());
    }

    #[tokio::test]
    async fn test_relay_fallback_carries_hint_and_thinking() {
        let mut settings = isolated();
        settings.providers.shoulders.token = Some("relay".into());
        let resolver = SettingsAccessResolver::new(settings);

        let access = resolver
            .resolve(&AccessRequest::Model("gemini-3.1-pro-fast".into()))
            .await
            .unwrap();
        assert_eq!(access.vendor, Vendor::Shoulders);
        assert_eq!(access.vendor_hint, Some(Vendor::Google));
        assert_eq!(access.thinking, Some(ThinkingLevel::Low));
        assert_eq!(access.endpoint.as_deref(), Some("https://shoulde.rs/api/v1/proxy"));
    }

    #[tokio::test]
    async fn test_no_credentials_vs_offline() {
        let resolver = SettingsAccessResolver::new(isolated());
        assert_eq!(
            resolver
                .resolve(&AccessRequest::Model("sonnet".into()))
                .await
                .unwrap_err(),
            AccessError::NoCredentials
        );

        let mut settings = isolated();
        settings.providers.shoulders.token = Some("relay".into());
        let resolver = SettingsAccessResolver::new(settings);
        resolver.set_offline(true);
        assert_eq!(
            resolver
                .resolve(&AccessRequest::Model("sonnet".into()))
                .await
                .unwrap_err(),
            AccessError::Offline
        );
    }

    #[tokio::test]
    async fn test_placeholder_key_is_ignored() {
        let mut settings = isolated();
        settings.providers.openai.api_key = Some("your-api-key-here".into());
        let resolver = SettingsAccessResolver::new(settings);
        assert!(resolver
            .resolve(&AccessRequest::Model("gpt-5.2".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cheapest_walks_list() {
        let mut settings = isolated();
        settings.providers.openai.api_key = Some("sk-openai".into());
        let resolver = SettingsAccessResolver::new(settings);
        let access = resolver
            .resolve(&AccessRequest::Strategy(FallbackStrategy::Cheapest))
            .await
            .unwrap();
        assert_eq!(access.vendor, Vendor::OpenAi);
        assert_eq!(access.model, "gpt-5-nano-2025-08-07");
    }

    #[tokio::test]
    async fn test_ghost_prefers_configured_model_via_relay() {
        let mut settings = isolated();
        settings.providers.anthropic.api_key = Some("sk-ant".into());
        settings.providers.shoulders.token = Some("relay".into());
        settings.defaults.ghost_model = Some("gemini-2.5-flash-lite".into());
        let resolver = SettingsAccessResolver::new(settings);
        let access = resolver
            .resolve(&AccessRequest::Strategy(FallbackStrategy::Ghost))
            .await
            .unwrap();
        assert_eq!(access.vendor, Vendor::Shoulders);
        assert_eq!(access.vendor_hint, Some(Vendor::Google));
        assert_eq!(access.model, "gemini-2.5-flash-lite");
    }

    #[tokio::test]
    async fn test_strategy_relay_uses_first_entry() {
        let mut settings = isolated();
        settings.providers.shoulders.token = Some("relay".into());
        let resolver = SettingsAccessResolver::new(settings);
        let access = resolver
            .resolve(&AccessRequest::Strategy(FallbackStrategy::Ghost))
            .await
            .unwrap();
        assert_eq!(access.vendor_hint, Some(Vendor::Anthropic));
        assert_eq!(access.model, "claude-haiku-4-5-20251001");
    }

    #[test]
    fn test_migrate_endpoint() {
        assert_eq!(
            migrate_endpoint("https://api.openai.com/v1/chat/completions".into()),
            "https://api.openai.com/v1/responses"
        );
        assert_eq!(migrate_endpoint("http://localhost:8080".into()), "http://localhost:8080");
    }
}
