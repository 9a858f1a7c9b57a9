// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Shoulders
//!
//! Handles loading and saving settings from ~/.shoulders/settings.json

use serde::{Deserialize, Serialize};

use crate::llm::providers::Vendor;
use crate::llm::thinking::ThinkingLevel;

mod io;
mod migration;
mod validation;

/// Main settings structure, stored in ~/.shoulders/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Credentials and endpoints per provider
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Model catalog: user-facing ids mapped onto provider models
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,

    /// Default settings for new sessions
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Session engine knobs
    #[serde(default)]
    pub engine: EngineConfig,

    /// Monthly spend limit
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            models: default_models(),
            defaults: DefaultsConfig::default(),
            engine: EngineConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Anthropic Messages API
    #[serde(default)]
    pub anthropic: DirectProviderConfig,

    /// OpenAI Responses API
    #[serde(default)]
    pub openai: DirectProviderConfig,

    /// Google Gemini API
    #[serde(default)]
    pub google: DirectProviderConfig,

    /// Shoulders relay (billing proxy in front of all three)
    #[serde(default)]
    pub shoulders: ShouldersConfig,
}

/// A provider called directly with the user's own key
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key (defaults per provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Shoulders relay account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShouldersConfig {
    /// Account token (if stored directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable name for the account token
    #[serde(default = "default_shoulders_token_env")]
    pub token_env: String,

    /// Relay endpoint
    #[serde(default = "default_shoulders_base_url")]
    pub base_url: String,
}

impl Default for ShouldersConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_shoulders_token_env(),
            base_url: default_shoulders_base_url(),
        }
    }
}

/// One selectable model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// Id used by sessions (e.g. "sonnet")
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Provider that serves the model
    pub provider: Vendor,

    /// Provider-side model identifier
    pub model: String,

    /// Context window in tokens (engine default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    /// Reasoning level; `none` disables reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingLevel>,

    /// Whether this is the default model
    #[serde(default)]
    pub default: bool,
}

/// Default settings for new sessions
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Model id used when a session does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System prompt sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Provider model tried first by the ghost strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost_model: Option<String>,
}

/// Session engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tool-loop depth at which a send chain is stopped (None = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_loop_depth: Option<u32>,

    /// Request timeout for the HTTP transport
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Context window for models that do not declare one
    #[serde(default = "default_context_window")]
    pub default_context_window: u32,

    /// Output token cap when reasoning is off
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_loop_depth: None,
            request_timeout_secs: default_request_timeout_secs(),
            default_context_window: default_context_window(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Monthly spend limit for direct (own-key) calls
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    /// Limit in USD; 0 disables the gate
    #[serde(default)]
    pub monthly_limit_usd: f64,
}

impl BudgetConfig {
    pub fn limit(&self) -> Option<f64> {
        (self.monthly_limit_usd > 0.0).then_some(self.monthly_limit_usd)
    }
}

impl Settings {
    /// Look up a model entry by id, falling back to the first entry.
    pub fn model_entry(&self, id: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .or_else(|| self.models.first())
    }

    /// Model id used when none is given.
    pub fn default_model_id(&self) -> Option<String> {
        self.defaults.model.clone().or_else(|| {
            self.models
                .iter()
                .find(|m| m.default)
                .or_else(|| self.models.first())
                .map(|m| m.id.clone())
        })
    }
}

fn model(id: &str, name: &str, provider: Vendor, model: &str) -> ModelEntry {
    ModelEntry {
        id: id.to_string(),
        name: name.to_string(),
        provider,
        model: model.to_string(),
        context_window: None,
        thinking: None,
        default: false,
    }
}

fn default_models() -> Vec<ModelEntry> {
    vec![
        model("opus", "Opus 4.6", Vendor::Anthropic, "claude-opus-4-6"),
        ModelEntry {
            default: true,
            ..model("sonnet", "Sonnet 4.6", Vendor::Anthropic, "claude-sonnet-4-6")
        },
        model("haiku", "Haiku 4.5", Vendor::Anthropic, "claude-haiku-4-5-20251001"),
        model("gpt-5.2", "GPT-5.2", Vendor::OpenAi, "gpt-5.2-2025-12-11"),
        model("gpt-5-mini", "GPT-5 Mini", Vendor::OpenAi, "gpt-5-mini-2025-08-07"),
        ModelEntry {
            thinking: Some(ThinkingLevel::Low),
            ..model(
                "gemini-3.1-pro-fast",
                "Gemini 3.1 Pro (Low)",
                Vendor::Google,
                "gemini-3.1-pro-preview",
            )
        },
        ModelEntry {
            thinking: Some(ThinkingLevel::High),
            ..model(
                "gemini-3.1-pro-deep",
                "Gemini 3.1 Pro (High)",
                Vendor::Google,
                "gemini-3.1-pro-preview",
            )
        },
        ModelEntry {
            thinking: Some(ThinkingLevel::Medium),
            ..model(
                "gemini-flash",
                "Gemini 3 Flash",
                Vendor::Google,
                "gemini-3-flash-preview",
            )
        },
    ]
}

// Default value functions
fn default_shoulders_token_env() -> String {
    "SHOULDERS_TOKEN".to_string()
}

fn default_shoulders_base_url() -> String {
    "https://shoulde.rs/api/v1/proxy".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_context_window() -> u32 {
    200_000
}

fn default_max_tokens() -> u32 {
    16_384
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.models.len(), 8);
        assert_eq!(settings.engine.request_timeout_secs, 300);
        assert_eq!(settings.engine.default_context_window, 200_000);
        assert!(settings.engine.max_tool_loop_depth.is_none());
        assert!(settings.budget.limit().is_none());
        assert_eq!(settings.providers.shoulders.token_env, "SHOULDERS_TOKEN");
    }

    #[test]
    fn test_default_model_id_prefers_flagged_entry() {
        let settings = Settings::default();
        assert_eq!(settings.default_model_id(), Some("sonnet".to_string()));
    }

    #[test]
    fn test_default_model_id_prefers_defaults_section() {
        let mut settings = Settings::default();
        settings.defaults.model = Some("haiku".to_string());
        assert_eq!(settings.default_model_id(), Some("haiku".to_string()));
    }

    #[test]
    fn test_model_entry_falls_back_to_first() {
        let settings = Settings::default();
        assert_eq!(settings.model_entry("gpt-5.2").map(|m| m.provider), Some(Vendor::OpenAi));
        assert_eq!(
            settings.model_entry("missing").map(|m| m.id.as_str()),
            Some("opus")
        );
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let json = r#"{"engine": {"max_tool_loop_depth": 12}, "budget": {"monthly_limit_usd": 25.0}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.engine.max_tool_loop_depth, Some(12));
        assert_eq!(settings.engine.request_timeout_secs, 300);
        assert_eq!(settings.budget.limit(), Some(25.0));
        assert_eq!(settings.models.len(), 8);
    }

    #[test]
    fn test_model_entry_thinking_none() {
        let json = r#"{"models": [{"id": "x", "provider": "openai", "model": "gpt-5.2", "thinking": "none"}]}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.models[0].thinking, Some(ThinkingLevel::None));
    }

    #[test]
    fn test_settings_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.engine.max_tool_loop_depth = Some(5);
        settings.providers.openai.api_key = Some("sk-test".to_string());
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.engine.max_tool_loop_depth, Some(5));
        assert_eq!(loaded.providers.openai.api_key, Some("sk-test".to_string()));
    }

    #[test]
    fn test_settings_save_preserves_unknown_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"editor": {"font": "mono"}}"#).unwrap();

        Settings::default().save_to(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["editor"]["font"], "mono");
        assert!(raw["engine"].is_object());
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.models.len(), 8);
    }
}
