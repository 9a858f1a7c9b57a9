// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::json;
use tempfile::TempDir;

use shoulders::config::Settings;
use shoulders::llm::providers::Vendor;
use shoulders::llm::thinking::ThinkingLevel;

/// Settings whose credentials never come from the environment
fn isolated() -> Settings {
    let mut settings = Settings::default();
    settings.providers.anthropic.api_key_env = Some("SHOULDERS_CFG_TEST_UNSET_A".into());
    settings.providers.openai.api_key_env = Some("SHOULDERS_CFG_TEST_UNSET_O".into());
    settings.providers.google.api_key_env = Some("SHOULDERS_CFG_TEST_UNSET_G".into());
    settings.providers.shoulders.token_env = "SHOULDERS_CFG_TEST_UNSET_T".into();
    settings
}

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(settings.default_model_id().as_deref(), Some("sonnet"));
    assert_eq!(settings.engine.request_timeout_secs, 300);
    assert_eq!(settings.engine.default_context_window, 200_000);
    assert_eq!(settings.engine.max_tokens, 16_384);
    assert_eq!(settings.engine.max_tool_loop_depth, None);
    assert_eq!(settings.budget.limit(), None);
    assert_eq!(settings.providers.shoulders.token_env, "SHOULDERS_TOKEN");
}

#[test]
fn test_default_catalog_covers_every_vendor() {
    let settings = Settings::default();
    for vendor in [Vendor::Anthropic, Vendor::OpenAi, Vendor::Google] {
        assert!(
            settings.models.iter().any(|entry| entry.provider == vendor),
            "no default model for {}",
            vendor
        );
    }
    let flash = settings.model_entry("gemini-flash").unwrap();
    assert_eq!(flash.model, "gemini-3-flash-preview");
    assert_eq!(flash.thinking, Some(ThinkingLevel::Medium));
}

#[test]
fn test_model_entry_falls_back_to_first() {
    let settings = Settings::default();
    assert_eq!(settings.model_entry("no-such-model").unwrap().id, "opus");
}

#[test]
fn test_default_model_precedence() {
    let mut settings = Settings::default();
    settings.defaults.model = Some("haiku".into());
    assert_eq!(settings.default_model_id().as_deref(), Some("haiku"));

    settings.defaults.model = None;
    settings.models.iter_mut().for_each(|entry| entry.default = false);
    assert_eq!(settings.default_model_id().as_deref(), Some("opus"));

    settings.models.clear();
    assert_eq!(settings.default_model_id(), None);
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from(&dir.path().join("settings.json")).unwrap();
    assert_eq!(settings.models.len(), Settings::default().models.len());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        json!({
            "engine": {"max_tool_loop_depth": 8},
            "budget": {"monthly_limit_usd": 25.0}
        })
        .to_string(),
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.engine.max_tool_loop_depth, Some(8));
    assert_eq!(settings.engine.request_timeout_secs, 300);
    assert_eq!(settings.budget.limit(), Some(25.0));
    assert!(!settings.models.is_empty());
}

#[test]
fn test_save_keeps_unknown_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        json!({"editor": {"theme": "dark"}, "defaults": {"system_prompt": "old"}}).to_string(),
    )
    .unwrap();

    let mut settings = Settings::load_from(&path).unwrap();
    settings.defaults.system_prompt = Some("new".into());
    settings.save_to(&path).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["editor"]["theme"], "dark");
    assert_eq!(raw["defaults"]["system_prompt"], "new");

    let reloaded = Settings::load_from(&path).unwrap();
    assert_eq!(reloaded.defaults.system_prompt.as_deref(), Some("new"));
}

#[test]
fn test_save_overwrites_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(Settings::load_from(&path).is_err());
    Settings::default().save_to(&path).unwrap();
    assert!(Settings::load_from(&path).is_ok());
}

#[test]
fn test_legacy_openai_endpoint_is_migrated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        json!({"providers": {"openai": {"base_url": "https://gateway.example/v1/chat/completions"}}})
            .to_string(),
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(
        settings.get_base_url(Vendor::OpenAi).as_deref(),
        Some("https://gateway.example/v1/responses")
    );
}

#[test]
fn test_credentials_from_config() {
    let mut settings = isolated();
    assert!(!settings.is_provider_configured(Vendor::Google));

    settings.providers.google.api_key = Some("your-api-key".into());
    assert!(!settings.is_provider_configured(Vendor::Google));

    settings.providers.google.api_key = Some("AIza-real".into());
    assert_eq!(settings.get_api_key(Vendor::Google).as_deref(), Some("AIza-real"));
    assert!(!settings.is_provider_configured(Vendor::Anthropic));

    // A relay token reaches every vendor.
    settings.providers.shoulders.token = Some("relay-token".into());
    assert!(settings.is_provider_configured(Vendor::Anthropic));
}

#[test]
fn test_environment_key_wins() {
    let mut settings = isolated();
    settings.providers.openai.api_key_env = Some("SHOULDERS_CFG_TEST_OPENAI_KEY".into());
    settings.providers.openai.api_key = Some("from-config".into());

    std::env::set_var("SHOULDERS_CFG_TEST_OPENAI_KEY", "from-env");
    assert_eq!(settings.get_api_key(Vendor::OpenAi).as_deref(), Some("from-env"));
    std::env::remove_var("SHOULDERS_CFG_TEST_OPENAI_KEY");
    assert_eq!(settings.get_api_key(Vendor::OpenAi).as_deref(), Some("from-config"));
}

#[test]
fn test_model_entry_round_trips_through_json() {
    let settings = Settings::default();
    let value = serde_json::to_value(&settings).unwrap();
    assert_eq!(value["models"][3]["provider"], "openai");
    assert!(value["models"][0].get("thinking").is_none());

    let parsed: Settings = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.models, settings.models);
}

#[test]
fn test_settings_drive_access_resolution() {
    use shoulders::chat::interfaces::{AccessRequest, AccessResolver};
    use shoulders::chat::SettingsAccessResolver;

    let mut settings = isolated();
    settings.providers.google.api_key = Some("AIza-real".into());
    settings.providers.google.base_url = Some("http://localhost:8080/models".into());
    settings.providers.shoulders.token = Some("relay-token".into());
    let resolver = SettingsAccessResolver::new(settings);

    let flash = tokio_test::block_on(resolver.resolve(&AccessRequest::Model("gemini-flash".into())))
        .unwrap();
    assert_eq!(flash.vendor, Vendor::Google);
    assert_eq!(flash.endpoint.as_deref(), Some("http://localhost:8080/models"));
    assert_eq!(flash.thinking, Some(ThinkingLevel::Medium));

    // No Anthropic key, so Sonnet goes through the relay.
    let sonnet =
        tokio_test::block_on(resolver.resolve(&AccessRequest::Model("sonnet".into()))).unwrap();
    assert_eq!(sonnet.vendor, Vendor::Shoulders);
    assert_eq!(sonnet.vendor_hint, Some(Vendor::Anthropic));
    assert_eq!(sonnet.api_key, "relay-token");
}
