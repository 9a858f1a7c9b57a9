// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::{Component, Path, PathBuf};

use crate::error::Result;

use super::migration;
use super::Settings;

impl Settings {
    /// Get the default settings file path.
    pub fn default_path() -> PathBuf {
        Self::shoulders_home().join("settings.json")
    }

    /// Load settings from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let raw_value: serde_json::Value = serde_json::from_str(&content)?;
        let migrated = migration::migrate_on_load(raw_value);
        let settings: Settings = serde_json::from_value(migrated)?;
        Ok(settings)
    }

    /// Save settings to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save settings to a specific path, merging with existing file content
    /// to preserve unknown keys from other versions or hand edits.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let new_value = serde_json::to_value(self)?;

        let merged = if path.exists() {
            let existing_content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<serde_json::Value>(&existing_content) {
                Ok(existing_value) => migration::deep_merge(existing_value, new_value),
                Err(_) => new_value, // Corrupt file, overwrite entirely.
            }
        } else {
            new_value
        };

        let content = serde_json::to_string_pretty(&merged)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the Shoulders home directory (~/.shoulders or $SHOULDERS_HOME).
    pub fn shoulders_home() -> PathBuf {
        if let Ok(home) = std::env::var("SHOULDERS_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shoulders")
    }

    /// Directory where the CLI keeps saved session snapshots.
    pub fn sessions_dir() -> PathBuf {
        Self::shoulders_home().join("sessions")
    }

    /// Where a session file argument points. A bare file name lives in
    /// `sessions_dir`; a path with a directory part is used as given.
    pub fn session_file(name: &Path) -> PathBuf {
        resolve_session_file(&Self::sessions_dir(), name)
    }
}

fn resolve_session_file(sessions_dir: &Path, name: &Path) -> PathBuf {
    let mut components = name.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => sessions_dir.join(name),
        _ => name.to_path_buf(),
    }
}
