// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Monthly spend on the user's own keys
//!
//! Relay spend is billed by the relay and never recorded here. The ledger
//! resets when the calendar month changes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::Result;

/// Message shown when a send is refused by the monthly limit
pub const BUDGET_REACHED_MESSAGE: &str =
    "Monthly budget reached. Change your budget in Settings > Models to continue.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendLedger {
    /// `YYYY-MM` the total belongs to
    month: String,
    /// USD spent on direct calls this month
    direct_usd: f64,
}

impl Default for SpendLedger {
    fn default() -> Self {
        Self::for_month(Utc::now())
    }
}

fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

impl SpendLedger {
    pub fn for_month(now: DateTime<Utc>) -> Self {
        Self {
            month: month_key(now),
            direct_usd: 0.0,
        }
    }

    pub fn default_path() -> PathBuf {
        Settings::shoulders_home().join("spend.json")
    }

    /// Load the ledger; a missing or unreadable file starts a fresh month.
    pub fn load_from(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<SpendLedger>(&content).ok());
        match loaded {
            Some(ledger) => ledger,
            None => {
                if path.exists() {
                    tracing::warn!(
                        target: "shoulders.budget",
                        path = %path.display(),
                        "spend ledger unreadable, starting fresh"
                    );
                }
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        let current = month_key(now);
        if self.month != current {
            tracing::info!(
                target: "shoulders.budget",
                previous = %self.month,
                spent = self.direct_usd,
                "new month, spend ledger reset"
            );
            self.month = current;
            self.direct_usd = 0.0;
        }
    }

    /// Spend so far in the month of `now`. A stale month reads as zero;
    /// the reset itself happens on the next `record`.
    pub fn spent_at(&self, now: DateTime<Utc>) -> f64 {
        if self.month == month_key(now) {
            self.direct_usd
        } else {
            0.0
        }
    }

    pub fn spent(&self) -> f64 {
        self.spent_at(Utc::now())
    }

    pub fn record_at(&mut self, cost: f64, now: DateTime<Utc>) {
        self.roll_over(now);
        if cost > 0.0 {
            self.direct_usd += cost;
        }
    }

    pub fn record(&mut self, cost: f64) {
        self.record_at(cost, Utc::now());
    }

    /// Whether spend has reached `limit`
    pub fn exceeds(&self, limit: Option<f64>) -> bool {
        match limit {
            Some(limit) => self.spent() >= limit,
            None => false,
        }
    }
}
