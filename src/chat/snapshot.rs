// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Persisted form of a session
//!
//! Snapshots carry the conversation only. Runtime state (status, in-flight
//! turn, background flag) is reset when a snapshot is turned back into a
//! session.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::engine::ABORTED_MARKER;
use crate::chat::session::{Message, MessageStatus, Session, SessionStatus, ToolCallStatus};
use crate::error::{Result, ShouldersError};
use crate::llm::usage::UsageSnapshot;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub id: Uuid,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub usage: UsageSnapshot,
    #[serde(default)]
    pub token_estimate: u64,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(session: &Session) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            id: session.id,
            model_id: session.model_id.clone(),
            label: session.label.clone(),
            messages: session.messages.clone(),
            usage: session.usage,
            token_estimate: session.token_estimate,
            created_at: session.created_at,
            saved_at: Utc::now(),
        }
    }

    /// Turn the snapshot back into an idle session.
    ///
    /// A message captured mid-stream comes back aborted, and tool calls that
    /// never finished come back as errors.
    pub fn rehydrate(self) -> Session {
        let mut messages = self.messages;
        for message in &mut messages {
            if message.status == MessageStatus::Streaming {
                message.status = MessageStatus::Aborted;
                message.content.push_str(ABORTED_MARKER);
            }
            for call in &mut message.tool_calls {
                if matches!(call.status, ToolCallStatus::Pending | ToolCallStatus::Running) {
                    call.status = ToolCallStatus::Error;
                    call.output.get_or_insert_with(|| "Interrupted".to_string());
                }
            }
        }

        let mut session = Session::new(self.model_id);
        session.id = self.id;
        session.label = self.label;
        session.messages = messages;
        session.status = SessionStatus::Idle;
        session.token_estimate = self.token_estimate;
        session.created_at = self.created_at;
        session.recompute_usage();
        session
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: SessionSnapshot = serde_json::from_str(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ShouldersError::Session(format!(
                "session file version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}
