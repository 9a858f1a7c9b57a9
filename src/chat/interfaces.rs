// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Collaborators the session engine talks to
//!
//! The engine never performs I/O itself: requests go through a [`Transport`],
//! tool calls through a [`ToolExecutor`] and credentials come from an
//! [`AccessResolver`].

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AccessError, ApiError, Result, ShouldersError};
use crate::llm::provider::FormattedRequest;
use crate::llm::providers::{Provider, Vendor};
use crate::llm::thinking::ThinkingLevel;

/// Identifies one request: the session plus the generation it was sent in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub session_id: Uuid,
    pub generation: u64,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.generation)
    }
}

/// What the transport reports for a request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportPayload {
    Chunk(Vec<u8>),
    /// The stream ended; `aborted` when it was cancelled
    Done { aborted: bool },
    Error(ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub key: SessionKey,
    pub payload: TransportPayload,
}

/// Delivery handle a transport uses for one request
#[derive(Debug, Clone)]
pub struct TransportSink {
    key: SessionKey,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportSink {
    pub fn new(key: SessionKey, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn on_chunk(&self, bytes: impl Into<Vec<u8>>) {
        self.deliver(TransportPayload::Chunk(bytes.into()));
    }

    pub fn on_done(&self, aborted: bool) {
        self.deliver(TransportPayload::Done { aborted });
    }

    pub fn on_error(&self, error: ApiError) {
        self.deliver(TransportPayload::Error(error));
    }

    fn deliver(&self, payload: TransportPayload) {
        let event = TransportEvent {
            key: self.key,
            payload,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(
                target: "shoulders.transport",
                key = %self.key,
                "engine dropped, transport event discarded"
            );
        }
    }
}

/// Performs requests and streams their bytes back through a sink.
///
/// `send` must not block: implementations start the request and return.
pub trait Transport: Send + Sync {
    fn send(&self, request: FormattedRequest, sink: TransportSink);

    /// Stop the in-flight request of a session, if any.
    fn abort(&self, session_id: Uuid);
}

/// Runs tools on behalf of the model
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one tool. An `Err` becomes error output for the model.
    async fn execute(&self, name: &str, input: &Value) -> Result<String>;
}

/// Executor for callers without a tool catalog; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToolExecutor;

#[async_trait]
impl ToolExecutor for NoToolExecutor {
    async fn execute(&self, name: &str, _input: &Value) -> Result<String> {
        Err(ShouldersError::ToolExecution(format!(
            "no tool named '{}' is available",
            name
        )))
    }
}

/// Named fallback lists for calls that do not pick a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Fast small models for inline suggestions
    Ghost,
    /// Cheapest model the user can reach
    Cheapest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequest {
    /// A catalog model id
    Model(String),
    Strategy(FallbackStrategy),
}

/// Everything needed to call a model
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    /// Endpoint override; the vendor default when None
    pub endpoint: Option<String>,
    pub api_key: String,
    pub vendor: Vendor,
    /// Inner vendor when `vendor` is the relay
    pub vendor_hint: Option<Vendor>,
    /// Provider-side model identifier
    pub model: String,
    pub context_window: Option<u32>,
    pub thinking: Option<ThinkingLevel>,
}

impl Access {
    pub fn provider(&self) -> Provider {
        Provider::new(self.vendor, self.vendor_hint)
    }

    /// Whether spend goes to the user's own key
    pub fn is_direct(&self) -> bool {
        self.vendor != Vendor::Shoulders
    }
}

/// Supplies credentials for a model or strategy
#[async_trait]
pub trait AccessResolver: Send + Sync {
    async fn resolve(&self, request: &AccessRequest) -> std::result::Result<Access, AccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_delivers_keyed_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = SessionKey {
            session_id: Uuid::new_v4(),
            generation: 3,
        };
        let sink = TransportSink::new(key, tx);
        sink.on_chunk(b"data: {}\n".to_vec());
        sink.on_done(false);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key, key);
        assert_eq!(first.payload, TransportPayload::Chunk(b"data: {}\n".to_vec()));
        assert_eq!(
            rx.recv().await.unwrap().payload,
            TransportPayload::Done { aborted: false }
        );
    }

    #[test]
    fn test_sink_tolerates_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = TransportSink::new(
            SessionKey {
                session_id: Uuid::nil(),
                generation: 1,
            },
            tx,
        );
        sink.on_error(ApiError::Timeout);
    }

    #[tokio::test]
    async fn test_no_tool_executor_fails() {
        let err = NoToolExecutor
            .execute("search", &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("search"));
    }

    #[test]
    fn test_access_provider() {
        let access = Access {
            endpoint: None,
            api_key: "t".into(),
            vendor: Vendor::Shoulders,
            vendor_hint: Some(Vendor::OpenAi),
            model: "gpt-5.2".into(),
            context_window: None,
            thinking: None,
        };
        assert_eq!(
            access.provider(),
            Provider::Relay {
                hint: Vendor::OpenAi
            }
        );
        assert!(!access.is_direct());
    }
}
