// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Scripted transport for testing
//!
//! Replies are queued up front and played back in order, one per request.
//! Every request and abort is recorded so tests can assert on what the
//! engine sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::chat::interfaces::{SessionKey, Transport, TransportSink};
use crate::error::ApiError;
use crate::llm::provider::FormattedRequest;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Deliver the chunks, then finish
    Stream { chunks: Vec<Vec<u8>>, finish: bool },
    /// Fail the request
    Fail(ApiError),
}

impl MockReply {
    /// SSE stream of JSON records, finished by the transport
    pub fn sse(records: Vec<Value>) -> Self {
        let body: String = records
            .iter()
            .map(|record| format!("data: {}\n\n", record))
            .collect();
        MockReply::Stream {
            chunks: vec![body.into_bytes()],
            finish: true,
        }
    }

    /// Deliver the chunks and keep the request open
    pub fn hold(chunks: Vec<Vec<u8>>) -> Self {
        MockReply::Stream {
            chunks,
            finish: false,
        }
    }

    /// Anthropic-shaped stream answering with plain text
    pub fn anthropic_text(text: &str) -> Self {
        Self::sse(vec![
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 10, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}}),
            json!({"type": "message_stop"}),
        ])
    }

    /// Anthropic-shaped stream requesting tool calls `(id, name, input json)`
    pub fn anthropic_tool_use(calls: &[(&str, &str, &str)]) -> Self {
        let mut records = vec![json!({
            "type": "message_start",
            "message": {"usage": {"input_tokens": 20, "output_tokens": 1}}
        })];
        for (index, (id, name, input)) in calls.iter().enumerate() {
            records.push(json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
            }));
            records.push(json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": input}
            }));
            records.push(json!({"type": "content_block_stop", "index": index}));
        }
        records.push(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use"},
            "usage": {"output_tokens": 12}
        }));
        records.push(json!({"type": "message_stop"}));
        Self::sse(records)
    }
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    requests: Vec<(SessionKey, FormattedRequest)>,
    aborts: Vec<Uuid>,
    /// Requests left open by `MockReply::hold`
    held: Vec<TransportSink>,
}

/// A transport that plays back scripted replies
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies, returned in order
    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        self.state().replies.extend(replies);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.state().replies.push_back(reply);
    }

    /// Requests sent so far
    pub fn requests(&self) -> Vec<FormattedRequest> {
        self.state()
            .requests
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Keys of requests sent so far
    pub fn keys(&self) -> Vec<SessionKey> {
        self.state().requests.iter().map(|(key, _)| *key).collect()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn aborts(&self) -> Vec<Uuid> {
        self.state().aborts.clone()
    }

    /// Sink of the most recent held request
    pub fn held_sink(&self) -> Option<TransportSink> {
        self.state().held.last().cloned()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock transport state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Transport for MockTransport {
    fn send(&self, request: FormattedRequest, sink: TransportSink) {
        let reply = {
            let mut state = self.state();
            state.requests.push((sink.key(), request));
            state.replies.pop_front()
        };

        match reply {
            Some(MockReply::Stream { chunks, finish }) => {
                for chunk in chunks {
                    sink.on_chunk(chunk);
                }
                if finish {
                    sink.on_done(false);
                } else {
                    self.state().held.push(sink);
                }
            }
            Some(MockReply::Fail(error)) => sink.on_error(error),
            None => {
                tracing::warn!("Mock transport has no scripted reply left");
                sink.on_error(ApiError::InvalidResponse("no scripted reply".into()));
            }
        }
    }

    fn abort(&self, session_id: Uuid) {
        let mut state = self.state();
        state.aborts.push(session_id);
        let (aborted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.held)
            .into_iter()
            .partition(|sink| sink.key().session_id == session_id);
        state.held = kept;
        drop(state);
        for sink in aborted {
            sink.on_done(true);
        }
    }
}
