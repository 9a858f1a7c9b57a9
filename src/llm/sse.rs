// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Server-sent event framing
//!
//! Transport chunks split records at arbitrary byte offsets, including inside
//! a multi-byte character, so framing works on bytes and only decodes complete
//! lines.

use serde_json::Value;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One complete record from the stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseRecord {
    /// A `data:` line holding a JSON payload
    Json(Value),
    /// The `data: [DONE]` terminator
    Done,
}

/// Bytes held back between chunks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarryOver {
    /// Trailing bytes not yet terminated by a newline
    partial: Vec<u8>,
    /// A complete data line whose JSON did not parse, awaiting one retry
    failed: Option<Vec<u8>>,
}

impl CarryOver {
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty() && self.failed.is_none()
    }

    /// Flush at end of stream: an unterminated final line is parsed as if a
    /// newline had arrived.
    pub fn finish(self) -> Vec<SseRecord> {
        let mut records = Vec::new();
        let mut failed = self.failed;
        if !self.partial.is_empty() {
            process_line(&self.partial, &mut failed, &mut records);
        }
        if failed.is_some() {
            tracing::warn!(
                target: "shoulders.provider",
                "dropping unparseable SSE line at end of stream"
            );
        }
        records
    }
}

/// Split raw bytes into records, carrying incomplete input forward.
pub fn parse_chunk(raw: &[u8], carry_over: CarryOver) -> (Vec<SseRecord>, CarryOver) {
    let CarryOver { mut partial, mut failed } = carry_over;
    partial.extend_from_slice(raw);

    let mut records = Vec::new();
    let mut start = 0;
    while let Some(offset) = partial[start..].iter().position(|&b| b == b'\n') {
        let end = start + offset;
        process_line(&partial[start..end], &mut failed, &mut records);
        start = end + 1;
    }

    let rest = partial.split_off(start);
    (
        records,
        CarryOver {
            partial: rest,
            failed,
        },
    )
}

fn process_line(line: &[u8], failed: &mut Option<Vec<u8>>, records: &mut Vec<SseRecord>) {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return;
    }

    if let Some(previous) = failed.take() {
        let mut joined = previous;
        joined.extend_from_slice(line);
        match parse_line(&joined) {
            LineOutcome::Record(record) => {
                records.push(record);
                return;
            }
            LineOutcome::Ignored => return,
            LineOutcome::Invalid => {
                tracing::warn!(
                    target: "shoulders.provider",
                    bytes = joined.len(),
                    "dropping unparseable SSE line after retry"
                );
            }
        }
    }

    match parse_line(line) {
        LineOutcome::Record(record) => records.push(record),
        LineOutcome::Ignored => {}
        LineOutcome::Invalid => *failed = Some(line.to_vec()),
    }
}

enum LineOutcome {
    Record(SseRecord),
    Ignored,
    Invalid,
}

fn parse_line(line: &[u8]) -> LineOutcome {
    // `event:`, `id:` and `:` comment lines carry nothing the interpreters need.
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Ignored;
    };
    let Ok(payload) = std::str::from_utf8(payload) else {
        return LineOutcome::Invalid;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return LineOutcome::Ignored;
    }
    if payload == DONE_SENTINEL {
        return LineOutcome::Record(SseRecord::Done);
    }
    match serde_json::from_str(payload) {
        Ok(value) => LineOutcome::Record(SseRecord::Json(value)),
        Err(_) => LineOutcome::Invalid,
    }
}
