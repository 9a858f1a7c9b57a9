// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat sessions
//!
//! The session data model, the streaming accumulator and the engine that
//! drives sessions through the send / stream / tool loop.

pub mod access;
pub mod engine;
pub mod interfaces;
pub mod session;
pub mod snapshot;
pub mod streaming;

pub use access::SettingsAccessResolver;
pub use engine::{
    BlockReason, EngineOptions, NoopSessionObserver, SendOutcome, SessionEngine, SessionObserver,
};
pub use interfaces::{
    Access, AccessRequest, AccessResolver, FallbackStrategy, NoToolExecutor, SessionKey,
    ToolExecutor, Transport, TransportSink,
};
pub use session::{Message, MessageStatus, Session, SessionStatus, ToolCall, ToolCallStatus};
pub use snapshot::SessionSnapshot;
