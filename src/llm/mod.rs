// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM plumbing
//!
//! Vendor request formats, stream parsing, usage and pricing, and the
//! transports that carry requests.

pub mod budget;
pub mod event;
pub mod http;
pub mod message;
pub mod mock_transport;
pub mod oneshot;
pub mod pricing;
pub mod provider;
pub mod providers;
pub mod spend;
pub mod sse;
pub mod thinking;
pub mod usage;

pub use event::{BlockKind, NormalizedEvent, StopReason};
pub use message::{ContentBlock, Role, WireContent, WireMessage};
pub use provider::{FormattedRequest, RequestOptions, ToolChoice, ToolDefinition};
pub use providers::{Provider, Vendor};
pub use usage::UsageSnapshot;
