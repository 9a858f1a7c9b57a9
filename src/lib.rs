// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shoulders - streaming multi-provider inference sessions.
//!
//! This crate exposes the runtime used by the `shoulders` CLI (`src/main.rs`):
//! - `llm`: vendor request formats, SSE parsing, usage normalization, pricing
//! - `chat`: session model, stream accumulation and the session engine
//! - `config`: settings file, model catalog and credentials
//! - `cli`: command-line argument definitions

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;

pub use error::{Result, ShouldersError};
