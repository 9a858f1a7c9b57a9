// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shoulders::chat::engine::{EngineOptions, SendOutcome, SessionEngine, SessionObserver};
use shoulders::chat::interfaces::NoToolExecutor;
use shoulders::chat::session::{MessageStatus, Session, SessionStatus, ToolCall};
use shoulders::chat::snapshot::SessionSnapshot;
use shoulders::chat::SettingsAccessResolver;
use shoulders::cli::SessionOptions;
use shoulders::config::Settings;
use shoulders::error::{Result, ShouldersError};
use shoulders::llm::http::HttpTransport;
use shoulders::llm::pricing::format_cost;
use shoulders::llm::spend::SpendLedger;
use uuid::Uuid;

/// Streams engine callbacks to the terminal.
pub(super) struct TerminalObserver {
    pub show_thinking: bool,
    thinking_open: bool,
}

impl TerminalObserver {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            thinking_open: false,
        }
    }
}

impl SessionObserver for TerminalObserver {
    fn on_text_delta(&mut self, _session_id: Uuid, text: &str) {
        if self.thinking_open {
            eprintln!();
            self.thinking_open = false;
        }
        print!("{}", text);
        let _ = io::stdout().flush();
    }

    fn on_thinking_delta(&mut self, _session_id: Uuid, text: &str) {
        if self.show_thinking {
            self.thinking_open = true;
            eprint!("{}", text);
        }
    }

    fn on_status_change(&mut self, session_id: Uuid, status: SessionStatus) {
        tracing::debug!(target: "shoulders.cli", session_id = %session_id, status = ?status, "status");
    }

    fn on_tool_result(&mut self, _session_id: Uuid, call: &ToolCall) {
        eprintln!(
            "\n[tool {} {}]",
            call.name,
            if call.is_error() { "failed" } else { "done" }
        );
    }

    fn on_balance_update(&mut self, credits: f64) {
        tracing::debug!(target: "shoulders.cli", credits, "relay balance");
    }

    fn on_loop_cap_reached(&mut self, _session_id: Uuid, depth: u32) {
        eprintln!("\n[stopped after {} tool rounds]", depth);
    }
}

pub(super) struct ChatRuntime {
    pub engine: SessionEngine,
    pub session_id: Uuid,
}

/// Wire settings, transport and the resumed or new session into an engine.
pub(super) fn initialize_chat_runtime(
    settings: &Settings,
    options: &SessionOptions,
    show_thinking: bool,
) -> Result<ChatRuntime> {
    let transport = HttpTransport::new(Duration::from_secs(settings.engine.request_timeout_secs))?;
    let resolver = SettingsAccessResolver::new(settings.clone());

    let mut engine_options = EngineOptions::from_settings(settings);
    if let Some(system) = &options.system {
        engine_options.system_prompt = Some(system.clone());
    }

    let ledger_path = SpendLedger::default_path();
    let mut engine = SessionEngine::new(
        Arc::new(transport),
        Arc::new(NoToolExecutor),
        Arc::new(resolver),
    )
    .with_options(engine_options)
    .with_ledger(SpendLedger::load_from(&ledger_path), Some(ledger_path))
    .with_observer(Box::new(TerminalObserver::new(show_thinking)));

    let session = match &options.resume {
        Some(path) => {
            let path = Settings::session_file(path);
            let mut session = SessionSnapshot::load_from(&path)?.rehydrate();
            if let Some(model) = &options.model {
                session.model_id = model.clone();
            }
            session
        }
        None => {
            let model = options
                .model
                .clone()
                .or_else(|| settings.default_model_id())
                .ok_or_else(|| ShouldersError::Config("no models configured".into()))?;
            Session::new(model)
        }
    };
    let session_id = engine.insert_session(session);

    Ok(ChatRuntime { engine, session_id })
}

/// Send one message and stream the reply. Ctrl+C aborts the turn.
pub(super) async fn run_turn(runtime: &mut ChatRuntime, text: String, verbose: u8) -> Result<()> {
    let id = runtime.session_id;
    let outcome = runtime.engine.send(id, text).await?;

    if let SendOutcome::Streaming { .. } = outcome {
        while runtime
            .engine
            .session(id)
            .is_some_and(|session| session.status.is_busy())
        {
            let interrupted = tokio::select! {
                _ = runtime.engine.process_next() => false,
                _ = tokio::signal::ctrl_c() => true,
            };
            if interrupted {
                runtime.engine.abort(id)?;
            }
        }
    }
    println!();

    let Some(session) = runtime.engine.session(id) else {
        return Ok(());
    };
    if let Some(last) = session.last_assistant() {
        match last.status {
            MessageStatus::Error => {
                let reason = last.content.rsplit("\n\n").next().unwrap_or_default();
                eprintln!("{}", reason);
            }
            MessageStatus::Aborted => eprintln!("[aborted]"),
            MessageStatus::Streaming | MessageStatus::Complete => {}
        }
        if verbose > 0 {
            if let Some(usage) = last.usage {
                eprintln!(
                    "[{} in / {} out, {}; session {}]",
                    usage.input_total,
                    usage.output,
                    format_cost(usage.cost),
                    format_cost(session.usage.cost)
                );
            }
        }
    }
    Ok(())
}

/// Save the session if a path was given.
pub(super) fn save_session(runtime: &ChatRuntime, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let path = Settings::session_file(path);
    if let Some(snapshot) = runtime.engine.snapshot(runtime.session_id) {
        snapshot.save_to(&path)?;
        eprintln!("Session saved to {}", path.display());
    }
    Ok(())
}
