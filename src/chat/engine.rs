// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session engine
//!
//! Owns every live session and drives the send / stream / tool loop. The
//! engine is single-threaded: transport bytes and tool results arrive on
//! channels and are applied one at a time by [`SessionEngine::process_next`],
//! so a session is only ever mutated from here.
//!
//! Every request is tagged with a [`SessionKey`]. A session keeps at most one
//! listener key; events for any other key are either late usage for a turn
//! that already settled (same generation) or stale (older generation) and
//! are dropped.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chat::interfaces::{
    AccessRequest, AccessResolver, SessionKey, ToolExecutor, Transport, TransportEvent,
    TransportPayload, TransportSink,
};
use crate::chat::session::{
    Message, MessageStatus, Session, SessionStatus, ToolCall, ToolCallStatus, ToolResult,
};
use crate::chat::snapshot::SessionSnapshot;
use crate::chat::streaming::{TurnAccumulator, TurnSignal};
use crate::config::Settings;
use crate::error::{
    format_chat_error, no_api_key_message, offline_message, AccessError, ApiError, Result,
    ShouldersError,
};
use crate::llm::budget::{fit_to_budget, prompt_budget};
use crate::llm::event::{NormalizedEvent, StopReason};
use crate::llm::pricing;
use crate::llm::provider::{RequestOptions, ToolDefinition, DEFAULT_MAX_TOKENS};
use crate::llm::providers::Provider;
use crate::llm::spend::{SpendLedger, BUDGET_REACHED_MESSAGE};
use crate::llm::sse::CarryOver;
use crate::llm::thinking::select_reasoning;

/// Appended to a message whose turn was stopped by the user
pub const ABORTED_MARKER: &str = "\n\n*[Aborted]*";

const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

/// Callbacks for UI layers. All methods default to no-ops.
pub trait SessionObserver: Send {
    fn on_text_delta(&mut self, _session_id: Uuid, _text: &str) {}

    fn on_thinking_delta(&mut self, _session_id: Uuid, _text: &str) {}

    fn on_status_change(&mut self, _session_id: Uuid, _status: SessionStatus) {}

    /// A tool call finished, successfully or not.
    fn on_tool_result(&mut self, _session_id: Uuid, _call: &ToolCall) {}

    /// Relay credit balance reported mid-stream
    fn on_balance_update(&mut self, _credits: f64) {}

    /// A background session settled and was removed from the engine.
    fn on_background_finished(&mut self, _snapshot: SessionSnapshot) {}

    /// A send chain was stopped at the tool-loop cap.
    fn on_loop_cap_reached(&mut self, _session_id: Uuid, _depth: u32) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionObserver;

impl SessionObserver for NoopSessionObserver {}

/// Per-engine request settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub system_prompt: Option<String>,
    /// Tool catalog advertised on every request
    pub tools: Vec<ToolDefinition>,
    pub max_tool_loop_depth: Option<u32>,
    pub default_context_window: u32,
    pub max_tokens: u32,
    pub monthly_limit_usd: Option<f64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            tools: Vec::new(),
            max_tool_loop_depth: None,
            default_context_window: DEFAULT_CONTEXT_WINDOW,
            max_tokens: DEFAULT_MAX_TOKENS,
            monthly_limit_usd: None,
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            system_prompt: settings.defaults.system_prompt.clone(),
            tools: Vec::new(),
            max_tool_loop_depth: settings.engine.max_tool_loop_depth,
            default_context_window: settings.engine.default_context_window,
            max_tokens: settings.engine.max_tokens,
            monthly_limit_usd: settings.budget.limit(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Why a send did not reach the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    BudgetExceeded,
    NoCredentials,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A request is in flight under this generation
    Streaming { generation: u64 },
    /// An error message was appended instead; the session is idle
    Blocked(BlockReason),
}

/// The request currently or most recently streamed for a session
#[derive(Debug)]
struct Turn {
    key: SessionKey,
    /// Index of the assistant message this turn writes to
    message_index: usize,
    provider: Provider,
    model: String,
    direct: bool,
    accumulator: TurnAccumulator,
    carry_over: CarryOver,
    settled: bool,
    /// Cost already recorded in the spend ledger
    recorded_cost: f64,
}

#[derive(Debug)]
struct SessionSlot {
    session: Session,
    generation: u64,
    /// Key whose events drive the session; None once the turn settled
    listener: Option<SessionKey>,
    turn: Option<Turn>,
    /// Tool rounds in the current send chain
    loop_depth: u32,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session,
            generation: 0,
            listener: None,
            turn: None,
            loop_depth: 0,
        }
    }
}

#[derive(Debug)]
struct ToolOutcome {
    index: usize,
    result: Result<String>,
}

#[derive(Debug)]
struct ToolBatch {
    key: SessionKey,
    outcomes: Vec<ToolOutcome>,
}

/// Drives sessions against a transport, a tool executor and an access
/// resolver.
pub struct SessionEngine {
    sessions: HashMap<Uuid, SessionSlot>,
    transport: Arc<dyn Transport>,
    tools: Arc<dyn ToolExecutor>,
    access: Arc<dyn AccessResolver>,
    observer: Box<dyn SessionObserver>,
    options: EngineOptions,
    ledger: SpendLedger,
    ledger_path: Option<PathBuf>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    tool_tx: mpsc::UnboundedSender<ToolBatch>,
    tool_rx: mpsc::UnboundedReceiver<ToolBatch>,
    /// Turns whose tool calls are waiting to be dispatched
    dispatch: VecDeque<SessionKey>,
}

impl SessionEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        tools: Arc<dyn ToolExecutor>,
        access: Arc<dyn AccessResolver>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (tool_tx, tool_rx) = mpsc::unbounded_channel();
        Self {
            sessions: HashMap::new(),
            transport,
            tools,
            access,
            observer: Box::new(NoopSessionObserver),
            options: EngineOptions::default(),
            ledger: SpendLedger::default(),
            ledger_path: None,
            transport_tx,
            transport_rx,
            tool_tx,
            tool_rx,
            dispatch: VecDeque::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a spend ledger, saved to `path` after every recorded cost.
    pub fn with_ledger(mut self, ledger: SpendLedger, path: Option<PathBuf>) -> Self {
        self.ledger = ledger;
        self.ledger_path = path;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Direct spend recorded this month
    pub fn spent(&self) -> f64 {
        self.ledger.spent()
    }

    pub fn create_session(&mut self, model_id: impl Into<String>) -> Uuid {
        self.insert_session(Session::new(model_id))
    }

    /// Adopt an existing session, e.g. one rehydrated from a snapshot.
    pub fn insert_session(&mut self, mut session: Session) -> Uuid {
        session.status = SessionStatus::Idle;
        let id = session.id;
        self.sessions.insert(id, SessionSlot::new(session));
        id
    }

    pub fn session(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.get(&session_id).map(|slot| &slot.session)
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.keys().copied().collect()
    }

    pub fn snapshot(&self, session_id: Uuid) -> Option<SessionSnapshot> {
        self.session(session_id).map(SessionSnapshot::capture)
    }

    /// Current generation of a session; bumps on every request and abort.
    pub fn generation(&self, session_id: Uuid) -> Option<u64> {
        self.sessions.get(&session_id).map(|slot| slot.generation)
    }

    /// Remove a session, aborting its request first.
    pub fn remove_session(&mut self, session_id: Uuid) -> Option<Session> {
        if self
            .session(session_id)
            .is_some_and(|session| session.status.is_busy())
        {
            self.transport.abort(session_id);
        }
        self.sessions.remove(&session_id).map(|slot| slot.session)
    }

    /// Mark a session as running in the background. An idle background
    /// session is handed to the observer and removed right away.
    pub fn set_background(&mut self, session_id: Uuid, background: bool) -> Result<()> {
        let slot = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        slot.session.background = background;
        self.finish_if_background(session_id);
        Ok(())
    }

    /// Send a user message and start streaming the reply.
    pub async fn send(&mut self, session_id: Uuid, text: impl Into<String>) -> Result<SendOutcome> {
        let text = text.into();
        let slot = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        if !slot.session.status.accepts_send() {
            return Err(ShouldersError::Session(format!(
                "session {} is busy ({:?})",
                session_id, slot.session.status
            )));
        }

        if self.ledger.exceeds(self.options.monthly_limit_usd) {
            tracing::info!(
                target: "shoulders.budget",
                session_id = %session_id,
                limit = self.options.monthly_limit_usd.unwrap_or_default(),
                "send refused, monthly budget reached"
            );
            slot.session
                .messages
                .push(Message::assistant_error(BUDGET_REACHED_MESSAGE));
            return Ok(SendOutcome::Blocked(BlockReason::BudgetExceeded));
        }

        if slot.session.messages.is_empty() && slot.session.label.is_none() {
            slot.session.label = Session::label_from(&text);
        }
        slot.session.messages.push(Message::user(text));
        slot.loop_depth = 0;

        self.start_turn(session_id).await
    }

    /// Stop the session's request or tool round. The open message is kept
    /// with an aborted marker; anything still in flight is discarded when it
    /// arrives.
    pub fn abort(&mut self, session_id: Uuid) -> Result<()> {
        let slot = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        if !slot.session.status.is_busy() {
            return Ok(());
        }

        self.transport.abort(session_id);
        slot.listener = None;
        slot.generation += 1;
        self.dispatch.retain(|key| key.session_id != session_id);

        if let Some(turn) = slot.turn.as_mut() {
            if let Some(message) = slot.session.messages.get_mut(turn.message_index) {
                turn.accumulator.finish(message);
                if matches!(
                    message.status,
                    MessageStatus::Streaming | MessageStatus::Complete
                ) {
                    message.status = MessageStatus::Aborted;
                    message.content.push_str(ABORTED_MARKER);
                }
                for call in &mut message.tool_calls {
                    if matches!(call.status, ToolCallStatus::Pending | ToolCallStatus::Running) {
                        call.status = ToolCallStatus::Error;
                        call.output = Some("Aborted".to_string());
                    }
                }
            }
            turn.settled = true;
            record_usage(slot, &mut self.ledger, self.ledger_path.as_ref());
        }

        tracing::info!(
            target: "shoulders.engine",
            session_id = %session_id,
            generation = slot.generation,
            "session aborted"
        );
        set_status(self.observer.as_mut(), slot, SessionStatus::Idle);
        self.finish_if_background(session_id);
        Ok(())
    }

    /// Apply the next queued event: a tool dispatch, transport event or tool
    /// result. Waits when nothing is queued.
    pub async fn process_next(&mut self) {
        if let Some(key) = self.dispatch.pop_front() {
            self.dispatch_tools(key);
            return;
        }

        tokio::select! {
            biased;
            Some(event) = self.transport_rx.recv() => self.handle_transport_event(event),
            Some(batch) = self.tool_rx.recv() => self.handle_tool_batch(batch).await,
        }
    }

    /// Process events until the session is neither streaming nor running
    /// tools. Returns immediately for unknown or idle sessions.
    pub async fn run_until_settled(&mut self, session_id: Uuid) {
        while self
            .session(session_id)
            .is_some_and(|session| session.status.is_busy())
        {
            self.process_next().await;
        }
    }

    /// Resolve access, fit the history and hand a request to the transport.
    async fn start_turn(&mut self, session_id: Uuid) -> Result<SendOutcome> {
        let model_id = self
            .session(session_id)
            .map(|session| session.model_id.clone())
            .ok_or_else(|| unknown_session(session_id))?;

        let resolver = Arc::clone(&self.access);
        let resolved = resolver.resolve(&AccessRequest::Model(model_id.clone())).await;

        let slot = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?;

        let access = match resolved {
            Ok(access) => access,
            Err(e) => {
                let (content, reason) = match e {
                    AccessError::NoCredentials => {
                        (no_api_key_message(&model_id), BlockReason::NoCredentials)
                    }
                    AccessError::Offline => (offline_message(), BlockReason::Offline),
                };
                tracing::info!(
                    target: "shoulders.engine",
                    session_id = %session_id,
                    model = %model_id,
                    error = %e,
                    "send blocked"
                );
                slot.session.messages.push(Message::assistant_error(content));
                set_status(self.observer.as_mut(), slot, SessionStatus::Idle);
                self.finish_if_background(session_id);
                return Ok(SendOutcome::Blocked(reason));
            }
        };

        let provider = access.provider();
        let reasoning = select_reasoning(provider.model_vendor(), &access.model, access.thinking);
        let context_window = access
            .context_window
            .unwrap_or(self.options.default_context_window);
        let system = self.options.system_prompt.as_deref();
        let fitted = fit_to_budget(
            system,
            slot.session.to_wire(),
            prompt_budget(context_window, reasoning.is_some()),
        );
        if fitted.dropped > 0 {
            tracing::debug!(
                target: "shoulders.engine",
                session_id = %session_id,
                dropped = fitted.dropped,
                estimate = fitted.estimate,
                "history truncated to fit the context window"
            );
        }
        slot.session.token_estimate = fitted.estimate;

        let mut options = RequestOptions::new(access.api_key.clone(), access.model.clone(), fitted.messages)
            .with_endpoint(access.endpoint.clone())
            .with_max_tokens(self.options.max_tokens)
            .with_tools(self.options.tools.clone())
            .with_reasoning(reasoning);
        if let Some(system) = system {
            options = options.with_system(system);
        }

        let request = match provider.format_request(&options) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    target: "shoulders.engine",
                    session_id = %session_id,
                    error = %e,
                    "request could not be formatted"
                );
                slot.session
                    .messages
                    .push(Message::assistant_error(format!("**Error:** {}", e)));
                set_status(self.observer.as_mut(), slot, SessionStatus::Error);
                self.finish_if_background(session_id);
                return Err(e);
            }
        };

        slot.generation += 1;
        let key = SessionKey {
            session_id,
            generation: slot.generation,
        };
        slot.session.messages.push(Message::streaming_assistant());
        slot.turn = Some(Turn {
            key,
            message_index: slot.session.messages.len() - 1,
            provider,
            model: access.model.clone(),
            direct: access.is_direct(),
            accumulator: TurnAccumulator::new(provider),
            carry_over: CarryOver::default(),
            settled: false,
            recorded_cost: 0.0,
        });
        slot.listener = Some(key);
        set_status(self.observer.as_mut(), slot, SessionStatus::Streaming);

        tracing::info!(
            target: "shoulders.engine",
            key = %key,
            provider = %provider,
            model = %access.model,
            estimate = fitted.estimate,
            "request sent"
        );
        self.transport
            .send(request, TransportSink::new(key, self.transport_tx.clone()));

        Ok(SendOutcome::Streaming {
            generation: key.generation,
        })
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent { key, payload } = event;
        let Some(slot) = self.sessions.get(&key.session_id) else {
            tracing::debug!(target: "shoulders.engine", key = %key, "event for unknown session dropped");
            return;
        };
        let current = slot.generation == key.generation
            && slot.turn.as_ref().is_some_and(|turn| turn.key == key);
        let listening = slot.listener == Some(key);

        if !current {
            tracing::debug!(
                target: "shoulders.engine",
                key = %key,
                generation = slot.generation,
                "stale event dropped"
            );
            return;
        }

        match payload {
            TransportPayload::Chunk(bytes) => self.handle_chunk(key, &bytes),
            TransportPayload::Done { aborted } if listening => {
                let flushed = self.flush_carry_over(key);
                self.apply_events(key, flushed);
                if self.is_listening(key) {
                    if aborted {
                        // Transport gave up on its own; treat like a user abort.
                        if let Err(e) = self.abort(key.session_id) {
                            tracing::warn!(
                                target: "shoulders.engine",
                                key = %key,
                                error = %e,
                                "abort after transport cancel failed"
                            );
                        }
                    } else {
                        self.settle_turn(key);
                    }
                }
            }
            TransportPayload::Error(error) if listening => self.fail_turn(key, error),
            TransportPayload::Done { .. } | TransportPayload::Error(_) => {
                tracing::debug!(target: "shoulders.engine", key = %key, "turn already settled");
            }
        }
    }

    fn is_listening(&self, key: SessionKey) -> bool {
        self.sessions
            .get(&key.session_id)
            .is_some_and(|slot| slot.listener == Some(key))
    }

    fn handle_chunk(&mut self, key: SessionKey, bytes: &[u8]) {
        let Some(turn) = self
            .sessions
            .get_mut(&key.session_id)
            .and_then(|slot| slot.turn.as_mut())
        else {
            return;
        };
        let carry_over = std::mem::take(&mut turn.carry_over);
        let (records, carry_over) = turn.provider.parse_chunk(bytes, carry_over);
        turn.carry_over = carry_over;
        let events = records
            .iter()
            .flat_map(|record| turn.provider.interpret_event(record))
            .collect();
        self.apply_events(key, events);
    }

    /// Records left in the carry-over when the stream ends
    fn flush_carry_over(&mut self, key: SessionKey) -> Vec<NormalizedEvent> {
        let Some(turn) = self
            .sessions
            .get_mut(&key.session_id)
            .and_then(|slot| slot.turn.as_mut())
        else {
            return Vec::new();
        };
        let provider = turn.provider;
        let records = std::mem::take(&mut turn.carry_over).finish();
        records
            .iter()
            .flat_map(|record| provider.interpret_event(record))
            .collect()
    }

    fn apply_events(&mut self, key: SessionKey, events: Vec<NormalizedEvent>) {
        for event in events {
            let Some(slot) = self.sessions.get_mut(&key.session_id) else {
                return;
            };
            if slot.listener != Some(key) {
                // Settled mid-chunk; only usage still counts.
                if let Some(raw) = event.usage() {
                    reconcile_usage(slot, raw, &mut self.ledger, self.ledger_path.as_ref());
                }
                continue;
            }
            let Some(turn) = slot.turn.as_mut() else {
                return;
            };
            let Some(message) = slot.session.messages.get_mut(turn.message_index) else {
                return;
            };

            match turn.accumulator.apply(message, event) {
                TurnSignal::None | TurnSignal::Stop(None) => {}
                TurnSignal::Text(text) => self.observer.on_text_delta(key.session_id, &text),
                TurnSignal::Thinking(text) => {
                    self.observer.on_thinking_delta(key.session_id, &text)
                }
                TurnSignal::Balance(credits) => self.observer.on_balance_update(credits),
                TurnSignal::Stop(Some(StopReason::ToolUse | StopReason::EndTurn))
                | TurnSignal::MessageStop => self.settle_turn(key),
                TurnSignal::Stop(Some(StopReason::Error)) => self.fail_turn(
                    key,
                    ApiError::InvalidResponse("provider reported a failed response".into()),
                ),
            }
        }
    }

    /// Close the turn: finalize usage, release the listener and either queue
    /// the tool calls or go idle. Only the first call per key has effect.
    fn settle_turn(&mut self, key: SessionKey) {
        let Some(slot) = self.sessions.get_mut(&key.session_id) else {
            return;
        };
        if slot.listener != Some(key) {
            return;
        }
        slot.listener = None;
        let Some(turn) = slot.turn.as_mut() else {
            return;
        };
        turn.settled = true;
        let Some(message) = slot.session.messages.get_mut(turn.message_index) else {
            return;
        };
        turn.accumulator.finish(message);
        if message.is_open() {
            message.status = MessageStatus::Complete;
        }
        let pending = message.has_pending_tools();
        record_usage(slot, &mut self.ledger, self.ledger_path.as_ref());

        tracing::debug!(
            target: "shoulders.engine",
            key = %key,
            pending_tools = pending,
            cost = slot.session.usage.cost,
            "turn settled"
        );

        if pending {
            set_status(self.observer.as_mut(), slot, SessionStatus::ToolExecution);
            self.dispatch.push_back(key);
        } else {
            set_status(self.observer.as_mut(), slot, SessionStatus::Idle);
            self.finish_if_background(key.session_id);
        }
    }

    fn fail_turn(&mut self, key: SessionKey, error: ApiError) {
        let Some(slot) = self.sessions.get_mut(&key.session_id) else {
            return;
        };
        if slot.listener != Some(key) {
            return;
        }
        slot.listener = None;

        tracing::warn!(
            target: "shoulders.engine",
            key = %key,
            kind = ?error.kind(),
            error = %error,
            "turn failed"
        );

        if let Some(turn) = slot.turn.as_mut() {
            turn.settled = true;
            if let Some(message) = slot.session.messages.get_mut(turn.message_index) {
                turn.accumulator.finish(message);
                message.content.push_str("\n\n");
                message.content.push_str(&format_chat_error(&error));
                message.status = MessageStatus::Error;
            }
            record_usage(slot, &mut self.ledger, self.ledger_path.as_ref());
        }
        set_status(self.observer.as_mut(), slot, SessionStatus::Error);
        self.finish_if_background(key.session_id);
    }

    /// Run the pending tool calls of a settled turn concurrently.
    fn dispatch_tools(&mut self, key: SessionKey) {
        let Some(slot) = self.sessions.get_mut(&key.session_id) else {
            return;
        };
        let Some(turn) = slot.turn.as_ref().filter(|turn| turn.key == key) else {
            return;
        };
        if slot.generation != key.generation
            || slot.session.status != SessionStatus::ToolExecution
        {
            return;
        }
        let Some(message) = slot.session.messages.get_mut(turn.message_index) else {
            return;
        };

        let calls: Vec<(usize, String, serde_json::Value)> = message
            .tool_calls
            .iter_mut()
            .enumerate()
            .filter(|(_, call)| call.status == ToolCallStatus::Pending)
            .map(|(index, call)| {
                call.status = ToolCallStatus::Running;
                (index, call.name.clone(), call.input.clone())
            })
            .collect();

        tracing::debug!(
            target: "shoulders.engine",
            key = %key,
            count = calls.len(),
            "dispatching tool calls"
        );

        let executor = Arc::clone(&self.tools);
        let tx = self.tool_tx.clone();
        tokio::spawn(async move {
            let indices: Vec<usize> = calls.iter().map(|(index, _, _)| *index).collect();
            let handles = calls.into_iter().map(|(_, name, input)| {
                let executor = Arc::clone(&executor);
                tokio::spawn(async move { executor.execute(&name, &input).await })
            });
            let outcomes = join_all(handles)
                .await
                .into_iter()
                .zip(indices)
                .map(|(joined, index)| ToolOutcome {
                    index,
                    result: joined.unwrap_or_else(|e| {
                        Err(ShouldersError::ToolExecution(format!("tool task failed: {}", e)))
                    }),
                })
                .collect();
            if tx.send(ToolBatch { key, outcomes }).is_err() {
                tracing::debug!(target: "shoulders.engine", key = %key, "engine dropped, tool results discarded");
            }
        });
    }

    async fn handle_tool_batch(&mut self, batch: ToolBatch) {
        let key = batch.key;
        let Some(slot) = self.sessions.get_mut(&key.session_id) else {
            return;
        };
        if slot.generation != key.generation
            || slot.session.status != SessionStatus::ToolExecution
        {
            tracing::debug!(target: "shoulders.engine", key = %key, "tool results for an aborted turn discarded");
            return;
        }
        let Some(message_index) = slot.turn.as_ref().map(|turn| turn.message_index) else {
            return;
        };
        let Some(message) = slot.session.messages.get_mut(message_index) else {
            return;
        };

        for outcome in batch.outcomes {
            let Some(call) = message.tool_calls.get_mut(outcome.index) else {
                continue;
            };
            match outcome.result {
                Ok(output) => {
                    call.output = Some(output);
                    call.status = ToolCallStatus::Done;
                }
                Err(e) => {
                    call.output = Some(tool_error_output(e));
                    call.status = ToolCallStatus::Error;
                }
            }
            self.observer.on_tool_result(key.session_id, call);
        }

        let results = message.tool_calls.iter().map(ToolResult::from_call).collect();
        slot.session.messages.push(Message::tool_results(results));
        slot.loop_depth += 1;

        if let Some(cap) = self
            .options
            .max_tool_loop_depth
            .filter(|cap| slot.loop_depth >= *cap)
        {
            tracing::warn!(
                target: "shoulders.engine",
                session_id = %key.session_id,
                depth = slot.loop_depth,
                "tool loop cap reached, stopping"
            );
            let mut note = Message::streaming_assistant();
            note.content = format!("*[Stopped after {} tool rounds]*", cap);
            note.status = MessageStatus::Complete;
            slot.session.messages.push(note);
            self.observer.on_loop_cap_reached(key.session_id, slot.loop_depth);
            set_status(self.observer.as_mut(), slot, SessionStatus::Idle);
            self.finish_if_background(key.session_id);
            return;
        }

        if let Err(e) = self.start_turn(key.session_id).await {
            tracing::warn!(
                target: "shoulders.engine",
                session_id = %key.session_id,
                error = %e,
                "tool continuation failed"
            );
        }
    }

    /// Hand a settled background session to the observer and drop it.
    fn finish_if_background(&mut self, session_id: Uuid) {
        let done = self.sessions.get(&session_id).is_some_and(|slot| {
            slot.session.background && !slot.session.status.is_busy()
        });
        if !done {
            return;
        }
        if let Some(slot) = self.sessions.remove(&session_id) {
            tracing::debug!(
                target: "shoulders.engine",
                session_id = %session_id,
                "background session finished"
            );
            self.observer
                .on_background_finished(SessionSnapshot::capture(&slot.session));
        }
    }
}

fn unknown_session(session_id: Uuid) -> ShouldersError {
    ShouldersError::Session(format!("unknown session {}", session_id))
}

fn tool_error_output(error: ShouldersError) -> String {
    match error {
        ShouldersError::ToolExecution(message) => message,
        other => other.to_string(),
    }
}

fn set_status(observer: &mut dyn SessionObserver, slot: &mut SessionSlot, status: SessionStatus) {
    if slot.session.status != status {
        slot.session.status = status;
        observer.on_status_change(slot.session.id, status);
    }
}

/// Price the turn's usage onto its message and charge the difference to
/// the ledger for direct calls.
fn record_usage(slot: &mut SessionSlot, ledger: &mut SpendLedger, ledger_path: Option<&PathBuf>) {
    let Some(turn) = slot.turn.as_mut() else {
        return;
    };
    let Some(usage) = turn.accumulator.usage() else {
        return;
    };
    let priced = pricing::priced(usage, &turn.model);
    if let Some(message) = slot.session.messages.get_mut(turn.message_index) {
        message.usage = Some(priced);
    }
    if turn.direct {
        let delta = priced.cost - turn.recorded_cost;
        if delta > 0.0 {
            ledger.record(delta);
            if let Some(path) = ledger_path {
                if let Err(e) = ledger.save_to(path) {
                    tracing::warn!(target: "shoulders.budget", error = %e, "failed to save spend ledger");
                }
            }
        }
    }
    turn.recorded_cost = priced.cost;
    slot.session.recompute_usage();
}

/// Merge usage that arrived after the turn settled.
fn reconcile_usage(
    slot: &mut SessionSlot,
    raw: &serde_json::Value,
    ledger: &mut SpendLedger,
    ledger_path: Option<&PathBuf>,
) {
    let Some(turn) = slot.turn.as_mut().filter(|turn| turn.settled) else {
        return;
    };
    let before = turn.accumulator.usage();
    if turn.accumulator.merge_usage(raw) == before {
        return;
    }
    tracing::debug!(target: "shoulders.engine", key = %turn.key, "late usage reconciled");
    record_usage(slot, ledger, ledger_path);
}
