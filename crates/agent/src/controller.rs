//! The continuation controller.
//!
//! Drives one user turn as a bounded sequence of model calls:
//!
//! 1. **Fetch** the model-visible history from the message store
//! 2. **Select tools** relevant to the latest user message
//! 3. **Compress** the history into what is left of the budget
//! 4. **Mark** the stable prefix for prompt caching
//! 5. **Invoke** the model, forwarding streamed output to the caller
//! 6. **Classify** the finish reason: tool calls and truncation loop back to
//!    step 1, everything else ends the turn
//!
//! The caller sees one continuous assistant turn: intermediate finish
//! markers are never surfaced, and exactly one `finish` event closes the run.

use crate::context::cache::CacheAllocator;
use crate::context::compressor::{ContextCompressor, DEFAULT_BUDGET_FRACTION, DEFAULT_RECENT_MESSAGES};
use crate::context::token::TokenEstimator;
use crate::run_state::{RunPhase, RunState};
use crate::stream_event::{OutputEvent, RunOutcome, StatusKind};
use continuum_config::EngineConfig;
use continuum_core::error::{Error, ProviderError};
use continuum_core::message::{ConversationId, Message, MessageToolCall, Role};
use continuum_core::provider::{FinishReason, Provider, ProviderRequest, ToolChoice, Usage};
use continuum_core::store::MessageStore;
use continuum_core::tool::{ToolCatalog, ToolDispatcher};
use continuum_tools::{ToolRelevanceFilter, compact_all};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffered output events per run before the controller waits on the caller.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    /// Alternate model for the single transient-error retry.
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tool_choice: ToolChoice,
    pub stream: bool,
    /// Automatic continuations allowed after the first call; 0 disables them.
    pub max_auto_continues: u32,
    /// Tool-call rounds after which the turn ends.
    pub max_tool_calls: u32,
    pub enable_caching: bool,
    pub enable_compression: bool,
    pub relevance_filter: bool,
    /// Explicit token ceiling; overrides `budget_fraction`.
    pub max_context_tokens: Option<usize>,
    pub budget_fraction: f32,
    pub recent_messages: usize,
    /// Compact tool schemas once they exceed this share of the budget.
    pub compress_tools_above: f32,
}

impl RunOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Build options from the loaded engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            model: config.model.clone(),
            fallback_model: config.fallback_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            tool_choice: config.tool_choice.clone(),
            stream: config.stream,
            max_auto_continues: config.continuation.max_auto_continues,
            max_tool_calls: config.continuation.max_tool_calls,
            enable_caching: config.caching.enabled,
            enable_compression: config.context.enable_compression,
            relevance_filter: config.tools.relevance_filter,
            max_context_tokens: config.context.max_context_tokens,
            budget_fraction: config.context.budget_fraction,
            recent_messages: config.context.recent_messages,
            compress_tools_above: config.tools.compress_above,
        }
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    pub fn with_max_auto_continues(mut self, max: u32) -> Self {
        self.max_auto_continues = max;
        self
    }

    pub fn with_max_tool_calls(mut self, max: u32) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Caller's side of a run.
pub struct RunHandle {
    events: mpsc::Receiver<OutputEvent>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Next event, or `None` after the final `finish`.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.events.recv().await
    }

    /// Stop the run. The in-flight model call is abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }
}

/// Output of one completed model call.
struct CallOutput {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    finish_reason: FinishReason,
    usage: Option<Usage>,
    model: String,
}

enum CallError {
    /// `streamed` holds the text already forwarded to the caller, if any
    /// output (text or tool calls) went out before the failure.
    Provider {
        error: ProviderError,
        streamed: Option<String>,
    },
    Cancelled,
}

impl From<ProviderError> for CallError {
    fn from(error: ProviderError) -> Self {
        Self::Provider {
            error,
            streamed: None,
        }
    }
}

/// Why the loop stopped, plus the error text for `Error`.
struct Termination {
    phase: RunPhase,
    error: Option<String>,
}

impl Termination {
    fn phase(phase: RunPhase) -> Self {
        Self { phase, error: None }
    }

    fn error(error: impl ToString) -> Self {
        Self {
            phase: RunPhase::Error,
            error: Some(error.to_string()),
        }
    }
}

/// Runs user turns against injected collaborators.
///
/// Cheap to clone; every run gets its own task and its own [`RunState`].
#[derive(Clone)]
pub struct ContinuationController {
    provider: Arc<dyn Provider>,
    store: Arc<dyn MessageStore>,
    catalog: Arc<dyn ToolCatalog>,
    dispatcher: Arc<dyn ToolDispatcher>,
    filter: Arc<ToolRelevanceFilter>,
    estimator: TokenEstimator,
    channel_capacity: usize,
}

impl ContinuationController {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn MessageStore>,
        catalog: Arc<dyn ToolCatalog>,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Self {
        Self {
            provider,
            store,
            catalog,
            dispatcher,
            filter: Arc::new(ToolRelevanceFilter::new()),
            estimator: TokenEstimator::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Use a filter already validated against the catalog.
    pub fn with_filter(mut self, filter: ToolRelevanceFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Start a turn for `conversation_id`.
    ///
    /// The user's message must already be in the store. Events arrive on the
    /// returned handle; dropping it cancels the run.
    pub fn run(
        &self,
        conversation_id: ConversationId,
        system_prompt: impl Into<String>,
        options: RunOptions,
    ) -> RunHandle {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let controller = self.clone();
        let token = cancel.clone();
        let system_prompt = system_prompt.into();

        tokio::spawn(async move {
            controller
                .drive(conversation_id, system_prompt, options, tx, token)
                .await;
        });

        RunHandle { events: rx, cancel }
    }

    async fn drive(
        self,
        conversation_id: ConversationId,
        system_prompt: String,
        options: RunOptions,
        tx: mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> RunState {
        let mut state = RunState::new();
        info!(
            conversation_id = %conversation_id,
            model = %options.model,
            "Starting run"
        );

        let termination = self
            .run_loop(&conversation_id, &system_prompt, &options, &mut state, &tx, &cancel)
            .await;
        let model = state.model(&options.model).to_string();

        // Whatever truncated output is still pending becomes part of the turn.
        let pending = state.take_partial();
        if !pending.is_empty() {
            if let Err(e) = self
                .store
                .append(&conversation_id, Message::assistant(pending))
                .await
            {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to persist partial output");
            }
        }

        let outcome = match termination.phase {
            RunPhase::LimitReached => RunOutcome::LimitReached,
            RunPhase::Error => RunOutcome::Error,
            RunPhase::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Done,
        };

        if outcome == RunOutcome::LimitReached {
            let notice = format!(
                "Stopped after {} automatic continuations. Send another message to continue.",
                options.max_auto_continues
            );
            let mut message = Message::assistant(notice.as_str()).hidden();
            message
                .metadata
                .insert("kind".into(), serde_json::Value::String("notice".into()));
            if let Err(e) = self.store.append(&conversation_id, message).await {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to persist limit notice");
            }
            let _ = tx
                .send(OutputEvent::Status {
                    kind: StatusKind::Notice,
                    message: notice,
                })
                .await;
        }

        state.finish(termination.phase);
        info!(
            conversation_id = %conversation_id,
            outcome = ?outcome,
            iterations = state.iterations,
            tool_calls = state.tool_calls,
            model = %model,
            "Run finished"
        );

        let _ = tx
            .send(OutputEvent::Finish {
                reason: outcome,
                iterations: state.iterations,
                tool_calls: state.tool_calls,
                model,
                usage: state.usage.clone(),
                error: termination.error,
            })
            .await;
        state
    }

    async fn run_loop(
        &self,
        conversation_id: &ConversationId,
        system_prompt: &str,
        options: &RunOptions,
        state: &mut RunState,
        tx: &mpsc::Sender<OutputEvent>,
        cancel: &CancellationToken,
    ) -> Termination {
        loop {
            if cancel.is_cancelled() || tx.is_closed() {
                return Termination::phase(RunPhase::Cancelled);
            }
            state.phase = RunPhase::Running;
            state.active = false;
            let model = state.model(&options.model).to_string();

            let request = match self
                .prepare(conversation_id, system_prompt, options, state, &model)
                .await
            {
                Ok(request) => request,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Failed to build request");
                    let _ = tx
                        .send(OutputEvent::Status {
                            kind: StatusKind::Error,
                            message: e.to_string(),
                        })
                        .await;
                    return Termination::error(e);
                }
            };

            let output = match self.call_model(request, options.stream, tx, cancel).await {
                Ok(output) => output,
                Err(CallError::Cancelled) => return Termination::phase(RunPhase::Cancelled),
                Err(CallError::Provider {
                    error: e,
                    streamed: None,
                }) if e.is_transient() && !state.fallback_used => {
                    let fallback = options
                        .fallback_model
                        .clone()
                        .unwrap_or_else(|| model.clone());
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        model = %model,
                        fallback = %fallback,
                        "Transient provider error, retrying once on fallback model"
                    );
                    state.use_fallback(fallback.clone());
                    let sent = tx
                        .send(OutputEvent::Status {
                            kind: StatusKind::Fallback,
                            message: format!("{e}; retrying with {fallback}"),
                        })
                        .await;
                    if sent.is_err() {
                        return Termination::phase(RunPhase::Cancelled);
                    }
                    continue;
                }
                Err(CallError::Provider { error: e, streamed }) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        kind = ?e.kind(),
                        after_output = streamed.is_some(),
                        "Provider call failed"
                    );
                    // Streamed output stays in the turn and is never replayed.
                    if let Some(text) = streamed {
                        state.push_partial(&text);
                    }
                    let _ = tx
                        .send(OutputEvent::Status {
                            kind: StatusKind::Error,
                            message: e.to_string(),
                        })
                        .await;
                    return Termination::error(e);
                }
            };

            state.iterations += 1;
            if let Some(usage) = &output.usage {
                state.usage.accumulate(usage);
            }
            debug!(
                conversation_id = %conversation_id,
                iteration = state.iterations,
                model = %output.model,
                finish_reason = output.finish_reason.as_str(),
                "Model call completed"
            );

            match output.finish_reason {
                FinishReason::ToolCalls => {
                    let mut content = state.take_partial();
                    content.push_str(&output.content);
                    let assistant =
                        Message::assistant(content).with_tool_calls(output.tool_calls.clone());
                    if let Err(e) = self.store.append(conversation_id, assistant).await {
                        return Termination::error(Error::from(e));
                    }

                    let results = tokio::select! {
                        _ = cancel.cancelled() => {
                            self.close_pending_calls(conversation_id, &output.tool_calls).await;
                            return Termination::phase(RunPhase::Cancelled);
                        }
                        r = self.dispatcher.dispatch(conversation_id, &output.tool_calls) => r,
                    };
                    let results = match results {
                        Ok(results) => results,
                        Err(e) => {
                            warn!(conversation_id = %conversation_id, error = %e, "Tool dispatch failed");
                            // Report the failure to the model so it can recover.
                            output
                                .tool_calls
                                .iter()
                                .map(|call| Message::tool_result(&call.id, format!("Error: {e}")))
                                .collect()
                        }
                    };
                    for result in results {
                        if let Err(e) = self.store.append(conversation_id, result).await {
                            return Termination::error(Error::from(e));
                        }
                    }

                    state.tool_calls += 1;
                    if state.tool_calls >= options.max_tool_calls {
                        info!(
                            conversation_id = %conversation_id,
                            tool_calls = state.tool_calls,
                            "Tool-call cap reached"
                        );
                        return Termination::phase(RunPhase::Done);
                    }
                    if let Some(phase) = Self::schedule_continuation(state, options) {
                        return Termination::phase(phase);
                    }
                }
                FinishReason::Length => {
                    state.push_partial(&output.content);
                    if let Some(phase) = Self::schedule_continuation(state, options) {
                        return Termination::phase(phase);
                    }
                }
                _ => {
                    let mut content = state.take_partial();
                    content.push_str(&output.content);
                    if !content.is_empty() {
                        if let Err(e) = self
                            .store
                            .append(conversation_id, Message::assistant(content))
                            .await
                        {
                            return Termination::error(Error::from(e));
                        }
                    }
                    return Termination::phase(RunPhase::Done);
                }
            }
        }
    }

    /// Answer every call of an abandoned dispatch so no `tool_use` is left
    /// without a result in the stored history.
    async fn close_pending_calls(&self, conversation_id: &ConversationId, calls: &[MessageToolCall]) {
        for call in calls {
            let result = Message::tool_result(&call.id, "Cancelled before the tool returned.");
            if let Err(e) = self.store.append(conversation_id, result).await {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to close cancelled tool call");
                return;
            }
        }
    }

    /// Decide whether another call may follow. `None` means loop again.
    fn schedule_continuation(state: &mut RunState, options: &RunOptions) -> Option<RunPhase> {
        if options.max_auto_continues == 0 {
            return Some(RunPhase::Done);
        }
        if state.iterations > options.max_auto_continues {
            warn!(
                iterations = state.iterations,
                max_auto_continues = options.max_auto_continues,
                "Auto-continue limit reached"
            );
            return Some(RunPhase::LimitReached);
        }
        state.active = true;
        state.phase = RunPhase::Continuing;
        None
    }

    /// Assemble the request for the next call.
    async fn prepare(
        &self,
        conversation_id: &ConversationId,
        system_prompt: &str,
        options: &RunOptions,
        state: &RunState,
        model: &str,
    ) -> Result<ProviderRequest, Error> {
        let history = self.store.list(conversation_id, true).await?;
        let query = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();

        // Tools first: their cost comes off the message budget.
        let schemas = self.catalog.list_schemas();
        let mut tools = if options.relevance_filter {
            self.filter.select(&query, &schemas).definitions()
        } else {
            schemas.iter().map(|t| t.to_definition()).collect()
        };

        let compressor = ContextCompressor::new(self.estimator.clone())
            .with_recent_messages(options.recent_messages)
            .with_budget_fraction(options.budget_fraction);
        let budget = compressor.budget(model, options.max_context_tokens);

        let mut tool_tokens = self.estimator.estimate_tools(model, &tools);
        if tool_tokens as f32 > budget as f32 * options.compress_tools_above {
            tools = compact_all(&tools);
            let compacted = self.estimator.estimate_tools(model, &tools);
            debug!(before = tool_tokens, after = compacted, budget, "Compacted tool schemas");
            tool_tokens = compacted;
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.extend(history);

        // Truncated output goes back as the last assistant turn.
        let partial = (!state.partial.is_empty()).then(|| Message::assistant(state.partial.as_str()));
        let partial_tokens = partial
            .as_ref()
            .map_or(0, |m| self.estimator.estimate_message(model, m));

        if options.enable_compression {
            let ceiling = budget.saturating_sub(tool_tokens + partial_tokens);
            let compression = compressor.compress(&messages, model, Some(ceiling));
            if !compression.is_unchanged() {
                info!(
                    conversation_id = %conversation_id,
                    dropped = compression.dropped,
                    original_tokens = compression.original_tokens,
                    final_tokens = compression.final_tokens,
                    "Compressed history"
                );
            }
            messages = compression.messages;
        }
        messages.extend(partial);

        let cache_breakpoints = if options.enable_caching {
            let supported = self.provider.supports_prompt_caching(model);
            CacheAllocator::new(self.estimator.clone()).allocate(model, &messages, supported)
        } else {
            Vec::new()
        };

        Ok(ProviderRequest {
            model: model.to_string(),
            messages,
            temperature: options.temperature,
            max_tokens: Some(options.max_tokens),
            tools,
            tool_choice: options.tool_choice.clone(),
            stream: options.stream,
            stop: Vec::new(),
            cache_breakpoints,
        })
    }

    /// Invoke the gateway, forwarding output as it arrives.
    async fn call_model(
        &self,
        request: ProviderRequest,
        stream: bool,
        tx: &mpsc::Sender<OutputEvent>,
        cancel: &CancellationToken,
    ) -> Result<CallOutput, CallError> {
        let requested_model = request.model.clone();

        if !stream {
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = tx.closed() => return Err(CallError::Cancelled),
                r = self.provider.complete(request) => r?,
            };
            let content = response.message.text();
            if !content.is_empty() {
                emit(tx, OutputEvent::Content { content: content.clone() }).await?;
            }
            for call in &response.message.tool_calls {
                emit(tx, tool_call_event(call)).await?;
            }
            let tool_calls = response.message.tool_calls;
            return Ok(CallOutput {
                finish_reason: normalize_finish(response.finish_reason, &tool_calls),
                content,
                tool_calls,
                usage: response.usage,
                model: response.model,
            });
        }

        let mut chunks = tokio::select! {
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tx.closed() => return Err(CallError::Cancelled),
            r = self.provider.stream(request) => r?,
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;
        let mut done = false;
        let mut emitted = false;

        while !done {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = tx.closed() => return Err(CallError::Cancelled),
                next = chunks.recv() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(error)) => {
                    return Err(CallError::Provider {
                        error,
                        streamed: emitted.then_some(content),
                    });
                }
                None => break,
            };
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                content.push_str(&text);
                emitted = true;
                emit(tx, OutputEvent::Content { content: text }).await?;
            }
            for call in chunk.tool_calls {
                emitted = true;
                emit(tx, tool_call_event(&call)).await?;
                tool_calls.push(call);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            done = chunk.done;
        }

        let Some(finish_reason) = finish_reason else {
            return Err(CallError::Provider {
                error: ProviderError::StreamInterrupted("stream ended without a finish reason".into()),
                streamed: emitted.then_some(content),
            });
        };

        Ok(CallOutput {
            finish_reason: normalize_finish(finish_reason, &tool_calls),
            content,
            tool_calls,
            usage,
            model: requested_model,
        })
    }
}

async fn emit(tx: &mpsc::Sender<OutputEvent>, event: OutputEvent) -> Result<(), CallError> {
    tx.send(event).await.map_err(|_| CallError::Cancelled)
}

fn tool_call_event(call: &MessageToolCall) -> OutputEvent {
    OutputEvent::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

/// Reconcile the reported finish reason with the tool calls received.
fn normalize_finish(reason: FinishReason, tool_calls: &[MessageToolCall]) -> FinishReason {
    match reason {
        FinishReason::ToolCalls if tool_calls.is_empty() => FinishReason::Stop,
        FinishReason::Stop if !tool_calls.is_empty() => FinishReason::ToolCalls,
        other => other,
    }
}
