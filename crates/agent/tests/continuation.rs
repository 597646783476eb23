//! End-to-end tests of the continuation loop against scripted collaborators.

use async_trait::async_trait;
use continuum_agent::{
    ContinuationController, OutputEvent, RunOptions, RunOutcome, StatusKind, TokenEstimator,
};
use continuum_core::error::{ProviderError, ToolError};
use continuum_core::message::{ConversationId, Message, MessageToolCall, Role};
use continuum_core::provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use continuum_core::store::MessageStore;
use continuum_core::tool::{StaticCatalog, ToolDispatcher};
use continuum_store::InMemoryStore;
use continuum_tools::builtin_catalog;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const MODEL: &str = "test-model";

// ── Scripted collaborators ────────────────────────────────────────────────

/// Returns scripted results in order and records every request.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    caching: bool,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            caching: false,
        }
    }

    fn with_caching(mut self) -> Self {
        self.caching = true;
        self
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut response)) => {
                response.model = model;
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::InvalidRequest("script exhausted".into())),
        }
    }

    fn supports_prompt_caching(&self, _model: &str) -> bool {
        self.caching
    }
}

fn response(text: &str, finish_reason: FinishReason) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant(text),
        finish_reason,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            ..Usage::default()
        }),
        model: String::new(),
        metadata: serde_json::Map::new(),
    })
}

fn tool_response(n: usize) -> Result<ProviderResponse, ProviderError> {
    let mut r = response("", FinishReason::ToolCalls)?;
    r.message = r.message.with_tool_calls(vec![MessageToolCall {
        id: format!("call_{n}"),
        name: "read_file".into(),
        arguments: r#"{"path":"README.md"}"#.into(),
    }]);
    Ok(r)
}

/// Answers every call with a successful tool result.
#[derive(Default)]
struct EchoDispatcher {
    calls: Mutex<usize>,
}

#[async_trait]
impl ToolDispatcher for EchoDispatcher {
    async fn dispatch(
        &self,
        _conversation_id: &ConversationId,
        calls: &[MessageToolCall],
    ) -> Result<Vec<Message>, ToolError> {
        *self.calls.lock().unwrap() += 1;
        Ok(calls
            .iter()
            .map(|c| Message::tool_result(&c.id, format!("{} ok", c.name)))
            .collect())
    }
}

struct FailingDispatcher;

#[async_trait]
impl ToolDispatcher for FailingDispatcher {
    async fn dispatch(
        &self,
        _conversation_id: &ConversationId,
        _calls: &[MessageToolCall],
    ) -> Result<Vec<Message>, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "read_file".into(),
            reason: "disk on fire".into(),
        })
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    store: InMemoryStore,
    dispatcher: Arc<EchoDispatcher>,
    controller: ContinuationController,
    conv: ConversationId,
}

async fn harness_with(provider: ScriptedProvider, catalog: StaticCatalog, user: &str) -> Harness {
    let provider = Arc::new(provider);
    let store = InMemoryStore::new();
    let dispatcher = Arc::new(EchoDispatcher::default());
    let conv = ConversationId::from("conv-1");
    store.append(&conv, Message::user(user)).await.unwrap();

    let controller = ContinuationController::new(
        provider.clone(),
        Arc::new(store.clone()),
        Arc::new(catalog),
        dispatcher.clone(),
    );
    Harness {
        provider,
        store,
        dispatcher,
        controller,
        conv,
    }
}

async fn harness(script: Vec<Result<ProviderResponse, ProviderError>>) -> Harness {
    harness_with(ScriptedProvider::new(script), builtin_catalog(), "Read the README").await
}

fn options() -> RunOptions {
    RunOptions::new(MODEL).with_stream(false)
}

fn finish(events: &[OutputEvent]) -> (RunOutcome, u32, u32, String, Option<String>) {
    let finishes: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, OutputEvent::Finish { .. }))
        .collect();
    assert_eq!(finishes.len(), 1, "exactly one finish event");
    assert!(matches!(events.last(), Some(OutputEvent::Finish { .. })), "finish is last");
    match finishes[0] {
        OutputEvent::Finish {
            reason,
            iterations,
            tool_calls,
            model,
            error,
            ..
        } => (*reason, *iterations, *tool_calls, model.clone(), error.clone()),
        _ => unreachable!(),
    }
}

fn statuses(events: &[OutputEvent], wanted: StatusKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, OutputEvent::Status { kind, .. } if *kind == wanted))
        .count()
}

fn content(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

// ── Basic flow ────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_call_completes_turn() {
    let h = harness(vec![response("Here is the README.", FinishReason::Stop)]).await;
    let events = h.controller.run(h.conv.clone(), "You are helpful.", options()).collect().await;

    let (reason, iterations, tool_calls, model, error) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(iterations, 1);
    assert_eq!(tool_calls, 0);
    assert_eq!(model, MODEL);
    assert!(error.is_none());
    assert_eq!(content(&events), "Here is the README.");

    let stored = h.store.list(&h.conv, true).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].role, Role::Assistant);

    // System prompt leads the request.
    let request = &h.provider.requests()[0];
    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(request.messages[0].text(), "You are helpful.");
}

#[tokio::test]
async fn tool_calls_are_dispatched_and_fed_back() {
    let h = harness(vec![tool_response(1), response("Done reading.", FinishReason::Stop)]).await;
    let events = h.controller.run(h.conv.clone(), "", options()).collect().await;

    let (reason, iterations, tool_calls, _, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(iterations, 2);
    assert_eq!(tool_calls, 1);
    assert_eq!(*h.dispatcher.calls.lock().unwrap(), 1);
    assert!(events.iter().any(|e| matches!(e, OutputEvent::ToolCall { name, .. } if name == "read_file")));

    // Second request sees the assistant call and the tool result.
    let second = &h.provider.requests()[1];
    let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
}

#[tokio::test]
async fn dispatch_failure_is_reported_to_the_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(1),
        response("Sorry, the file could not be read.", FinishReason::Stop),
    ]));
    let store = InMemoryStore::new();
    let conv = ConversationId::from("conv-err");
    store.append(&conv, Message::user("Read the README")).await.unwrap();
    let controller = ContinuationController::new(
        provider.clone(),
        Arc::new(store.clone()),
        Arc::new(builtin_catalog()),
        Arc::new(FailingDispatcher),
    );

    let events = controller.run(conv.clone(), "", options()).collect().await;
    assert_eq!(finish(&events).0, RunOutcome::Done);

    let stored = store.list(&conv, true).await.unwrap();
    let tool = stored.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.text().contains("disk on fire"));
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
}

/// Never finishes a dispatch.
struct HangingDispatcher;

#[async_trait]
impl ToolDispatcher for HangingDispatcher {
    async fn dispatch(
        &self,
        _conversation_id: &ConversationId,
        _calls: &[MessageToolCall],
    ) -> Result<Vec<Message>, ToolError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancel_during_dispatch_leaves_every_call_answered() {
    let provider = Arc::new(ScriptedProvider::new(vec![tool_response(1)]));
    let store = InMemoryStore::new();
    let conv = ConversationId::from("conv-hang");
    store.append(&conv, Message::user("Read the README")).await.unwrap();
    let controller = ContinuationController::new(
        provider.clone(),
        Arc::new(store.clone()),
        Arc::new(builtin_catalog()),
        Arc::new(HangingDispatcher),
    );

    let mut handle = controller.run(conv.clone(), "", options());
    match handle.recv().await {
        Some(OutputEvent::ToolCall { name, .. }) => assert_eq!(name, "read_file"),
        other => panic!("expected tool call, got {other:?}"),
    }
    handle.cancel();
    let rest = handle.collect().await;
    assert_eq!(finish(&rest).0, RunOutcome::Cancelled);

    let stored = store.list(&conv, true).await.unwrap();
    let calls: Vec<&str> = stored
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();
    let results: Vec<&Message> = stored.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(calls, vec!["call_1"]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("call_1"));
    assert!(results[0].text().contains("Cancelled"));
    assert_eq!(provider.call_count(), 1);
}

// ── Loop safety ───────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_cap_stops_before_sixth_call() {
    let script = (1..=6).map(tool_response).collect();
    let h = harness(script).await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_max_tool_calls(5))
        .collect()
        .await;

    let (reason, iterations, tool_calls, _, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(iterations, 5);
    assert_eq!(tool_calls, 5);
    assert_eq!(h.provider.call_count(), 5);
    assert_eq!(statuses(&events, StatusKind::Notice), 0);
}

#[tokio::test]
async fn iteration_cap_reports_limit_with_notice() {
    let script = (0..10).map(|_| response("more ", FinishReason::Length)).collect();
    let h = harness(script).await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_max_auto_continues(2))
        .collect()
        .await;

    let (reason, iterations, _, _, _) = finish(&events);
    assert_eq!(reason, RunOutcome::LimitReached);
    assert_eq!(iterations, 3);
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(statuses(&events, StatusKind::Notice), 1);

    // Notice is kept for the user but hidden from the model.
    let all = h.store.list(&h.conv, false).await.unwrap();
    let visible = h.store.list(&h.conv, true).await.unwrap();
    assert_eq!(all.len(), visible.len() + 1);
    // Truncated output so far is persisted once.
    assert_eq!(visible.last().unwrap().text(), "more more more ");
}

#[tokio::test]
async fn continuations_never_exceed_both_caps() {
    let script = (1..=10).map(tool_response).collect();
    let h = harness(script).await;
    let events = h
        .controller
        .run(
            h.conv.clone(),
            "",
            options().with_max_auto_continues(2).with_max_tool_calls(5),
        )
        .collect()
        .await;

    assert_eq!(finish(&events).0, RunOutcome::LimitReached);
    assert_eq!(h.provider.call_count(), 3);
}

#[tokio::test]
async fn zero_auto_continues_makes_one_call() {
    let h = harness(vec![tool_response(1), response("never", FinishReason::Stop)]).await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_max_auto_continues(0))
        .collect()
        .await;

    assert_eq!(finish(&events).0, RunOutcome::Done);
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn xml_tool_limit_forces_done() {
    let h = harness(vec![
        response("partial xml", FinishReason::XmlToolLimitReached),
        response("never", FinishReason::Stop),
    ])
    .await;
    let events = h.controller.run(h.conv.clone(), "", options()).collect().await;

    assert_eq!(finish(&events).0, RunOutcome::Done);
    assert_eq!(h.provider.call_count(), 1);
}

// ── Truncation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn length_truncation_continues_as_one_turn() {
    let h = harness(vec![
        response("Hello, ", FinishReason::Length),
        response("world", FinishReason::Stop),
    ])
    .await;
    let events = h.controller.run(h.conv.clone(), "", options()).collect().await;

    let (reason, iterations, _, _, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(iterations, 2);
    assert_eq!(content(&events), "Hello, world");

    // The partial output is replayed as the last assistant turn.
    let second = &h.provider.requests()[1];
    let last = second.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "Hello, ");

    // Stored once, joined.
    let stored = h.store.list(&h.conv, true).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].text(), "Hello, world");
}

// ── Provider errors ───────────────────────────────────────────────────────

#[tokio::test]
async fn overloaded_then_fallback_succeeds() {
    let h = harness(vec![
        Err(ProviderError::Overloaded("busy".into())),
        response("Recovered.", FinishReason::Stop),
    ])
    .await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_fallback_model("fallback-model"))
        .collect()
        .await;

    let (reason, iterations, _, model, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(model, "fallback-model");
    assert_eq!(iterations, 1);
    assert_eq!(statuses(&events, StatusKind::Fallback), 1);

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].model, MODEL);
    assert_eq!(requests[1].model, "fallback-model");
}

#[tokio::test]
async fn second_transient_error_is_fatal() {
    let h = harness(vec![
        Err(ProviderError::RateLimited { retry_after_secs: 1 }),
        Err(ProviderError::Timeout("slow".into())),
        response("never", FinishReason::Stop),
    ])
    .await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_fallback_model("fallback-model"))
        .collect()
        .await;

    let (reason, _, _, _, error) = finish(&events);
    assert_eq!(reason, RunOutcome::Error);
    assert!(error.unwrap().contains("timed out"));
    assert_eq!(h.provider.call_count(), 2);
    assert_eq!(statuses(&events, StatusKind::Fallback), 1);
}

#[tokio::test]
async fn permanent_error_is_not_retried() {
    let h = harness(vec![
        Err(ProviderError::AuthenticationFailed("bad key".into())),
        response("never", FinishReason::Stop),
    ])
    .await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_fallback_model("fallback-model"))
        .collect()
        .await;

    assert_eq!(finish(&events).0, RunOutcome::Error);
    assert_eq!(h.provider.call_count(), 1);
    assert_eq!(statuses(&events, StatusKind::Fallback), 0);
    assert_eq!(statuses(&events, StatusKind::Error), 1);
}

#[tokio::test]
async fn fallback_without_alternate_retries_same_model() {
    let h = harness(vec![
        Err(ProviderError::Overloaded("busy".into())),
        response("ok", FinishReason::Stop),
    ])
    .await;
    let events = h.controller.run(h.conv.clone(), "", options()).collect().await;

    assert_eq!(finish(&events).0, RunOutcome::Done);
    let requests = h.provider.requests();
    assert_eq!(requests[1].model, MODEL);
}

#[tokio::test]
async fn fallback_is_spent_once_per_turn() {
    let h = harness(vec![
        Err(ProviderError::Overloaded("busy".into())),
        tool_response(1),
        Err(ProviderError::Overloaded("busy again".into())),
    ])
    .await;
    let events = h
        .controller
        .run(h.conv.clone(), "", options().with_fallback_model("fallback-model"))
        .collect()
        .await;

    let (reason, iterations, _, _, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Error);
    assert_eq!(iterations, 1);
    assert_eq!(h.provider.call_count(), 3);
}

// ── Budgeting ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn long_history_is_compressed_to_system_and_last_eight() {
    let provider = ScriptedProvider::new(vec![response("ok", FinishReason::Stop)]);
    let h = harness_with(provider, StaticCatalog::new(), "question number 0").await;
    for i in 1..19 {
        let message = if i % 2 == 0 {
            Message::user(format!("question number {i}"))
        } else {
            Message::assistant(format!("answer number {i}"))
        };
        h.store.append(&h.conv, message).await.unwrap();
    }

    // Budget that fits exactly the system prompt plus the last eight messages.
    let history = h.store.list(&h.conv, true).await.unwrap();
    let mut expected = vec![Message::system("You are helpful.")];
    expected.extend_from_slice(&history[history.len() - 8..]);
    let ceiling = TokenEstimator::new().estimate_messages(MODEL, &expected);

    let events = h
        .controller
        .run(
            h.conv.clone(),
            "You are helpful.",
            options().with_max_context_tokens(ceiling),
        )
        .collect()
        .await;
    assert_eq!(finish(&events).0, RunOutcome::Done);

    let request = &h.provider.requests()[0];
    assert_eq!(request.messages.len(), 9);
    assert_eq!(request.messages[0].role, Role::System);
    let sent: Vec<String> = request.messages[1..].iter().map(Message::text).collect();
    let want: Vec<String> = expected[1..].iter().map(Message::text).collect();
    assert_eq!(sent, want);
}

#[tokio::test]
async fn tools_are_filtered_by_the_latest_user_message() {
    let provider = ScriptedProvider::new(vec![response("ok", FinishReason::Stop)]);
    let h = harness_with(provider, builtin_catalog(), "search the web for rust news").await;
    let events = h.controller.run(h.conv.clone(), "", options()).collect().await;
    assert_eq!(finish(&events).0, RunOutcome::Done);

    let tools: Vec<String> = h.provider.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert!(tools.contains(&"web_search".to_string()));
    assert!(tools.contains(&"ask".to_string()));
    assert!(tools.len() < 30);
}

#[tokio::test]
async fn unmatched_query_exposes_full_catalog() {
    let provider = ScriptedProvider::new(vec![response("hi!", FinishReason::Stop)]);
    let h = harness_with(provider, builtin_catalog(), "hello there").await;
    h.controller.run(h.conv.clone(), "", options()).collect().await;
    assert_eq!(h.provider.requests()[0].tools.len(), 30);
}

#[tokio::test]
async fn oversized_tool_schemas_are_compacted() {
    let provider = ScriptedProvider::new(vec![response("ok", FinishReason::Stop)]);
    let h = harness_with(provider, builtin_catalog(), "hello there").await;
    h.controller
        .run(h.conv.clone(), "", options().with_max_context_tokens(2_000))
        .collect()
        .await;

    let request = &h.provider.requests()[0];
    assert_eq!(request.tools.len(), 30);
    assert!(request.tools.iter().all(|t| t.description.chars().count() <= 60));
}

#[tokio::test]
async fn cache_breakpoints_cover_stable_prefix_only() {
    let provider = ScriptedProvider::new(vec![
        tool_response(1),
        response("ok", FinishReason::Stop),
    ])
    .with_caching();
    let h = harness_with(provider, StaticCatalog::new(), "first question").await;
    h.store
        .append(&h.conv, Message::assistant("first answer"))
        .await
        .unwrap();
    h.store
        .append(&h.conv, Message::user("second question"))
        .await
        .unwrap();

    let system_prompt = "Follow the project conventions. ".repeat(200);
    h.controller
        .run(
            h.conv.clone(),
            system_prompt,
            RunOptions::new("claude-sonnet-4-20250514").with_stream(false),
        )
        .collect()
        .await;

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let newest_user = request
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap();
        assert!(!request.cache_breakpoints.is_empty());
        assert!(request.cache_breakpoints.iter().all(|bp| bp.message_index < newest_user));
    }
    // Same prefix on both calls of the turn.
    assert_eq!(requests[0].cache_breakpoints, requests[1].cache_breakpoints);
}

#[tokio::test]
async fn caching_disabled_or_unsupported_places_nothing() {
    let provider = ScriptedProvider::new(vec![response("ok", FinishReason::Stop)]);
    let h = harness_with(provider, StaticCatalog::new(), "question").await;
    let system_prompt = "Follow the project conventions. ".repeat(200);
    h.controller
        .run(
            h.conv.clone(),
            system_prompt,
            RunOptions::new("claude-sonnet-4-20250514").with_stream(false),
        )
        .collect()
        .await;
    assert!(h.provider.requests()[0].cache_breakpoints.is_empty());
}

// ── Streaming and cancellation ────────────────────────────────────────────

/// Streams scripted chunks; optionally stalls after them until dropped.
struct ChunkProvider {
    chunks: Vec<StreamChunk>,
    stall: bool,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Provider for ChunkProvider {
    fn name(&self) -> &str {
        "chunks"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let chunks = self.chunks.clone();
        let stall = self.stall;
        let dropped = self.dropped.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
                dropped.store(true, Ordering::SeqCst);
            }
        });
        Ok(rx)
    }
}

async fn chunk_harness(provider: ChunkProvider) -> (ContinuationController, InMemoryStore, ConversationId) {
    let store = InMemoryStore::new();
    let conv = ConversationId::from("conv-stream");
    store.append(&conv, Message::user("Tell me a story")).await.unwrap();
    let controller = ContinuationController::new(
        Arc::new(provider),
        Arc::new(store.clone()),
        Arc::new(StaticCatalog::new()),
        Arc::new(EchoDispatcher::default()),
    );
    (controller, store, conv)
}

#[tokio::test]
async fn streamed_chunks_are_forwarded_in_order() {
    let provider = ChunkProvider {
        chunks: vec![
            StreamChunk::delta("Once "),
            StreamChunk::delta("upon "),
            StreamChunk::delta("a time."),
            StreamChunk {
                finish_reason: Some(FinishReason::Stop),
                done: true,
                ..StreamChunk::default()
            },
        ],
        stall: false,
        dropped: Arc::default(),
    };
    let (controller, store, conv) = chunk_harness(provider).await;
    let events = controller
        .run(conv.clone(), "", RunOptions::new(MODEL).with_stream(true))
        .collect()
        .await;

    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Once ", "upon ", "a time."]);
    assert_eq!(finish(&events).0, RunOutcome::Done);
    assert_eq!(store.list(&conv, true).await.unwrap()[1].text(), "Once upon a time.");
}

#[tokio::test]
async fn stream_without_finish_is_an_error() {
    let provider = ChunkProvider {
        chunks: vec![StreamChunk::delta("Once ")],
        stall: false,
        dropped: Arc::default(),
    };
    let (controller, _, conv) = chunk_harness(provider).await;
    let events = controller
        .run(conv, "", RunOptions::new(MODEL).with_stream(true))
        .collect()
        .await;
    let (reason, _, _, _, error) = finish(&events);
    assert_eq!(reason, RunOutcome::Error);
    assert!(error.unwrap().contains("Stream interrupted"));
    // Already-streamed text stays visible.
    assert_eq!(content(&events), "Once ");
}

#[tokio::test]
async fn cancel_stops_run_and_drops_stream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let provider = ChunkProvider {
        chunks: vec![StreamChunk::delta("thinking")],
        stall: true,
        dropped: dropped.clone(),
    };
    let (controller, _, conv) = chunk_harness(provider).await;
    let mut handle = controller.run(conv, "", RunOptions::new(MODEL).with_stream(true));

    match handle.recv().await {
        Some(OutputEvent::Content { content }) => assert_eq!(content, "thinking"),
        other => panic!("expected content, got {other:?}"),
    }
    handle.cancel();
    let rest = handle.collect().await;
    assert_eq!(finish(&rest).0, RunOutcome::Cancelled);

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(dropped.load(Ordering::SeqCst), "in-flight stream should be dropped");
}

/// Streams one scripted call per request, recording the requested models.
/// With `stall`, the last call holds its stream open until the reader goes away.
struct ScriptedStream {
    calls: Mutex<VecDeque<Vec<Result<StreamChunk, ProviderError>>>>,
    models: Mutex<Vec<String>>,
    stall: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedStream {
    fn new(calls: Vec<Vec<Result<StreamChunk, ProviderError>>>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
            models: Mutex::new(Vec::new()),
            stall: false,
            released: Arc::default(),
        }
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedStream {
    fn name(&self) -> &str {
        "scripted-stream"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.models.lock().unwrap().push(request.model);
        let Some(items) = self.calls.lock().unwrap().pop_front() else {
            return Err(ProviderError::InvalidRequest("script exhausted".into()));
        };
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let stall = self.stall;
        let released = self.released.clone();
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    released.store(true, Ordering::SeqCst);
                    return;
                }
            }
            if stall {
                tx.closed().await;
                released.store(true, Ordering::SeqCst);
            }
        });
        Ok(rx)
    }
}

fn stop() -> StreamChunk {
    StreamChunk {
        finish_reason: Some(FinishReason::Stop),
        done: true,
        ..StreamChunk::default()
    }
}

async fn stream_run(provider: Arc<ScriptedStream>, options: RunOptions) -> (Vec<OutputEvent>, Vec<Message>) {
    let store = InMemoryStore::new();
    let conv = ConversationId::from("conv-story");
    store.append(&conv, Message::user("Tell me a story")).await.unwrap();
    let controller = ContinuationController::new(
        provider,
        Arc::new(store.clone()),
        Arc::new(StaticCatalog::new()),
        Arc::new(EchoDispatcher::default()),
    );
    let events = controller.run(conv.clone(), "", options).collect().await;
    let stored = store.list(&conv, true).await.unwrap();
    (events, stored)
}

#[tokio::test]
async fn transient_error_after_output_is_not_replayed() {
    let provider = Arc::new(ScriptedStream::new(vec![
        vec![
            Ok(StreamChunk::delta("Once upon ")),
            Err(ProviderError::Overloaded("overloaded_error".into())),
        ],
        vec![Ok(StreamChunk::delta("Once upon a time.")), Ok(stop())],
    ]));
    let options = RunOptions::new(MODEL)
        .with_stream(true)
        .with_fallback_model("alt");
    let (events, stored) = stream_run(provider.clone(), options).await;

    assert_eq!(content(&events), "Once upon ");
    assert_eq!(finish(&events).0, RunOutcome::Error);
    assert_eq!(statuses(&events, StatusKind::Fallback), 0);
    assert_eq!(provider.models(), vec![MODEL.to_string()]);

    // What the caller saw is what the history holds.
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].text(), "Once upon ");
}

#[tokio::test]
async fn transient_stream_error_before_output_falls_back() {
    let provider = Arc::new(ScriptedStream::new(vec![
        vec![Err(ProviderError::Timeout("stream stalled".into()))],
        vec![Ok(StreamChunk::delta("Once upon a time.")), Ok(stop())],
    ]));
    let options = RunOptions::new(MODEL)
        .with_stream(true)
        .with_fallback_model("alt");
    let (events, stored) = stream_run(provider.clone(), options).await;

    assert_eq!(content(&events), "Once upon a time.");
    let (reason, _, _, model, _) = finish(&events);
    assert_eq!(reason, RunOutcome::Done);
    assert_eq!(model, "alt");
    assert_eq!(statuses(&events, StatusKind::Fallback), 1);
    assert_eq!(provider.models(), vec![MODEL.to_string(), "alt".to_string()]);
    assert_eq!(stored[1].text(), "Once upon a time.");
}

#[tokio::test]
async fn dropping_the_handle_releases_the_stream() {
    let mut provider = ScriptedStream::new(vec![
        vec![Ok(StreamChunk::delta("thinking"))],
        vec![Ok(StreamChunk::delta("never requested")), Ok(stop())],
    ]);
    provider.stall = true;
    let released = provider.released.clone();
    let provider = Arc::new(provider);

    let store = InMemoryStore::new();
    let conv = ConversationId::from("conv-gone");
    store.append(&conv, Message::user("Tell me a story")).await.unwrap();
    let controller = ContinuationController::new(
        provider.clone(),
        Arc::new(store.clone()),
        Arc::new(StaticCatalog::new()),
        Arc::new(EchoDispatcher::default()),
    );

    let mut handle = controller.run(conv.clone(), "", RunOptions::new(MODEL).with_stream(true));
    match handle.recv().await {
        Some(OutputEvent::Content { content }) => assert_eq!(content, "thinking"),
        other => panic!("expected content, got {other:?}"),
    }
    drop(handle);

    for _ in 0..100 {
        if released.load(Ordering::SeqCst) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(released.load(Ordering::SeqCst), "provider stream should be released");

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(provider.models().len(), 1);
    assert_eq!(store.list(&conv, true).await.unwrap().len(), 1);
}
