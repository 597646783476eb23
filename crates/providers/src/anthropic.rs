//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - `cache_control` markers rendered from the request's cache breakpoints
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use continuum_core::error::ProviderError;
use continuum_core::message::{Content, ContentBlock, Message, MessageToolCall, Role};
use continuum_core::provider::*;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const HEALTH_CHECK_MODEL: &str = "claude-3-5-haiku-latest";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the Messages API request body.
    ///
    /// System messages become top-level `system` blocks. Consecutive tool
    /// results are merged into one user turn, as the API requires. Every
    /// breakpoint marks the last block rendered for its message.
    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let marked: HashSet<usize> = request
            .cache_breakpoints
            .iter()
            .map(|bp| bp.message_index)
            .collect();

        let mut system: Vec<ApiBlock> = Vec::new();
        let mut messages: Vec<ApiMessage> = Vec::new();

        for (index, msg) in request.messages.iter().enumerate() {
            let cache = marked.contains(&index);
            match msg.role {
                Role::System => {
                    let mut block = ApiBlock::text(msg.text());
                    if cache {
                        block.mark_cached();
                    }
                    system.push(block);
                }
                Role::Tool => {
                    let block = ApiBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.text(),
                        cache_control: None,
                    };
                    match messages.last_mut() {
                        Some(prev) if prev.role == "user" && prev.is_tool_results() => {
                            prev.content.push(block)
                        }
                        _ => messages.push(ApiMessage {
                            role: "user".into(),
                            content: vec![block],
                        }),
                    }
                    if cache {
                        if let Some(last) = messages.last_mut() {
                            last.mark_cached();
                        }
                    }
                }
                Role::User | Role::Assistant => {
                    let mut message = ApiMessage {
                        role: msg.role.as_str().into(),
                        content: content_blocks(&msg.content),
                    };
                    for tc in &msg.tool_calls {
                        let input = serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
                            warn!(tool = %tc.name, error = %e, "Tool arguments are not JSON, sending empty input");
                            serde_json::json!({})
                        });
                        message.content.push(ApiBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                            cache_control: None,
                        });
                    }
                    if cache {
                        message.mark_cached();
                    }
                    messages.push(message);
                }
            }
        }

        // A trailing assistant turn is a prefill, which may not end in whitespace.
        if let Some(last) = messages.last_mut().filter(|m| m.role == "assistant") {
            last.trim_prefill();
            if last.content.is_empty() {
                messages.pop();
            }
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Auto => serde_json::json!({"type": "auto"}),
                ToolChoice::Required => serde_json::json!({"type": "any"}),
                ToolChoice::None => serde_json::json!({"type": "none"}),
            };
        }

        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }

        body
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.to_string(),
                    });
                }
                ResponseContentBlock::Other => {}
            }
        }

        let mut message = Message::assistant(text_content).with_tool_calls(tool_calls);
        message.id = resp.id;

        let finish_reason = resp
            .stop_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or_default();

        ProviderResponse {
            message,
            finish_reason,
            usage: Some(resp.usage.into_usage()),
            model: resp.model,
            metadata: serde_json::Map::new(),
        }
    }
}

#[async_trait]
impl continuum_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(
            provider = "anthropic",
            model = %request.model,
            breakpoints = request.cache_breakpoints.len(),
            "Sending completion request"
        );

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse Anthropic response: {e}")))?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(
            provider = "anthropic",
            model = %request.model,
            breakpoints = request.cache_breakpoints.len(),
            "Sending streaming request"
        );

        let response = self.send(&body, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(forward_sse(response.bytes_stream(), tx));

        Ok(rx)
    }

    fn supports_prompt_caching(&self, model: &str) -> bool {
        let id = model.rsplit('/').next().unwrap_or(model);
        id.to_ascii_lowercase().starts_with("claude")
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        // Minimal request to verify the API key
        let body = serde_json::json!({
            "model": HEALTH_CHECK_MODEL,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        match self.send(&body, false).await {
            Ok(_) => Ok(true),
            Err(e @ ProviderError::AuthenticationFailed(_)) => Err(e),
            Err(e @ ProviderError::Network(_)) => Err(e),
            // Reachable, but refused this particular request.
            Err(_) => Ok(true),
        }
    }
}

/// Decode an SSE byte stream into chunks until `message_stop` or an error.
///
/// Events are framed over raw bytes, so a UTF-8 sequence split across
/// network reads is reassembled before decoding.
async fn forward_sse<S, B, E>(bytes: S, tx: mpsc::Sender<Result<StreamChunk, ProviderError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(bytes.eventsource());
    let mut decoder = StreamDecoder::default();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, event = %event.event, data = %data, "Ignoring unparseable Anthropic SSE");
                continue;
            }
        };

        let Some(item) = decoder.on_event(&payload) else {
            continue;
        };
        let finished = matches!(&item, Ok(chunk) if chunk.done) || item.is_err();
        if tx.send(item).await.is_err() || finished {
            return;
        }
    }

    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "connection closed before message_stop".into(),
        )))
        .await;
}

/// Map a transport failure.
fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Classify a non-2xx response.
async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Anthropic API error");

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);

    match ProviderError::from_status(status, message) {
        ProviderError::RateLimited { retry_after_secs } => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(retry_after_secs),
        },
        other => other,
    }
}

/// Classify an in-stream `error` event by its error type.
fn stream_error(error: &serde_json::Value) -> ProviderError {
    let message = error["message"].as_str().unwrap_or("unknown error").to_string();
    match error["type"].as_str().unwrap_or("") {
        "overloaded_error" => ProviderError::Overloaded(message),
        "rate_limit_error" => ProviderError::RateLimited { retry_after_secs: 5 },
        "timeout_error" => ProviderError::Timeout(message),
        "authentication_error" | "permission_error" => ProviderError::AuthenticationFailed(message),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ProviderError::InvalidRequest(message)
        }
        _ => ProviderError::ApiError {
            status_code: 500,
            message,
        },
    }
}

/// Render message content as API blocks.
fn content_blocks(content: &Content) -> Vec<ApiBlock> {
    match content {
        Content::Text(text) if text.is_empty() => Vec::new(),
        Content::Text(text) => vec![ApiBlock::text(text.clone())],
        Content::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => ApiBlock::text(text.clone()),
                ContentBlock::Image { media_type, data } => ApiBlock::Image {
                    source: ImageSource {
                        kind: "base64".into(),
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                    cache_control: None,
                },
            })
            .collect(),
    }
}

/// Folds Anthropic SSE events into stream chunks.
#[derive(Default)]
struct StreamDecoder {
    pending_tool: Option<MessageToolCall>,
    tool_calls: Vec<MessageToolCall>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
}

impl StreamDecoder {
    /// Handle one event; returns a chunk to forward, if any.
    fn on_event(&mut self, event: &serde_json::Value) -> Option<Result<StreamChunk, ProviderError>> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.prompt_tokens = token_field(usage, "input_tokens");
                self.usage.cache_read_tokens = token_field(usage, "cache_read_input_tokens");
                self.usage.cache_creation_tokens = token_field(usage, "cache_creation_input_tokens");
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.finish_tool();
                    self.pending_tool = Some(MessageToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: String::new(),
                    });
                }
                None
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| Ok(StreamChunk::delta(t))),
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.pending_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.arguments.push_str(partial);
                        }
                        None
                    }
                    _ => None,
                }
            }
            "content_block_stop" => {
                self.finish_tool();
                None
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.finish_reason = Some(FinishReason::parse(reason));
                }
                let output = token_field(&event["usage"], "output_tokens");
                if output > 0 {
                    self.usage.completion_tokens = output;
                }
                None
            }
            "message_stop" => {
                self.finish_tool();
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                Some(Ok(StreamChunk {
                    content: None,
                    tool_calls: std::mem::take(&mut self.tool_calls),
                    finish_reason: Some(self.finish_reason.take().unwrap_or_default()),
                    done: true,
                    usage: Some(self.usage.clone()),
                }))
            }
            "error" => Some(Err(stream_error(&event["error"]))),
            _ => None,
        }
    }

    fn finish_tool(&mut self) {
        if let Some(mut tool) = self.pending_tool.take() {
            if tool.arguments.is_empty() {
                tool.arguments = "{}".into();
            }
            self.tool_calls.push(tool);
        }
    }
}

fn token_field(usage: &serde_json::Value, key: &str) -> u32 {
    usage[key].as_u64().unwrap_or(0) as u32
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<ApiBlock>,
}

impl ApiMessage {
    fn trim_prefill(&mut self) {
        if let Some(ApiBlock::Text { text, .. }) = self.content.last_mut() {
            text.truncate(text.trim_end().len());
            if text.is_empty() {
                self.content.pop();
            }
        }
    }

    fn is_tool_results(&self) -> bool {
        self.content
            .iter()
            .all(|b| matches!(b, ApiBlock::ToolResult { .. }))
    }

    fn mark_cached(&mut self) {
        if let Some(block) = self.content.last_mut() {
            block.mark_cached();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

const EPHEMERAL: CacheControl = CacheControl { kind: "ephemeral" };

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Image {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ApiBlock {
    fn text(text: String) -> Self {
        Self::Text {
            text,
            cache_control: None,
        }
    }

    fn mark_cached(&mut self) {
        let (Self::Text { cache_control, .. }
        | Self::Image { cache_control, .. }
        | Self::ToolUse { cache_control, .. }
        | Self::ToolResult { cache_control, .. }) = self;
        *cache_control = Some(EPHEMERAL);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block type we do not surface.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}

impl AnthropicUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            cache_read_tokens: self.cache_read_input_tokens,
            cache_creation_tokens: self.cache_creation_input_tokens,
        }
    }
}
