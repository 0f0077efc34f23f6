// Family B: chat-completions-shaped providers (OpenAI and compatible
// APIs), covering both the `/v1/chat/completions` and `/v1/responses`
// sub-APIs. SSE frames are bare `data: {...}` lines for chat-completions
// (terminated by a literal `data: [DONE]` sentinel) and named `event: `
// lines followed by a `data: ` payload for the responses sub-API.
//
// Grounded directly on this codebase's GPT-5.1 chat-completions client
// (including its streaming loop, which strips `data: ` and special-
// cases `[DONE]`) generalized to cover both sub-APIs and model
// families instead of one hardcoded model string.

use crate::error::CompletionError;
use crate::json::JsonValue;
use crate::model::{
    CompletionConfig, CompletionRequest, CompletionResponse, ContentPart, ModelCapabilities,
    Role, StopReason, StreamCoalescer, StreamEvent, ToolCall, Usage,
};
use crate::provider::Provider;
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Which OpenAI sub-API to speak. Both share SSE-based streaming but
/// disagree on request/response shape entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVariant {
    ChatCompletions,
    Responses,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    variant: ApiVariant,
    capabilities: ModelCapabilities,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        variant: ApiVariant,
    ) -> Result<Self, CompletionError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(CompletionError::InvalidApiKey { provider: "openai" });
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(CompletionError::Transport)?;

        let model = model.into();
        // Newer "reasoning" models (o1/o3/gpt-5/gpt-4.1 family) use
        // max_completion_tokens and drop sampling-temperature support;
        // older chat models keep the legacy fields.
        let is_reasoning_family = model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("gpt-5")
            || model.starts_with("gpt-4.1");

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            variant,
            capabilities: ModelCapabilities {
                supports_streaming: true,
                supports_tools: true,
                supports_reasoning: is_reasoning_family,
                supports_temperature: !is_reasoning_family,
                supports_vision: true,
                supports_structured_output: true,
                supports_system_message: true,
                max_context_tokens: 128_000,
                max_output_tokens: 16_384,
            },
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn is_reasoning_family(&self) -> bool {
        self.capabilities.supports_reasoning
    }

    /// §4.6's sub-API selection rule: once the conversation carries a
    /// tool call or its result, the Responses API's input-item shape
    /// can't round-trip it the way chat-completions can, so the
    /// exchange pins to chat-completions from that point on. A fresh
    /// conversation uses whichever sub-API the caller configured.
    fn resolve_variant(&self, request: &CompletionRequest) -> ApiVariant {
        let has_tool_activity = request.messages.iter().any(|m| {
            m.content.iter().any(|p| {
                matches!(p, ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. })
            })
        });
        if has_tool_activity {
            ApiVariant::ChatCompletions
        } else {
            self.variant
        }
    }

    /// First turn with tools attached forces tool use; once the
    /// conversation already contains a tool call or result, later
    /// turns fall back to letting the model decide.
    fn tool_choice_value(request: &CompletionRequest) -> Option<Value> {
        if request.tools.is_empty() {
            return None;
        }
        let has_prior_tool_activity = request.messages.iter().any(|m| {
            m.content.iter().any(|p| {
                matches!(p, ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. })
            })
        });
        Some(Value::String(
            if has_prior_tool_activity { "auto" } else { "required" }.to_string(),
        ))
    }

    fn response_format_value(request: &CompletionRequest) -> Option<Value> {
        let schema = request.output_schema.as_ref()?;
        Some(serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "schema": schema.to_serde_value(),
                "strict": true,
            }
        }))
    }

    fn to_chat_wire(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::new();
        if let Some(system) = request.system_text() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
                refusal: None,
            });
        }
        for message in request.non_system_messages() {
            messages.push(to_wire_message(message));
        }

        let tools = request
            .tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: serde_json::to_value(&t.parameters).unwrap_or(Value::Null),
                },
            })
            .collect::<Vec<_>>();

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice: Self::tool_choice_value(request),
            temperature: if self.is_reasoning_family() {
                None
            } else {
                request.config.temperature
            },
            max_tokens: if self.is_reasoning_family() {
                None
            } else {
                Some(request.config.max_tokens)
            },
            max_completion_tokens: if self.is_reasoning_family() {
                Some(request.config.max_tokens)
            } else {
                None
            },
            response_format: Self::response_format_value(request),
            stream: Some(request.config.stream),
        }
    }

    fn to_responses_wire(&self, request: &CompletionRequest) -> ResponsesRequest {
        let input = request
            .non_system_messages()
            .map(to_responses_input_message)
            .collect();

        let tools = request
            .tools
            .iter()
            .map(|t| ResponsesTool {
                tool_type: "function".to_string(),
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: serde_json::to_value(&t.parameters).unwrap_or(Value::Null),
            })
            .collect::<Vec<_>>();

        ResponsesRequest {
            model: self.model.clone(),
            input,
            instructions: request.system_text(),
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice: Self::tool_choice_value(request),
            temperature: if self.is_reasoning_family() {
                None
            } else {
                request.config.temperature
            },
            max_output_tokens: Some(request.config.max_tokens),
            text: request.output_schema.as_ref().map(|schema| ResponseTextFormat {
                format: ResponseTextFormatInner {
                    format_type: "json_schema".to_string(),
                    name: "structured_output".to_string(),
                    schema: schema.to_serde_value(),
                    strict: true,
                },
            }),
            stream: request.config.stream,
        }
    }

    async fn send_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, CompletionError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_error_response(response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        request.config.stream = false;
        match self.resolve_variant(&request) {
            ApiVariant::ChatCompletions => {
                let wire = self.to_chat_wire(&request);
                let response = self.send_json("/chat/completions", &wire).await?;
                let body: ChatCompletionResponse = response.json().await?;
                from_chat_response(body, &self.model)
            }
            ApiVariant::Responses => {
                let wire = self.to_responses_wire(&request);
                let response = self.send_json("/responses", &wire).await?;
                let body: ResponsesResponse = response.json().await?;
                Ok(from_responses_response(body))
            }
        }
    }

    async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent, CompletionError>>, CompletionError> {
        request.config.stream = true;
        match self.resolve_variant(&request) {
            ApiVariant::ChatCompletions => {
                let wire = self.to_chat_wire(&request);
                let response = self.send_json("/chat/completions", &wire).await?;
                let model = self.model.clone();
                Ok(decode_chat_sse(response.bytes_stream(), model).boxed())
            }
            ApiVariant::Responses => {
                let wire = self.to_responses_wire(&request);
                let response = self.send_json("/responses", &wire).await?;
                Ok(decode_responses_sse(response.bytes_stream()).boxed())
            }
        }
    }
}

async fn classify_error_response(response: reqwest::Response) -> CompletionError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(crate::retry::parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    let parsed_message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .map(|e| (e.error.error_type, e.error.message));

    match status.as_u16() {
        401 | 403 => CompletionError::InvalidApiKey { provider: "openai" },
        404 => CompletionError::ModelNotFound(body),
        429 => CompletionError::RateLimited { retry_after },
        408 | 409 => CompletionError::RateLimited { retry_after },
        400 => match &parsed_message {
            Some((ty, msg)) if ty == "context_length_exceeded" => {
                CompletionError::ContextLengthExceeded { max_tokens: 0 }
            }
            Some((_, msg)) => CompletionError::InvalidRequest(msg.clone()),
            None => CompletionError::InvalidRequest(body),
        },
        s if s >= 500 => CompletionError::ServerError(body),
        _ => match parsed_message {
            Some((ty, msg)) => CompletionError::Other(format!("openai error ({}): {}", ty, msg)),
            None => CompletionError::Other(format!("openai returned {}: {}", status, body)),
        },
    }
}

fn image_data_url(data: &[u8], mime_type: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

fn to_wire_message(message: &crate::model::Message) -> ChatMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
    .to_string();

    let tool_call_id = message.content.iter().find_map(|p| match p {
        ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
        _ => None,
    });

    let tool_calls: Vec<ChatToolCall> = message
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolUse { id, name, input } => Some(ChatToolCall {
                id: id.clone(),
                tool_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_default(),
                },
            }),
            _ => None,
        })
        .collect();

    let has_image = message
        .content
        .iter()
        .any(|p| matches!(p, ContentPart::Image { .. }));

    let content = if let Some(result_text) = message.content.iter().find_map(|p| match p {
        ContentPart::ToolResult { content, .. } => Some(content.clone()),
        _ => None,
    }) {
        Some(ChatContent::Text(result_text))
    } else if has_image {
        let parts = message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(text) => Some(ChatContentPart::Text { text: text.clone() }),
                ContentPart::Image { data, mime_type } => Some(ChatContentPart::ImageUrl {
                    image_url: ChatImageUrl {
                        url: image_data_url(data, mime_type),
                    },
                }),
                _ => None,
            })
            .collect();
        Some(ChatContent::Parts(parts))
    } else {
        let text = message.text();
        if text.is_empty() { None } else { Some(ChatContent::Text(text)) }
    };

    ChatMessage {
        role,
        content,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id,
        refusal: None,
    }
}

fn to_responses_input_message(message: &crate::model::Message) -> ResponseInputMessage {
    let role = match message.role {
        Role::System => "user",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
    }
    .to_string();

    let content = message
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text(text) => Some(ResponseInputContent::InputText { text: text.clone() }),
            ContentPart::Image { data, mime_type } => Some(ResponseInputContent::InputImage {
                image_url: image_data_url(data, mime_type),
            }),
            ContentPart::ToolResult { content, .. } => {
                Some(ResponseInputContent::InputText { text: content.clone() })
            }
            ContentPart::ToolUse { .. } => None,
        })
        .collect();

    ResponseInputMessage { role, content }
}

fn from_chat_response(
    response: ChatCompletionResponse,
    model: &str,
) -> Result<CompletionResponse, CompletionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::MalformedResponse("no choices in response".to_string()))?;

    let mut content = Vec::new();
    if let Some(ChatContent::Text(text)) = choice.message.content {
        content.push(ContentPart::Text(text));
    }

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        Some("content_filter") => StopReason::ContentFiltered,
        _ => StopReason::EndTurn,
    };

    let usage = response.usage.unwrap_or_default();

    Ok(CompletionResponse {
        id: response.id,
        model: model.to_string(),
        content,
        refusal: choice.message.refusal,
        tool_calls,
        stop_reason,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
            cached_input_tokens: usage
                .prompt_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or(0),
        },
    })
}

fn from_responses_response(response: ResponsesResponse) -> CompletionResponse {
    let mut content = Vec::new();
    let mut refusal = None;
    let mut tool_calls = Vec::new();

    for item in &response.output {
        match item {
            ResponseOutputItem::Message { content: parts, .. } => {
                for part in parts {
                    match part {
                        ResponseOutputContent::OutputText { text } => {
                            content.push(ContentPart::Text(text.clone()))
                        }
                        ResponseOutputContent::Refusal { refusal: reason } => {
                            refusal = Some(reason.clone())
                        }
                    }
                }
            }
            ResponseOutputItem::FunctionCall { call_id, name, arguments, .. } => {
                tool_calls.push(ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            ResponseOutputItem::Reasoning {} | ResponseOutputItem::Other => {}
        }
    }

    let stop_reason = if !tool_calls.is_empty() {
        StopReason::ToolUse
    } else {
        match response.status.as_deref() {
            Some("completed") => StopReason::EndTurn,
            Some("incomplete")
                if response
                    .incomplete_details
                    .as_ref()
                    .and_then(|d| d.reason.as_deref())
                    == Some("max_output_tokens") =>
            {
                StopReason::MaxTokens
            }
            _ => StopReason::EndTurn,
        }
    };

    let usage = response.usage.unwrap_or_default();

    CompletionResponse {
        id: response.id,
        model: response.model,
        content,
        refusal,
        tool_calls,
        stop_reason,
        usage: Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage
                .output_tokens_details
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
            cached_input_tokens: usage
                .input_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or(0),
        },
    }
}

/// `chat-completions` streaming carries only incremental deltas with
/// no terminal object, so this decoder emits `Start`/`ContentDelta`/
/// `ToolCall*` events and synthesizes `Done` itself once `[DONE]`
/// arrives, using a `StreamCoalescer` to reconstruct the final
/// response the caller would otherwise have to accumulate by hand.
fn decode_chat_sse(
    byte_stream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
    model: String,
) -> impl futures::Stream<Item = Result<StreamEvent, CompletionError>> {
    struct State {
        buffer: String,
        stream: std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<Bytes>> + Send>>,
        coalescer: StreamCoalescer,
        started: bool,
        model: String,
        done: bool,
    }

    let initial = State {
        buffer: String::new(),
        stream: Box::pin(byte_stream),
        coalescer: StreamCoalescer::new(),
        started: false,
        model,
        done: false,
    };

    stream::unfold(initial, move |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            if let Some(pos) = state.buffer.find('\n') {
                let line = state.buffer[..pos].trim_end_matches('\r').to_string();
                state.buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };

                if data == "[DONE]" {
                    let response = std::mem::take(&mut state.coalescer).finish();
                    state.done = true;
                    return Some((Ok(StreamEvent::Done(response)), state));
                }

                if !state.started {
                    state.started = true;
                    let start = StreamEvent::Start {
                        id: String::new(),
                        model: state.model.clone(),
                    };
                    state.coalescer.push(&start);
                    // Fall through: still need to process this chunk's
                    // own event below, so stash it by re-prepending is
                    // wasteful; instead emit Start now and process the
                    // chunk on the next poll by re-inserting the line.
                    state.buffer.insert_str(0, &format!("data: {}\n", data));
                    return Some((Ok(start), state));
                }

                match serde_json::from_str::<ChatCompletionChunk>(data) {
                    Ok(chunk) => {
                        if let Some(event) = first_event_from_chunk(chunk) {
                            state.coalescer.push(&event);
                            return Some((Ok(event), state));
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!("failed to parse openai SSE chunk: {}", e);
                        continue;
                    }
                }
            }

            match state.stream.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(CompletionError::Transport(e)), state));
                }
                None => return None,
            }
        }
    })
}

fn first_event_from_chunk(chunk: ChatCompletionChunk) -> Option<StreamEvent> {
    let choice = chunk.choices.into_iter().next()?;
    if let Some(text) = choice.delta.content {
        return Some(StreamEvent::ContentDelta { index: 0, text });
    }
    if let Some(tool_calls) = choice.delta.tool_calls {
        if let Some(tc) = tool_calls.into_iter().next() {
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    return Some(StreamEvent::ToolCallStart {
                        index: tc.index,
                        id: tc.id.unwrap_or_default(),
                        name,
                    });
                }
                if let Some(args) = function.arguments {
                    return Some(StreamEvent::ToolCallDelta {
                        index: tc.index,
                        partial_arguments: args,
                    });
                }
            }
        }
    }
    None
}

/// The responses sub-API frames each chunk as a named `event: ` line
/// followed by a `data: ` JSON payload. The authoritative final
/// response rides along on `response.completed`, so rather than
/// re-accumulate content from deltas this decoder emits deltas for
/// progressive rendering and builds `Done` from that terminal object.
fn decode_responses_sse(
    byte_stream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
) -> impl futures::Stream<Item = Result<StreamEvent, CompletionError>> {
    struct State {
        buffer: String,
        stream: std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<Bytes>> + Send>>,
        pending_event: Option<String>,
        done: bool,
        // Maps a function-call output item's `item_id` to the tool-call
        // index it was announced under, so later
        // `response.function_call_arguments.delta` events (which only
        // carry `item_id`) know which call they belong to. Deltas for an
        // `item_id` never announced via `response.output_item.added` are
        // dropped.
        tool_call_items: std::collections::HashMap<String, usize>,
    }

    let initial = State {
        buffer: String::new(),
        stream: Box::pin(byte_stream),
        pending_event: None,
        done: false,
        tool_call_items: std::collections::HashMap::new(),
    };

    stream::unfold(initial, move |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            if let Some(pos) = state.buffer.find('\n') {
                let line = state.buffer[..pos].trim_end_matches('\r').to_string();
                state.buffer.drain(..=pos);

                if let Some(name) = line.strip_prefix("event: ") {
                    state.pending_event = Some(name.to_string());
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Some(event_name) = state.pending_event.take() else {
                    continue;
                };

                match event_name.as_str() {
                    "response.output_text.delta" => {
                        if let Ok(payload) = serde_json::from_str::<ResponsesSseDelta>(data) {
                            if let Some(text) = payload.delta {
                                return Some((
                                    Ok(StreamEvent::ContentDelta { index: 0, text }),
                                    state,
                                ));
                            }
                        }
                        continue;
                    }
                    "response.output_item.added" => {
                        if let Ok(payload) =
                            serde_json::from_str::<ResponsesSseOutputItemAdded>(data)
                        {
                            if payload.item.item_type == "function_call" {
                                let index = state.tool_call_items.len();
                                state.tool_call_items.insert(payload.item.id.clone(), index);
                                return Some((
                                    Ok(StreamEvent::ToolCallStart {
                                        index,
                                        id: payload.item.call_id.unwrap_or_default(),
                                        name: payload.item.name.unwrap_or_default(),
                                    }),
                                    state,
                                ));
                            }
                        }
                        continue;
                    }
                    "response.function_call_arguments.delta" => {
                        if let Ok(payload) =
                            serde_json::from_str::<ResponsesSseFunctionCallDelta>(data)
                        {
                            if let Some(&index) = state.tool_call_items.get(&payload.item_id) {
                                if let Some(delta) = payload.delta {
                                    return Some((
                                        Ok(StreamEvent::ToolCallDelta {
                                            index,
                                            partial_arguments: delta,
                                        }),
                                        state,
                                    ));
                                }
                            }
                        }
                        continue;
                    }
                    "response.completed" => {
                        match serde_json::from_str::<ResponsesSseCompleted>(data) {
                            Ok(payload) => {
                                state.done = true;
                                let response = from_responses_response(payload.response);
                                return Some((Ok(StreamEvent::Done(response)), state));
                            }
                            Err(e) => {
                                warn!("failed to parse responses completed payload: {}", e);
                                continue;
                            }
                        }
                    }
                    "response.failed" | "error" => {
                        let message = serde_json::from_str::<ResponsesSseFailed>(data)
                            .ok()
                            .and_then(|p| p.response)
                            .and_then(|r| r.error)
                            .map(|e| e.message)
                            .unwrap_or_else(|| "responses stream failed".to_string());
                        state.done = true;
                        return Some((Ok(StreamEvent::Error(message)), state));
                    }
                    other => {
                        debug!("unhandled responses SSE event type: {}", other);
                        continue;
                    }
                }
            }

            match state.stream.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(CompletionError::Transport(e)), state));
                }
                None => return None,
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refusal: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    delta: ChatDelta,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatDeltaToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChatDeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct ChatDeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ResponseInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<ResponseTextFormat>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ResponsesTool {
    #[serde(rename = "type")]
    tool_type: String,
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ResponseTextFormat {
    format: ResponseTextFormatInner,
}

#[derive(Debug, Serialize)]
struct ResponseTextFormatInner {
    #[serde(rename = "type")]
    format_type: String,
    name: String,
    schema: Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct ResponseInputMessage {
    role: String,
    content: Vec<ResponseInputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseInputContent {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesResponse {
    id: String,
    model: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    output: Vec<ResponseOutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseOutputItem {
    Message {
        #[serde(default)]
        content: Vec<ResponseOutputContent>,
    },
    Reasoning {},
    FunctionCall {
        #[serde(default)]
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseOutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<ResponsesInputTokenDetails>,
    #[serde(default)]
    output_tokens_details: Option<ResponsesOutputTokenDetails>,
}

#[derive(Debug, Deserialize)]
struct ResponsesInputTokenDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputTokenDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseDelta {
    #[serde(default)]
    delta: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseOutputItemAdded {
    item: ResponsesSseOutputItemSummary,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseOutputItemSummary {
    id: String,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseFunctionCallDelta {
    item_id: String,
    #[serde(default)]
    delta: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseCompleted {
    response: ResponsesResponse,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseFailed {
    #[serde(default)]
    response: Option<ResponsesFailedResponse>,
}

#[derive(Debug, Deserialize)]
struct ResponsesFailedResponse {
    #[serde(default)]
    error: Option<ResponsesSseError>,
}

#[derive(Debug, Deserialize)]
struct ResponsesSseError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    #[test]
    fn reasoning_family_uses_max_completion_tokens() {
        let provider = OpenAiProvider::new("key", "gpt-5.1", ApiVariant::ChatCompletions).unwrap();
        let config = CompletionConfig::new("gpt-5.1", 512);
        let request = CompletionRequest::new(config, vec![Message::user_text("hi")]);

        let wire = provider.to_chat_wire(&request);
        assert_eq!(wire.max_completion_tokens, Some(512));
        assert_eq!(wire.max_tokens, None);
    }

    #[test]
    fn legacy_chat_model_uses_max_tokens() {
        let provider = OpenAiProvider::new("key", "gpt-4o", ApiVariant::ChatCompletions).unwrap();
        let config = CompletionConfig::new("gpt-4o", 512);
        let request = CompletionRequest::new(config, vec![Message::user_text("hi")]);

        let wire = provider.to_chat_wire(&request);
        assert_eq!(wire.max_tokens, Some(512));
        assert_eq!(wire.max_completion_tokens, None);
    }

    #[test]
    fn gpt_4_1_is_reasoning_family() {
        let provider = OpenAiProvider::new("key", "gpt-4.1", ApiVariant::ChatCompletions).unwrap();
        assert!(provider.capabilities().supports_reasoning);
        assert!(!provider.capabilities().supports_temperature);
    }

    #[test]
    fn rejects_empty_api_key() {
        let result = OpenAiProvider::new("", "gpt-4o", ApiVariant::ChatCompletions);
        assert!(matches!(
            result,
            Err(CompletionError::InvalidApiKey { .. })
        ));
    }

    #[test]
    fn tool_activity_forces_chat_completions_variant() {
        use crate::model::ToolCall;

        let provider = OpenAiProvider::new("key", "gpt-4o", ApiVariant::Responses).unwrap();
        let config = CompletionConfig::new("gpt-4o", 512);
        let messages = vec![
            Message::user_text("search for rust crates"),
            Message::assistant_tool_calls(vec![ToolCall {
                id: "call_1".to_string(),
                name: "search".to_string(),
                arguments: "{}".to_string(),
            }]),
            Message::tool_result("call_1", "results", false),
        ];
        let request = CompletionRequest::new(config, messages);

        assert_eq!(provider.resolve_variant(&request), ApiVariant::ChatCompletions);
    }

    #[test]
    fn plain_conversation_keeps_configured_responses_variant() {
        let provider = OpenAiProvider::new("key", "gpt-4o", ApiVariant::Responses).unwrap();
        let config = CompletionConfig::new("gpt-4o", 512);
        let request = CompletionRequest::new(config, vec![Message::user_text("hi")]);

        assert_eq!(provider.resolve_variant(&request), ApiVariant::Responses);
    }

    #[test]
    fn tool_choice_required_on_first_turn_with_tools() {
        use crate::json::JsonValue;
        use crate::model::ToolDefinition;

        let config = CompletionConfig::new("gpt-4o", 512);
        let tool = ToolDefinition {
            name: "search".to_string(),
            description: "search".to_string(),
            parameters: JsonValue::Object(Default::default()),
        };
        let request = CompletionRequest::new(config, vec![Message::user_text("hi")])
            .with_tools(vec![tool]);

        let choice = OpenAiProvider::tool_choice_value(&request);
        assert_eq!(choice, Some(Value::String("required".to_string())));
    }
}
