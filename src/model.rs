// Canonical request/response model shared by every provider adapter.
//
// Generalizes three independent, provider-shaped message types found
// in this codebase's LLM client code: the flat `role`/`content` struct
// used by the completion providers, the richer multi-part message
// used by the advisory streaming clients, and a cross-vendor unified
// request design referenced for field coverage. Every adapter
// translates its wire format into this shape and back; nothing outside
// `provider/` ever sees a provider-specific type.

use crate::json::JsonValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image {
        data: Vec<u8>,
        mime_type: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: JsonValue,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: parts,
        }
    }

    pub fn user_image(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Image {
                data,
                mime_type: mime_type.into(),
            }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: calls
                .into_iter()
                .map(|c| ContentPart::ToolUse {
                    id: c.id,
                    name: c.name,
                    input: JsonValue::from_str(&c.arguments).unwrap_or(JsonValue::Null),
                })
                .collect(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenation of every text part, used where callers want a
    /// flat transcript rather than the structured parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// `arguments` is the raw JSON text the model produced, never pre-parsed
/// on the wire path — callers that need a structured view parse it
/// themselves via [`JsonValue::from_str`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub stream: bool,
    /// Adapter-neutral extras carried through to whichever provider
    /// understands them; adapters that don't support a field simply
    /// omit it from the wire request rather than erroring.
    pub store: Option<bool>,
    pub prompt_cache_key: Option<String>,
    pub prompt_cache_retention: Option<String>,
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
            stream: false,
            store: None,
            prompt_cache_key: None,
            prompt_cache_retention: None,
        }
    }
}

/// `{messages, tools?, outputSchema?, config}`. `messages` must be
/// non-empty; adapters don't enforce this themselves, callers are
/// expected to go through [`crate::capability::gate_request`] first.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Present alongside `messages` for backward-compatible callers
    /// that set a top-level system string instead of a `Role::System`
    /// message; adapters concatenate this with any `Role::System`
    /// messages found in `messages` when extracting the system prompt.
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    /// When set, the caller wants the response's content to validate
    /// against this JSON-Schema fragment (native structured-output
    /// mode); see [`crate::structured`].
    pub output_schema: Option<JsonValue>,
    pub config: CompletionConfig,
}

impl CompletionRequest {
    pub fn new(config: CompletionConfig, messages: Vec<Message>) -> Self {
        Self {
            messages,
            system: None,
            tools: Vec::new(),
            output_schema: None,
            config,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_output_schema(mut self, schema: JsonValue) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Concatenation of `system` plus every `Role::System` message's
    /// text, in the order they'd be encountered.
    pub fn system_text(&self) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(s) = &self.system {
            parts.push(s.as_str());
        }
        let texts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect();
        for t in &texts {
            parts.push(t.as_str());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Every message that isn't a system message, the shape every
    /// adapter's `messages` wire field expects.
    pub fn non_system_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    ContentFiltered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_input_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentPart>,
    /// Set when the model declined to answer rather than producing
    /// ordinary content; [`crate::structured`] checks this before
    /// attempting to decode anything.
    pub refusal: Option<String>,
    /// Invariant: non-empty only when `stop_reason == ToolUse`.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Streaming events emitted by a provider adapter mid-completion.
/// `Done` is always the final event for a given stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Start { id: String, model: String },
    ContentDelta { index: usize, text: String },
    ToolCallStart { index: usize, id: String, name: String },
    ToolCallDelta { index: usize, partial_arguments: String },
    ToolCallEnd { index: usize },
    Done(CompletionResponse),
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub supports_temperature: bool,
    pub supports_vision: bool,
    pub supports_structured_output: bool,
    pub supports_system_message: bool,
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
}

/// Accumulates a `StreamEvent` sequence into the final `CompletionResponse`
/// it implies, for adapters (the chat-completions API, notably) whose
/// upstream never sends a single terminal object with the full content.
///
/// `content-delta concatenation == done.content` and
/// `per-tool-call delta concatenation == final arguments` are the two
/// invariants this type exists to guarantee.
#[derive(Debug, Default)]
pub struct StreamCoalescer {
    id: String,
    model: String,
    text_by_index: Vec<(usize, String)>,
    tool_calls: Vec<PartialToolCall>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    refusal: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

impl StreamCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    pub fn set_refusal(&mut self, reason: impl Into<String>) {
        self.refusal = Some(reason.into());
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            StreamEvent::ContentDelta { index, text } => {
                match self.text_by_index.iter_mut().find(|(i, _)| i == index) {
                    Some((_, existing)) => existing.push_str(text),
                    None => self.text_by_index.push((*index, text.clone())),
                }
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                self.tool_calls.push(PartialToolCall {
                    index: *index,
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
            }
            StreamEvent::ToolCallDelta {
                index,
                partial_arguments,
            } => {
                if let Some(tc) = self.tool_calls.iter_mut().find(|t| t.index == *index) {
                    tc.arguments.push_str(partial_arguments);
                }
            }
            StreamEvent::ToolCallEnd { .. } => {}
            StreamEvent::Done(_) | StreamEvent::Error(_) => {}
        }
    }

    /// Finalize into a `CompletionResponse`. Tool-call argument strings
    /// that fail to parse as JSON become `JsonValue::Null` rather than
    /// panicking; callers inspect `stop_reason` to know whether
    /// truncation at `max_tokens` is the likely cause.
    pub fn finish(mut self) -> CompletionResponse {
        self.text_by_index.sort_by_key(|(i, _)| *i);
        let content = self
            .text_by_index
            .into_iter()
            .map(|(_, text)| ContentPart::Text(text))
            .collect();

        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.name,
                arguments: tc.arguments,
            })
            .collect();

        CompletionResponse {
            id: self.id,
            model: self.model,
            content,
            refusal: self.refusal,
            tool_calls,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_content_deltas_in_order() {
        let mut coalescer = StreamCoalescer::new();
        coalescer.push(&StreamEvent::Start {
            id: "msg_1".into(),
            model: "claude".into(),
        });
        coalescer.push(&StreamEvent::ContentDelta {
            index: 0,
            text: "Hello, ".into(),
        });
        coalescer.push(&StreamEvent::ContentDelta {
            index: 0,
            text: "world!".into(),
        });
        coalescer.set_stop_reason(StopReason::EndTurn);

        let response = coalescer.finish();
        assert_eq!(response.text(), "Hello, world!");
    }

    #[test]
    fn coalesces_tool_call_argument_deltas() {
        let mut coalescer = StreamCoalescer::new();
        coalescer.push(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "search".into(),
        });
        coalescer.push(&StreamEvent::ToolCallDelta {
            index: 0,
            partial_arguments: r#"{"query":"#.into(),
        });
        coalescer.push(&StreamEvent::ToolCallDelta {
            index: 0,
            partial_arguments: r#""rust"}"#.into(),
        });
        coalescer.push(&StreamEvent::ToolCallEnd { index: 0 });

        let response = coalescer.finish();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn tool_call_with_no_deltas_has_empty_string_arguments() {
        let mut coalescer = StreamCoalescer::new();
        coalescer.push(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "ping".into(),
        });
        coalescer.push(&StreamEvent::ToolCallEnd { index: 0 });

        let response = coalescer.finish();
        assert_eq!(response.tool_calls[0].arguments, "");
    }

    #[test]
    fn message_text_concatenates_text_parts_only() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentPart::Text("part one".into()),
                ContentPart::ToolUse {
                    id: "1".into(),
                    name: "noop".into(),
                    input: JsonValue::Null,
                },
                ContentPart::Text(" part two".into()),
            ],
        };
        assert_eq!(msg.text(), "part one part two");
    }
}
