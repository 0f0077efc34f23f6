// Family C: cloud-signed transport (Bedrock's Converse/ConverseStream
// RPCs). Unlike Families A and B this adapter never touches `reqwest`
// directly — the request is built, signed, and sent through the AWS
// SDK's own client, which mirrors the Messages-API message model
// (`role`/`content` blocks) but carries payloads as the SDK's
// `Document` type rather than raw JSON text.
//
// The document<->JsonValue conversion follows a unified-message
// conversion pattern common to cross-vendor LLM gateway code, and
// capability detection follows this codebase's name-match-by-prefix
// style generalized to region-prefix stripping.

use crate::error::CompletionError;
use crate::json::JsonValue;
use crate::model::{
    CompletionRequest, CompletionResponse, ContentPart, ModelCapabilities, Role, StopReason,
    StreamCoalescer, StreamEvent, ToolCall, Usage,
};
use crate::provider::Provider;
use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::SdkError;
use aws_sdk_bedrockruntime::operation::converse::ConverseOutput as ConverseResponse;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole, ConverseOutput as ConverseMessageOutput,
    ConverseStreamOutput as ConverseStreamEvent, InferenceConfiguration, Message as SdkMessage,
    StopReason as SdkStopReason, SystemContentBlock, Tool, ToolChoice, ToolConfiguration,
    ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolResultStatus, ToolSpec,
    ToolUseBlock,
};
use aws_smithy_types::{Document, Number as SmithyNumber};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tracing::debug;

pub struct BedrockProvider {
    client: aws_sdk_bedrockruntime::Client,
    model_id: String,
    capabilities: ModelCapabilities,
}

impl BedrockProvider {
    pub fn new(client: aws_sdk_bedrockruntime::Client, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let capabilities = capabilities_for_model(&model_id);
        Self {
            client,
            model_id,
            capabilities,
        }
    }

    /// Builds a client from the standard AWS credential/region chain,
    /// the shape this codebase's config layer uses for every other
    /// ambient-environment-sourced client.
    pub async fn from_env(model_id: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_bedrockruntime::Client::new(&config);
        Self::new(client, model_id)
    }

    fn to_converse_wire(&self, request: &CompletionRequest) -> Result<ConverseWire, CompletionError> {
        let messages = request
            .non_system_messages()
            .map(to_sdk_message)
            .collect::<Result<Vec<_>, _>>()?;

        let system = request.system_text().map(|text| vec![SystemContentBlock::Text(text)]);

        let inference_config = Some(
            InferenceConfiguration::builder()
                .max_tokens(request.config.max_tokens as i32)
                .set_temperature(request.config.temperature)
                .set_top_p(request.config.top_p)
                .set_stop_sequences(if request.config.stop_sequences.is_empty() {
                    None
                } else {
                    Some(request.config.stop_sequences.clone())
                })
                .build(),
        );

        let tool_config = if request.tools.is_empty() {
            None
        } else {
            let tools = request
                .tools
                .iter()
                .map(|t| {
                    let schema = ToolInputSchema::Json(json_to_document(&t.parameters));
                    let spec = ToolSpec::builder()
                        .name(t.name.clone())
                        .description(t.description.clone())
                        .input_schema(schema)
                        .build()
                        .map_err(|e| CompletionError::Other(format!("bedrock tool spec: {e}")))?;
                    Ok(Tool::ToolSpec(spec))
                })
                .collect::<Result<Vec<_>, CompletionError>>()?;

            Some(
                ToolConfiguration::builder()
                    .set_tools(Some(tools))
                    .tool_choice(ToolChoice::Auto(
                        aws_sdk_bedrockruntime::types::AutoToolChoice::builder().build(),
                    ))
                    .build()
                    .map_err(|e| CompletionError::Other(format!("bedrock tool config: {e}")))?,
            )
        };

        Ok(ConverseWire {
            messages,
            system,
            inference_config,
            tool_config,
        })
    }
}

struct ConverseWire {
    messages: Vec<SdkMessage>,
    system: Option<Vec<SystemContentBlock>>,
    inference_config: Option<InferenceConfiguration>,
    tool_config: Option<ToolConfiguration>,
}

#[async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        request.config.stream = false;
        let wire = self.to_converse_wire(&request)?;

        let output = self
            .client
            .converse()
            .model_id(self.model_id.clone())
            .set_messages(Some(wire.messages))
            .set_system(wire.system)
            .set_inference_config(wire.inference_config)
            .set_tool_config(wire.tool_config)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(from_converse_response(&self.model_id, output))
    }

    async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent, CompletionError>>, CompletionError> {
        request.config.stream = true;
        let wire = self.to_converse_wire(&request)?;

        let output = self
            .client
            .converse_stream()
            .model_id(self.model_id.clone())
            .set_messages(Some(wire.messages))
            .set_system(wire.system)
            .set_inference_config(wire.inference_config)
            .set_tool_config(wire.tool_config)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let events = output.stream;
        Ok(stream::unfold(
            (events, StreamCoalescer::new(), false),
            move |(mut events, mut coalescer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match events.recv().await {
                        Ok(Some(event)) => match process_stream_event(event, &mut coalescer) {
                            Emitted::Event(ev) => {
                                let is_done = matches!(ev, StreamEvent::Done(_) | StreamEvent::Error(_));
                                return Some((Ok(ev), (events, coalescer, is_done)));
                            }
                            Emitted::None => continue,
                        },
                        Ok(None) => {
                            let response = std::mem::take(&mut coalescer).finish();
                            return Some((Ok(StreamEvent::Done(response)), (events, coalescer, true)));
                        }
                        Err(e) => {
                            return Some((
                                Err(CompletionError::Other(format!("bedrock stream error: {e}"))),
                                (events, coalescer, true),
                            ));
                        }
                    }
                }
            },
        )
        .boxed())
    }
}

fn classify_sdk_error<E: std::fmt::Debug + std::fmt::Display, R>(err: SdkError<E, R>) -> CompletionError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("throttl") || lower.contains("too many requests") {
        CompletionError::RateLimited { retry_after: None }
    } else if lower.contains("access denied") || lower.contains("unrecognizedclient") {
        CompletionError::InvalidApiKey { provider: "bedrock" }
    } else if lower.contains("validationexception") {
        CompletionError::InvalidRequest(message)
    } else if lower.contains("model not ready") || lower.contains("resourcenotfound") {
        CompletionError::ModelNotFound(message)
    } else {
        CompletionError::Other(format!("bedrock error: {message}"))
    }
}

enum Emitted {
    Event(StreamEvent),
    None,
}

fn process_stream_event(event: ConverseStreamEvent, coalescer: &mut StreamCoalescer) -> Emitted {
    match event {
        ConverseStreamEvent::MessageStart(start) => {
            let ev = StreamEvent::Start {
                id: String::new(),
                model: start.role().as_str().to_string(),
            };
            coalescer.push(&ev);
            Emitted::Event(ev)
        }
        ConverseStreamEvent::ContentBlockStart(start) => {
            let index = start.content_block_index() as usize;
            match start.start() {
                Some(ContentBlockStart::ToolUse(tool_use)) => {
                    let ev = StreamEvent::ToolCallStart {
                        index,
                        id: tool_use.tool_use_id().to_string(),
                        name: tool_use.name().to_string(),
                    };
                    coalescer.push(&ev);
                    Emitted::Event(ev)
                }
                _ => Emitted::None,
            }
        }
        ConverseStreamEvent::ContentBlockDelta(delta_event) => {
            let index = delta_event.content_block_index() as usize;
            match delta_event.delta() {
                Some(ContentBlockDelta::Text(text)) => {
                    let ev = StreamEvent::ContentDelta {
                        index,
                        text: text.clone(),
                    };
                    coalescer.push(&ev);
                    Emitted::Event(ev)
                }
                Some(ContentBlockDelta::ToolUse(tool_delta)) => {
                    let ev = StreamEvent::ToolCallDelta {
                        index,
                        partial_arguments: tool_delta.input().to_string(),
                    };
                    coalescer.push(&ev);
                    Emitted::Event(ev)
                }
                _ => Emitted::None,
            }
        }
        ConverseStreamEvent::ContentBlockStop(stop) => {
            let ev = StreamEvent::ToolCallEnd {
                index: stop.content_block_index() as usize,
            };
            coalescer.push(&ev);
            Emitted::Event(ev)
        }
        ConverseStreamEvent::MessageStop(stop) => {
            coalescer.set_stop_reason(map_stop_reason(stop.stop_reason()));
            Emitted::None
        }
        ConverseStreamEvent::Metadata(metadata) => {
            if let Some(usage) = metadata.usage() {
                coalescer.set_usage(Usage {
                    input_tokens: usage.input_tokens() as u64,
                    output_tokens: usage.output_tokens() as u64,
                    reasoning_tokens: 0,
                    cached_input_tokens: usage.cache_read_input_tokens().unwrap_or(0) as u64,
                });
            }
            Emitted::None
        }
        _ => {
            debug!("unhandled bedrock ConverseStream event variant");
            Emitted::None
        }
    }
}

fn map_stop_reason(reason: &SdkStopReason) -> StopReason {
    match reason {
        SdkStopReason::EndTurn => StopReason::EndTurn,
        SdkStopReason::MaxTokens => StopReason::MaxTokens,
        SdkStopReason::StopSequence => StopReason::StopSequence,
        SdkStopReason::ToolUse => StopReason::ToolUse,
        SdkStopReason::ContentFiltered => StopReason::ContentFiltered,
        _ => StopReason::EndTurn,
    }
}

fn to_sdk_message(message: &crate::model::Message) -> Result<SdkMessage, CompletionError> {
    let role = match message.role {
        Role::Assistant => ConversationRole::Assistant,
        Role::User | Role::Tool | Role::System => ConversationRole::User,
    };

    let content = message
        .content
        .iter()
        .filter_map(|part| to_content_block(part))
        .collect::<Vec<_>>();

    SdkMessage::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(|e| CompletionError::Other(format!("bedrock message build: {e}")))
}

fn to_content_block(part: &ContentPart) -> Option<ContentBlock> {
    match part {
        ContentPart::Text(text) => Some(ContentBlock::Text(text.clone())),
        ContentPart::Image { data, mime_type } => {
            let format = image_format_from_mime(mime_type)?;
            let blob = aws_smithy_types::Blob::new(data.clone());
            let source = aws_sdk_bedrockruntime::types::ImageSource::Bytes(blob);
            let image = aws_sdk_bedrockruntime::types::ImageBlock::builder()
                .format(format)
                .source(source)
                .build()
                .ok()?;
            Some(ContentBlock::Image(image))
        }
        ContentPart::ToolUse { id, name, input } => {
            let tool_use = ToolUseBlock::builder()
                .tool_use_id(id.clone())
                .name(name.clone())
                .input(json_to_document(input))
                .build()
                .ok()?;
            Some(ContentBlock::ToolUse(tool_use))
        }
        ContentPart::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            let status = if *is_error {
                ToolResultStatus::Error
            } else {
                ToolResultStatus::Success
            };
            let result = ToolResultBlock::builder()
                .tool_use_id(tool_call_id.clone())
                .content(ToolResultContentBlock::Text(content.clone()))
                .status(status)
                .build()
                .ok()?;
            Some(ContentBlock::ToolResult(result))
        }
    }
}

fn image_format_from_mime(mime_type: &str) -> Option<aws_sdk_bedrockruntime::types::ImageFormat> {
    use aws_sdk_bedrockruntime::types::ImageFormat;
    match mime_type {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::Webp),
        other => {
            debug!("unsupported bedrock image mime type: {}", other);
            None
        }
    }
}

fn from_converse_response(model: &str, output: ConverseResponse) -> CompletionResponse {
    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(ConverseMessageOutput::Message(message)) = output.output {
        for block in message.content {
            match block {
                ContentBlock::Text(text) => content.push(ContentPart::Text(text)),
                ContentBlock::ToolUse(tool_use) => {
                    tool_calls.push(ToolCall {
                        id: tool_use.tool_use_id().to_string(),
                        name: tool_use.name().to_string(),
                        arguments: serde_json::to_string(&document_to_json(tool_use.input())).unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }
    }

    let stop_reason = map_stop_reason(&output.stop_reason);
    let usage = output.usage;

    CompletionResponse {
        id: String::new(),
        model: model.to_string(),
        content,
        refusal: None,
        tool_calls,
        stop_reason,
        usage: usage
            .map(|u| Usage {
                input_tokens: u.input_tokens() as u64,
                output_tokens: u.output_tokens() as u64,
                reasoning_tokens: 0,
                cached_input_tokens: u.cache_read_input_tokens().unwrap_or(0) as u64,
            })
            .unwrap_or_default(),
    }
}

/// Recursive, lossless `JsonValue` <-> `Document` conversion; unsupported
/// document shapes (there are none in the current `Document` enum, but
/// future SDK variants fall through here) decode to `Null`.
fn document_to_json(doc: &Document) -> JsonValue {
    match doc {
        Document::Null => JsonValue::Null,
        Document::Bool(b) => JsonValue::Bool(*b),
        Document::Number(SmithyNumber::PosInt(n)) => JsonValue::Int(*n as i64),
        Document::Number(SmithyNumber::NegInt(n)) => JsonValue::Int(*n),
        Document::Number(SmithyNumber::Float(f)) => JsonValue::Float(*f),
        Document::String(s) => JsonValue::String(s.clone()),
        Document::Array(items) => JsonValue::Array(items.iter().map(document_to_json).collect()),
        Document::Object(fields) => {
            JsonValue::Object(fields.iter().map(|(k, v)| (k.clone(), document_to_json(v))).collect())
        }
        _ => JsonValue::Null,
    }
}

fn json_to_document(value: &JsonValue) -> Document {
    match value {
        JsonValue::Null => Document::Null,
        JsonValue::Bool(b) => Document::Bool(*b),
        JsonValue::Int(i) if *i >= 0 => Document::Number(SmithyNumber::PosInt(*i as u64)),
        JsonValue::Int(i) => Document::Number(SmithyNumber::NegInt(*i)),
        JsonValue::Float(f) => Document::Number(SmithyNumber::Float(*f)),
        JsonValue::String(s) => Document::String(s.clone()),
        JsonValue::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        JsonValue::Object(fields) => Document::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

fn strip_region_prefix(model_id: &str) -> &str {
    for prefix in ["us.", "eu.", "apac.", "global."] {
        if let Some(rest) = model_id.strip_prefix(prefix) {
            return rest;
        }
    }
    model_id
}

/// Conservative-unless-recognized capability detection: strip the
/// region routing prefix Bedrock adds to cross-region inference
/// profile IDs, then match the remaining model family by substring.
pub fn capabilities_for_model(model_id: &str) -> ModelCapabilities {
    let stripped = strip_region_prefix(model_id);

    if stripped.contains("claude") {
        ModelCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_reasoning: true,
            supports_temperature: true,
            supports_vision: true,
            supports_structured_output: true,
            supports_system_message: true,
            max_context_tokens: 200_000,
            max_output_tokens: 8192,
        }
    } else if stripped.contains("nova") {
        ModelCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_reasoning: false,
            supports_temperature: true,
            supports_vision: true,
            supports_structured_output: false,
            supports_system_message: true,
            max_context_tokens: 300_000,
            max_output_tokens: 5_000,
        }
    } else if stripped.contains("llama") {
        ModelCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_reasoning: false,
            supports_temperature: true,
            supports_vision: false,
            supports_structured_output: false,
            supports_system_message: true,
            max_context_tokens: 128_000,
            max_output_tokens: 4096,
        }
    } else if stripped.contains("mistral") {
        ModelCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_reasoning: false,
            supports_temperature: true,
            supports_vision: false,
            supports_structured_output: false,
            supports_system_message: true,
            max_context_tokens: 32_000,
            max_output_tokens: 4096,
        }
    } else {
        debug!("unrecognized bedrock model family for '{}', using conservative defaults", model_id);
        ModelCapabilities {
            supports_streaming: false,
            supports_tools: false,
            supports_reasoning: false,
            supports_temperature: true,
            supports_vision: false,
            supports_structured_output: false,
            supports_system_message: true,
            max_context_tokens: 4096,
            max_output_tokens: 2048,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_region_prefix_before_matching() {
        let caps = capabilities_for_model("us.anthropic.claude-3-5-sonnet-20241022-v2:0");
        assert!(caps.supports_tools);
        assert_eq!(caps.max_context_tokens, 200_000);
    }

    #[test]
    fn matches_nova_family() {
        let caps = capabilities_for_model("amazon.nova-pro-v1:0");
        assert!(caps.supports_vision);
        assert!(!caps.supports_structured_output);
    }

    #[test]
    fn unknown_family_gets_conservative_defaults() {
        let caps = capabilities_for_model("some-future-vendor.mystery-model-v3");
        assert!(!caps.supports_streaming);
        assert!(!caps.supports_tools);
    }

    #[test]
    fn document_json_round_trip_preserves_shape() {
        let original = JsonValue::object([
            ("name", JsonValue::from("bedrock")),
            ("count", JsonValue::from(7_i64)),
            ("enabled", JsonValue::from(true)),
            ("ratio", JsonValue::from(0.5_f64)),
        ]);
        let doc = json_to_document(&original);
        let back = document_to_json(&doc);
        assert_eq!(original, back);
    }

    #[test]
    fn negative_integers_round_trip_through_document() {
        let original = JsonValue::Int(-42);
        let doc = json_to_document(&original);
        assert_eq!(document_to_json(&doc), original);
    }
}
