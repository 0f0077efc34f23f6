// Typed decoding of a completion response against a caller-supplied
// schema, via either of two channels a provider adapter can carry a
// schema over: native JSON mode (the response's ordinary content is
// the JSON) or tool mode (the JSON rides as a synthetic tool call's
// arguments).
//
// Grounded on this codebase's `extract_claude_content_from_tool` /
// `extract_claude_metadata` pair: pull the typed payload out of a tool
// call first, decode metadata second, fail with a specific reason at
// the first rule that applies rather than falling through to a generic
// parse error.

use crate::error::{StructuredOutputError, StructuredOutputResult};
use crate::json::JsonValue;
use crate::model::{CompletionResponse, StopReason, ToolDefinition, Usage};
use crate::schema::JsonSchema;
use serde::de::DeserializeOwned;

/// The decoded value plus enough of the surrounding response for a
/// caller to debug a decoding without re-issuing the request.
#[derive(Debug, Clone)]
pub struct TypedResponse<T> {
    pub data: T,
    pub usage: Usage,
    pub stop_reason: StopReason,
    pub raw_json: String,
}

/// Builds the synthetic tool a tool-mode extraction asks the adapter
/// to offer the model: its `inputSchema` is exactly `T`'s schema, so
/// the first matching tool call's arguments are the JSON to decode.
pub fn tool_for<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters: T::json_schema(),
    }
}

/// Native mode: the response's ordinary text content is expected to be
/// the JSON itself (the request that produced it should have carried
/// `outputSchema`).
pub fn extract_native<T: DeserializeOwned>(
    response: &CompletionResponse,
) -> StructuredOutputResult<TypedResponse<T>> {
    if let Some(reason) = &response.refusal {
        return Err(StructuredOutputError::Refused(reason.clone()));
    }
    if response.stop_reason == StopReason::MaxTokens {
        return Err(StructuredOutputError::TruncatedAtMaxTokens { partial_json: response.text() });
    }

    let content = response.text();
    if content.is_empty() {
        return Err(match response.tool_calls.first() {
            Some(call) => StructuredOutputError::UnexpectedToolCall(call.name.clone()),
            None => StructuredOutputError::EmptyResponse,
        });
    }

    decode(&content, &response.usage, response.stop_reason)
}

/// Tool mode: the first call to `tool_name` carries the JSON as its
/// arguments.
pub fn extract_tool<T: DeserializeOwned>(
    response: &CompletionResponse,
    tool_name: &str,
) -> StructuredOutputResult<TypedResponse<T>> {
    if let Some(reason) = &response.refusal {
        return Err(StructuredOutputError::Refused(reason.clone()));
    }
    if response.stop_reason == StopReason::MaxTokens {
        let partial_json = response
            .tool_calls
            .iter()
            .find(|c| c.name == tool_name)
            .map(|c| c.arguments.clone())
            .unwrap_or_default();
        return Err(StructuredOutputError::TruncatedAtMaxTokens { partial_json });
    }

    let call = response.tool_calls.iter().find(|c| c.name == tool_name);
    let arguments = match call {
        Some(call) => &call.arguments,
        None => {
            let content = response.text();
            return Err(if content.is_empty() {
                StructuredOutputError::EmptyResponse
            } else {
                StructuredOutputError::UnexpectedTextResponse(content)
            });
        }
    };

    decode(arguments, &response.usage, response.stop_reason)
}

fn decode<T: DeserializeOwned>(
    json: &str,
    usage: &Usage,
    stop_reason: StopReason,
) -> StructuredOutputResult<TypedResponse<T>> {
    let value = JsonValue::from_str(json).map_err(|_| StructuredOutputError::InvalidUtf8)?;
    let data: T = serde_json::from_value(value.to_serde_value()).map_err(|source| {
        StructuredOutputError::SchemaMismatch {
            schema_name: std::any::type_name::<T>().to_string(),
            json: json.to_string(),
            source,
        }
    })?;

    Ok(TypedResponse {
        data,
        usage: *usage,
        stop_reason,
        raw_json: json.to_string(),
    })
}
