// Pre-flight validation against a model's advertised capabilities.
//
// Same shape as the config validation pattern used for the DeepSeek/
// OpenAI provider configs (`validate()` returning a descriptive error
// before a single byte goes over the wire) generalized from "is this
// config internally consistent" to "does this request fit what the
// target model supports".

use crate::error::CompletionError;
use crate::model::{CompletionRequest, ContentPart, ModelCapabilities, Role};

/// Reject a request before it reaches the network if it asks for
/// something the model's capabilities don't advertise. No request
/// that fails this gate is ever sent.
pub fn gate_request(
    caps: &ModelCapabilities,
    request: &CompletionRequest,
) -> Result<(), CompletionError> {
    if request.config.stream && !caps.supports_streaming {
        return Err(CompletionError::UnsupportedCapability(
            "model does not support streaming".to_string(),
        ));
    }

    if request.config.temperature.is_some() && !caps.supports_temperature {
        return Err(CompletionError::UnsupportedCapability(format!(
            "temperature not supported by {}",
            request.config.model
        )));
    }

    if !request.tools.is_empty() && !caps.supports_tools {
        return Err(CompletionError::UnsupportedCapability(
            "model does not support tool calling".to_string(),
        ));
    }

    if request.output_schema.is_some() && !caps.supports_structured_output {
        return Err(CompletionError::UnsupportedCapability(
            "model does not support structured output".to_string(),
        ));
    }

    let has_system_message = request.system.is_some()
        || request.messages.iter().any(|m| m.role == Role::System);
    if has_system_message && !caps.supports_system_message {
        return Err(CompletionError::UnsupportedCapability(
            "model does not support a system message".to_string(),
        ));
    }

    let has_image = request
        .messages
        .iter()
        .flat_map(|m| m.content.iter())
        .any(|part| matches!(part, ContentPart::Image { .. }));
    if has_image && !caps.supports_vision {
        return Err(CompletionError::UnsupportedCapability(
            "model does not support image content".to_string(),
        ));
    }

    if request.config.max_tokens > caps.max_output_tokens {
        return Err(CompletionError::UnsupportedCapability(format!(
            "requested max_tokens {} exceeds model limit {}",
            request.config.max_tokens, caps.max_output_tokens
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompletionConfig;

    fn caps(streaming: bool, tools: bool, max_output: u32) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: streaming,
            supports_tools: tools,
            supports_reasoning: false,
            supports_temperature: true,
            supports_vision: true,
            supports_structured_output: true,
            supports_system_message: true,
            max_context_tokens: 200_000,
            max_output_tokens: max_output,
        }
    }

    #[test]
    fn rejects_tools_when_unsupported() {
        use crate::json::JsonValue;
        use crate::model::ToolDefinition;

        let config = CompletionConfig::new("model-x", 100);
        let tool = ToolDefinition {
            name: "lookup".to_string(),
            description: "look something up".to_string(),
            parameters: JsonValue::Object(Default::default()),
        };
        let request = CompletionRequest::new(config, vec![]).with_tools(vec![tool]);

        let result = gate_request(&caps(true, false, 4096), &request);
        assert!(matches!(
            result,
            Err(CompletionError::UnsupportedCapability(_))
        ));
    }

    #[test]
    fn rejects_output_schema_when_unsupported() {
        use crate::json::JsonValue;

        let config = CompletionConfig::new("model-x", 100);
        let mut request = CompletionRequest::new(config, vec![]);
        request.output_schema = Some(JsonValue::Object(Default::default()));

        let mut no_structured = caps(true, true, 4096);
        no_structured.supports_structured_output = false;

        let result = gate_request(&no_structured, &request);
        assert!(matches!(
            result,
            Err(CompletionError::UnsupportedCapability(_))
        ));
    }

    #[test]
    fn rejects_vision_when_unsupported() {
        use crate::model::{ContentPart, Message};

        let config = CompletionConfig::new("model-x", 100);
        let request = CompletionRequest::new(
            config,
            vec![Message::user(vec![ContentPart::Image {
                data: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
            }])],
        );

        let mut no_vision = caps(true, true, 4096);
        no_vision.supports_vision = false;

        let result = gate_request(&no_vision, &request);
        assert!(matches!(
            result,
            Err(CompletionError::UnsupportedCapability(_))
        ));
    }

    #[test]
    fn rejects_streaming_when_unsupported() {
        let mut config = CompletionConfig::new("model-x", 100);
        config.stream = true;
        let request = CompletionRequest::new(config, vec![]);

        let result = gate_request(&caps(false, true, 4096), &request);
        assert!(matches!(
            result,
            Err(CompletionError::UnsupportedCapability(_))
        ));
    }

    #[test]
    fn rejects_max_tokens_above_model_limit() {
        let config = CompletionConfig::new("model-x", 100_000);
        let request = CompletionRequest::new(config, vec![]);

        let result = gate_request(&caps(true, true, 4096), &request);
        assert!(result.is_err());
    }

    #[test]
    fn allows_request_within_capabilities() {
        let config = CompletionConfig::new("model-x", 1024);
        let request = CompletionRequest::new(config, vec![]);

        assert!(gate_request(&caps(true, true, 4096), &request).is_ok());
    }
}
