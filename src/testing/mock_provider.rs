// A `Provider` implementation backed by scripted/recorded exchanges
// rather than a live vendor endpoint. Three matching strategies:
// exact request hash, last-user-message content, or plain sequential
// replay.

use crate::error::{CompletionError, CompletionResult};
use crate::model::{
    CompletionRequest, CompletionResponse, ContentPart, ModelCapabilities, Role, StopReason,
    StreamEvent, Usage,
};
use crate::provider::Provider;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// One scripted request/response pair.
#[derive(Debug, Clone)]
pub struct RecordedExchange {
    pub request_hash: u64,
    pub last_user_text: Option<String>,
    pub response: CompletionResponse,
}

impl RecordedExchange {
    pub fn new(request: &CompletionRequest, response: CompletionResponse) -> Self {
        Self {
            request_hash: hash_request(request),
            last_user_text: last_user_text(request),
            response,
        }
    }
}

fn hash_request(request: &CompletionRequest) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.system.hash(&mut hasher);
    for message in &request.messages {
        message.role.hash(&mut hasher);
        for part in &message.content {
            if let ContentPart::Text(text) = part {
                text.hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

fn last_user_text(request: &CompletionRequest) -> Option<String> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text())
}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
    }
}

/// How an incoming request is paired with a recorded exchange.
#[derive(Debug, Clone, Default)]
pub enum MatchStrategy {
    /// Exact match on every message's role and text content.
    #[default]
    ExactHash,
    /// Match on the last `user` message's text only, ignoring system
    /// prompt, prior turns and tool definitions.
    LastUserMessage,
    /// Ignore request content; replay exchanges in recorded order.
    Sequential,
}

/// A `Provider` that replays [`RecordedExchange`]s instead of calling a
/// vendor endpoint. Useful for exercising retry/coalescing/capability
/// logic deterministically in tests.
pub struct MockProvider {
    name: &'static str,
    capabilities: ModelCapabilities,
    strategy: MatchStrategy,
    exchanges: Vec<RecordedExchange>,
    sequential_index: Mutex<usize>,
    strict: bool,
}

impl MockProvider {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            name: "mock",
            capabilities: default_capabilities(),
            strategy,
            exchanges: Vec::new(),
            sequential_index: Mutex::new(0),
            strict: true,
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Return [`CompletionError::MalformedResponse`] on an unmatched
    /// request rather than a placeholder empty response.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn record(mut self, request: &CompletionRequest, response: CompletionResponse) -> Self {
        self.exchanges.push(RecordedExchange::new(request, response));
        self
    }

    /// Scripts a plain-text reply for any request whose last user
    /// message equals `prompt`, regardless of match strategy state.
    pub fn with_text_reply(self, prompt: impl Into<String>, reply: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let request = CompletionRequest {
            messages: vec![crate::model::Message::user_text(prompt)],
            system: None,
            tools: Vec::new(),
            output_schema: None,
            config: crate::model::CompletionConfig::new("mock", 1024),
        };
        let response = CompletionResponse {
            id: "mock-0".to_string(),
            model: "mock".to_string(),
            content: vec![ContentPart::Text(reply.into())],
            refusal: None,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        };
        self.record(&request, response)
    }

    fn find(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        match self.strategy {
            MatchStrategy::ExactHash => {
                let hash = hash_request(request);
                self.exchanges.iter().find(|e| e.request_hash == hash).map(|e| e.response.clone())
            }
            MatchStrategy::LastUserMessage => {
                let text = last_user_text(request);
                self.exchanges
                    .iter()
                    .find(|e| e.last_user_text == text)
                    .map(|e| e.response.clone())
            }
            MatchStrategy::Sequential => {
                let mut index = self.sequential_index.lock().unwrap();
                let exchange = self.exchanges.get(*index);
                if exchange.is_some() {
                    *index += 1;
                }
                exchange.map(|e| e.response.clone())
            }
        }
    }
}

fn default_capabilities() -> ModelCapabilities {
    ModelCapabilities {
        supports_streaming: true,
        supports_tools: true,
        supports_reasoning: false,
        supports_temperature: true,
        supports_vision: false,
        supports_structured_output: true,
        supports_system_message: true,
        max_context_tokens: 128_000,
        max_output_tokens: 8_192,
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionResponse> {
        match self.find(&request) {
            Some(response) => Ok(response),
            None if self.strict => {
                Err(CompletionError::MalformedResponse("no recorded exchange matches request".to_string()))
            }
            None => Ok(CompletionResponse {
                id: "mock-unmatched".to_string(),
                model: self.name.to_string(),
                content: vec![ContentPart::Text("[mock: no matching exchange]".to_string())],
                refusal: None,
                tool_calls: Vec::new(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            }),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> CompletionResult<BoxStream<'static, CompletionResult<StreamEvent>>> {
        let response = self.complete(request).await?;
        let events = vec![
            Ok(StreamEvent::Start { id: response.id.clone(), model: response.model.clone() }),
            Ok(StreamEvent::ContentDelta { index: 0, text: response.text() }),
            Ok(StreamEvent::Done(response)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompletionConfig, Message};

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user_text(text.to_string())],
            system: None,
            tools: Vec::new(),
            output_schema: None,
            config: CompletionConfig::new("mock", 100),
        }
    }

    fn response(text: &str) -> CompletionResponse {
        CompletionResponse {
            id: "r".to_string(),
            model: "mock".to_string(),
            content: vec![ContentPart::Text(text.to_string())],
            refusal: None,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    #[tokio::test]
    async fn exact_hash_requires_identical_request() {
        let req = request("hello");
        let provider = MockProvider::new(MatchStrategy::ExactHash).record(&req, response("hi"));

        let result = provider.complete(request("hello")).await.unwrap();
        assert_eq!(result.text(), "hi");

        let err = provider.complete(request("goodbye")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn last_user_message_ignores_other_turns() {
        let req = request("what is 2+2?");
        let provider =
            MockProvider::new(MatchStrategy::LastUserMessage).record(&req, response("4"));

        let mut bigger = request("what is 2+2?");
        bigger.messages.insert(0, Message::assistant_text("earlier turn"));
        let result = provider.complete(bigger).await.unwrap();
        assert_eq!(result.text(), "4");
    }

    #[tokio::test]
    async fn sequential_strategy_replays_in_order_then_errors() {
        let provider = MockProvider::new(MatchStrategy::Sequential)
            .record(&request("a"), response("first"))
            .record(&request("b"), response("second"));

        assert_eq!(provider.complete(request("anything")).await.unwrap().text(), "first");
        assert_eq!(provider.complete(request("anything")).await.unwrap().text(), "second");
        assert!(provider.complete(request("anything")).await.is_err());
    }

    #[tokio::test]
    async fn lenient_mode_returns_placeholder_instead_of_erroring() {
        let provider = MockProvider::new(MatchStrategy::ExactHash).with_strict_mode(false);
        let result = provider.complete(request("unscripted")).await.unwrap();
        assert!(result.text().contains("no matching exchange"));
    }

    #[tokio::test]
    async fn with_text_reply_scripts_a_single_turn_response() {
        let provider = MockProvider::new(MatchStrategy::LastUserMessage)
            .with_text_reply("weather?", "it's sunny");
        let result = provider.complete(request("weather?")).await.unwrap();
        assert_eq!(result.text(), "it's sunny");
    }

    #[tokio::test]
    async fn stream_ends_with_done_carrying_the_same_text() {
        let provider = MockProvider::new(MatchStrategy::LastUserMessage)
            .with_text_reply("stream me", "streamed reply");
        use futures::StreamExt;
        let mut events: Vec<_> = provider.stream(request("stream me")).await.unwrap().collect().await;
        let last = events.pop().unwrap().unwrap();
        assert!(matches!(last, StreamEvent::Done(resp) if resp.text() == "streamed reply"));
    }
}
