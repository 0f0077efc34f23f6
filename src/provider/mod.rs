// Provider adapter layer: translates the canonical completion model
// into each vendor's wire shape and back.
//
// Three wire families are supported, mirroring the three independent
// hand-rolled clients already present in this codebase (a Messages-API
// style client, a chat-completions style client, and room for a
// cloud-signed-transport client that neither implements):
//
// - `anthropic`: Messages API shape, SSE with named event types.
// - `openai`: chat-completions and responses sub-APIs, SSE `data:` lines
//   terminated by a `[DONE]` sentinel.
// - `bedrock`: cloud-signed request transport.

pub mod anthropic;
pub mod bedrock;
pub mod openai;
pub mod transport;

pub use transport::{CachedModelList, ModelInfo, ProviderTransport};

use crate::error::CompletionResult;
use crate::model::{CompletionRequest, CompletionResponse, ModelCapabilities, StreamEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Implemented once per wire family. A `Provider` owns its own HTTP
/// client and credentials; callers never see the underlying request
/// builder.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ModelCapabilities;

    async fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionResponse>;

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> CompletionResult<BoxStream<'static, CompletionResult<StreamEvent>>>;
}
