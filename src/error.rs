// Error taxonomy for the completion client and MCP coordinator.
//
// Mirrors the closed, matchable error-enum style used elsewhere in this
// codebase (see the API error type) rather than the anyhow::Error the
// transport layer returns internally: callers need to branch on
// `RateLimited`/`ModelRefused`/`ToolTimeout` without string matching.

use crate::retry::RetryableError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a completion request against any provider family.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("invalid API key for provider {provider}")]
    InvalidApiKey { provider: &'static str },

    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("request rejected by model: {reason}")]
    ModelRefused { reason: String },

    #[error("requested capability unavailable: {0}")]
    UnsupportedCapability(String),

    #[error("upstream returned malformed response: {0}")]
    MalformedResponse(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unknown model: {0}")]
    ModelNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("context length exceeded, model allows at most {max_tokens} tokens")]
    ContextLengthExceeded { max_tokens: u32 },

    #[error("failed to decode upstream response: {0}")]
    DecodingError(String),

    #[error("upstream server error: {0}")]
    ServerError(String),

    #[error("{0}")]
    Other(String),
}

impl CompletionError {
    /// Whether a retry policy should consider this error retriable.
    ///
    /// Invalid API keys, malformed requests, and model refusals are
    /// never retriable; rate limits, timeouts, transport failures, and
    /// upstream server errors are.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited { .. }
                | CompletionError::Timeout(_)
                | CompletionError::Transport(_)
                | CompletionError::ServerError(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CompletionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors from the structured-output extraction helper.
#[derive(Error, Debug)]
pub enum StructuredOutputError {
    #[error("model refused the request: {0}")]
    Refused(String),

    #[error("response was truncated at the token limit before a result was produced")]
    TruncatedAtMaxTokens {
        /// Whatever JSON had been produced on the expected channel
        /// (ordinary content in native mode, the matching tool call's
        /// arguments in tool mode) before the truncation cut it off.
        partial_json: String,
    },

    #[error("response had no matching tool call for schema {schema_name}")]
    MissingToolCall { schema_name: String },

    #[error("response had no content to decode")]
    MissingContent,

    #[error("response had no content at all")]
    EmptyResponse,

    #[error("expected a tool call but the model responded with text: {0}")]
    UnexpectedTextResponse(String),

    #[error("expected text content but the model called tool '{0}' instead")]
    UnexpectedToolCall(String),

    #[error("response content was not valid UTF-8")]
    InvalidUtf8,

    #[error("failed to decode response against schema {schema_name}: {source}")]
    SchemaMismatch {
        schema_name: String,
        json: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Errors from the MCP coordinator and its server connections.
#[derive(Error, Debug)]
pub enum McpError {
    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server '{0}' is not connected")]
    NotConnected(String),

    #[error("server '{server}' tool '{name}' timed out after {timeout:?}")]
    ToolTimeout {
        server: String,
        name: String,
        timeout: Duration,
    },

    #[error("unknown tool '{name}' on server '{server}'")]
    UnknownTool { server: String, name: String },

    #[error("server '{0}' rejected the connection handshake: {1}")]
    HandshakeFailed(String, String),

    #[error("failed to connect to server '{0}': {1}")]
    ConnectionFailed(String, String),

    #[error("server process exited unexpectedly: {0}")]
    ProcessExited(String),

    #[error("tool '{name}' on server '{server}' returned an error: {message}")]
    ToolReturnedError {
        server: String,
        name: String,
        message: String,
    },

    #[error("json-rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed wire message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl RetryableError for CompletionError {
    fn is_retriable(&self) -> bool {
        CompletionError::is_retriable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        CompletionError::retry_after(self)
    }
}

impl RetryableError for McpError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_)
                | McpError::Http(_)
                | McpError::ProcessExited(_)
                | McpError::ConnectionFailed(_, _)
        )
    }
}

pub type CompletionResult<T> = Result<T, CompletionError>;
pub type StructuredOutputResult<T> = Result<T, StructuredOutputError>;
pub type McpResult<T> = Result<T, McpError>;
