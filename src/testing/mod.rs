// Test tooling: a recording-based mock `Provider` for exercising
// completion/streaming call sites without a live API key.
//
// Grounded on the recorded-exchange replay provider this codebase used
// for its own LLM-provider tests, retargeted from that provider's
// bespoke message/response types onto this crate's canonical
// `CompletionRequest`/`CompletionResponse`.

pub mod mock_provider;

pub use mock_provider::{MatchStrategy, MockProvider, RecordedExchange};
