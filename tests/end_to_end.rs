// End-to-end exercises of the scenarios a complete adapter/coordinator
// stack is expected to satisfy, each driven through the public API
// rather than any single module's internals.

use agentwire::capability::gate_request;
use agentwire::clock::{Clock, TestClock};
use agentwire::error::CompletionError;
use agentwire::json::JsonValue;
use agentwire::model::{
    CompletionConfig, CompletionRequest, Message, ModelCapabilities, StreamCoalescer, StreamEvent,
};
use agentwire::retry::{self, RetryConfig, RetryableError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn capabilities(temperature: bool) -> ModelCapabilities {
    ModelCapabilities {
        supports_streaming: true,
        supports_tools: true,
        supports_reasoning: false,
        supports_temperature: temperature,
        supports_vision: false,
        supports_structured_output: true,
        supports_system_message: true,
        max_context_tokens: 128_000,
        max_output_tokens: 8_192,
    }
}

#[test]
fn json_fast_path_decodes_mixed_numeric_types() {
    let bytes = br#"{"q":"hi","n":5,"b":true,"arr":[1,2.5,null]}"#;
    let value = JsonValue::from_bytes(bytes).unwrap();

    assert_eq!(value.get("q").unwrap().as_str(), Some("hi"));
    assert_eq!(value.get("n").unwrap().as_i64(), Some(5));
    assert_eq!(value.get("b").unwrap().as_bool(), Some(true));

    let arr = value.get("arr").unwrap().as_array().unwrap();
    assert_eq!(arr[0].as_i64(), Some(1));
    assert_eq!(arr[1].as_f64(), Some(2.5));
    assert!(arr[1].as_i64().is_none(), "2.5 must not decode as an integer");
    assert!(arr[2].is_null());
}

#[test]
fn capability_gate_rejects_unsupported_temperature_before_any_network_call() {
    let mut config = CompletionConfig::new("claude-mock", 1024);
    config.temperature = Some(0.7);
    let request = CompletionRequest::new(config, vec![Message::user_text("hi")]);

    let err = gate_request(&capabilities(false), &request).unwrap_err();
    match err {
        CompletionError::UnsupportedCapability(message) => {
            assert!(message.contains("temperature not supported by claude-mock"));
        }
        other => panic!("expected UnsupportedCapability, got {other:?}"),
    }

    // Present at the tightest capability level too: a model that does
    // allow temperature never rejects the same request.
    gate_request(&capabilities(true), &request).unwrap();
}

#[test]
fn streaming_coalesce_concatenates_deltas_and_keeps_final_usage() {
    let mut coalescer = StreamCoalescer::new();
    coalescer.push(&StreamEvent::Start { id: "msg_1".to_string(), model: "claude-mock".to_string() });
    coalescer.push(&StreamEvent::ContentDelta { index: 0, text: "Hello".to_string() });
    coalescer.push(&StreamEvent::ContentDelta { index: 0, text: " ".to_string() });
    coalescer.push(&StreamEvent::ContentDelta { index: 0, text: "world".to_string() });

    let usage = agentwire::model::Usage { input_tokens: 10, output_tokens: 2, ..Default::default() };
    coalescer.set_usage(usage);

    let response = coalescer.finish();
    assert_eq!(response.text(), "Hello world");
    assert_eq!(response.usage, usage);
}

#[derive(Debug)]
struct RateLimitThenOk;

impl RetryableError for RateLimitThenOk {
    fn is_retriable(&self) -> bool {
        true
    }

    fn retry_after(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
}

#[tokio::test]
async fn retry_honours_retry_after_under_a_test_clock() {
    init_tracing();
    let clock = TestClock::new();
    let attempts = AtomicU32::new(0);
    let config = RetryConfig { max_retries: 2, jitter_factor: 0.0, ..RetryConfig::default() };

    let driver = {
        let clock = clock.clone();
        tokio::spawn(async move {
            retry::execute(&*clock, &config, None, || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RateLimitThenOk)
                } else {
                    Ok::<_, RateLimitThenOk>(42)
                }
            })
            .await
        })
    };

    tokio::task::yield_now().await;
    let before = clock.now();
    clock.advance(Duration::from_secs(1)).await;

    let result = driver.await.unwrap();
    assert_eq!(result.unwrap(), 42);
    assert_eq!(clock.now(), before + Duration::from_secs(1));
}

#[test]
fn retry_after_header_parses_whole_and_fractional_seconds() {
    assert_eq!(agentwire::retry::parse_retry_after("1"), Some(Duration::from_secs(1)));
    assert_eq!(agentwire::retry::parse_retry_after("0.5"), Some(Duration::from_millis(500)));
    assert!(agentwire::retry::parse_retry_after("not-a-duration").is_none());
}
