//! Wire-level adapter tests against mocked provider endpoints.

use aimux_core::capability::{Capability, ProviderDescriptor, ProviderKind};
use aimux_core::error::{AdapterError, ErrorClass};
use aimux_core::models::{CanonicalRequest, Message, Segment};
use aimux_core::providers::create_adapter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_descriptor(endpoint: &str) -> Arc<ProviderDescriptor> {
    Arc::new(
        ProviderDescriptor::new("mock-openai", ProviderKind::OpenaiLike)
            .with_endpoint(endpoint)
            .with_credentials("test-key")
            .with_capabilities([Capability::Tools, Capability::Streaming])
            .with_models(vec!["mock-model".to_string()]),
    )
}

fn anthropic_descriptor(endpoint: &str) -> Arc<ProviderDescriptor> {
    Arc::new(
        ProviderDescriptor::new("mock-anthropic", ProviderKind::AnthropicLike)
            .with_endpoint(endpoint)
            .with_credentials("test-key")
            .with_capabilities([Capability::Thinking, Capability::Tools])
            .with_models(vec!["mock-sonnet".to_string()]),
    )
}

fn request() -> CanonicalRequest {
    CanonicalRequest {
        messages: vec![Message::user("hello")],
        max_tokens: Some(64),
        ..Default::default()
    }
}

#[tokio::test]
async fn openai_adapter_decodes_a_successful_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "model": "mock-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })))
        .mount(&server)
        .await;

    let adapter = create_adapter(openai_descriptor(&server.uri())).unwrap();
    let response = adapter
        .invoke(&request(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.model_used, "mock-model");
    assert_eq!(
        response.content,
        vec![Segment::Text {
            text: "hi there".to_string()
        }]
    );
    assert_eq!(response.usage.total_tokens, 5);
}

#[tokio::test]
async fn openai_adapter_extracts_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "mock-model",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_time", "arguments": "{\"tz\":\"UTC\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 8, "completion_tokens": 6}
        })))
        .mount(&server)
        .await;

    let adapter = create_adapter(openai_descriptor(&server.uri())).unwrap();
    let response = adapter
        .invoke(&request(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "get_time");
    assert_eq!(response.tool_calls[0].arguments.get("tz").unwrap(), "UTC");
}

#[tokio::test]
async fn status_codes_map_to_the_error_taxonomy() {
    for (status, expected_class) in [
        (401u16, ErrorClass::PermanentProvider),
        (429, ErrorClass::RetryableElsewhere),
        (500, ErrorClass::RetryableTransient),
        (503, ErrorClass::RetryableElsewhere),
        (400, ErrorClass::ClientFault),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({"error": {"message": "mock failure"}})),
            )
            .mount(&server)
            .await;

        let adapter = create_adapter(openai_descriptor(&server.uri())).unwrap();
        let error = adapter
            .invoke(&request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(error.classify(), expected_class, "status {status}");
    }
}

#[tokio::test]
async fn garbage_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let adapter = create_adapter(openai_descriptor(&server.uri())).unwrap();
    let error = adapter
        .invoke(&request(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(error, AdapterError::Decode(_)));
}

#[tokio::test]
async fn anthropic_adapter_sends_version_header_and_decodes_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "mock-sonnet",
            "content": [
                {"type": "thinking", "thinking": "brief consideration"},
                {"type": "text", "text": "the answer"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 4, "output_tokens": 6}
        })))
        .mount(&server)
        .await;

    let adapter = create_adapter(anthropic_descriptor(&server.uri())).unwrap();
    let response = adapter
        .invoke(&request(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.content.len(), 2);
    assert!(matches!(response.content[0], Segment::Reasoning { .. }));
    assert_eq!(response.usage.input_tokens, 4);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transient_network_error() {
    // nothing listens on this port
    let adapter = create_adapter(openai_descriptor("http://127.0.0.1:9")).unwrap();
    let error = adapter
        .invoke(&request(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(error.classify(), ErrorClass::RetryableTransient);
}
