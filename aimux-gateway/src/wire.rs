//! Anthropic-compatible wire shapes and their conversion to and from the
//! canonical model.
//!
//! The client-facing surface accepts the familiar messages-API request body
//! and returns the matching response shape, extended with an `aimux` block
//! carrying routing provenance and the prettified artifact.

use crate::gateway_error::GatewayError;
use aimux_core::classifier::RequestType;
use aimux_core::models::{
    CanonicalRequest, CanonicalResponse, ContentBlock, Message, RequestMetadata, Role, Segment,
    ToolDeclaration,
};
use aimux_core::prettifier::PrettifiedArtifact;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Incoming `POST /anthropic/v1/messages` body.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<WireTool>>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub metadata: Option<RequestMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: WireContent,
}

/// Message content: plain string or typed block array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl WireRequest {
    /// Resolve the wire body into a canonical request.
    pub fn into_canonical(self) -> Result<CanonicalRequest, GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::malformed("messages cannot be empty"));
        }

        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = self.system.filter(|s| !s.is_empty()) {
            messages.push(Message::system(system));
        }

        for wire_message in self.messages {
            let role = match wire_message.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                "system" => Role::System,
                "tool" => Role::Tool,
                other => {
                    return Err(GatewayError::malformed(format!(
                        "unknown message role '{other}'"
                    )))
                }
            };
            let content = match wire_message.content {
                WireContent::Text(text) => vec![ContentBlock::Text { text }],
                WireContent::Blocks(blocks) => {
                    blocks.iter().filter_map(decode_block).collect()
                }
            };
            if content.is_empty() {
                return Err(GatewayError::malformed("message content cannot be empty"));
            }
            messages.push(Message { role, content });
        }

        let tools = self.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDeclaration {
                    name: t.name,
                    description: t.description,
                    parameters: t.input_schema,
                })
                .collect()
        });

        Ok(CanonicalRequest {
            model_hint: self.model.filter(|m| !m.is_empty()),
            messages,
            tools,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stream: self.stream.unwrap_or(false),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

fn decode_block(block: &serde_json::Value) -> Option<ContentBlock> {
    match block.get("type").and_then(|t| t.as_str())? {
        "text" => Some(ContentBlock::Text {
            text: block.get("text")?.as_str()?.to_string(),
        }),
        "image" => {
            let source = block.get("source")?;
            let url = source
                .get("url")
                .or_else(|| source.get("data"))?
                .as_str()?
                .to_string();
            Some(ContentBlock::ImageRef {
                url,
                media_type: source
                    .get("media_type")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string()),
            })
        }
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_call_id: block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            content: block
                .get("content")
                .map(render_tool_result_content)
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

fn render_tool_result_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the Anthropic-style response body with the `aimux` provenance
/// block.
pub fn encode_response(
    response: &CanonicalResponse,
    artifact: &PrettifiedArtifact,
    request_type: RequestType,
    correlation_id: &str,
) -> serde_json::Value {
    let content: Vec<serde_json::Value> = response
        .content
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text { text } => Some(json!({"type": "text", "text": text})),
            Segment::Reasoning { text } => {
                Some(json!({"type": "thinking", "thinking": text}))
            }
            Segment::ImageRef { url } => {
                Some(json!({"type": "image", "source": {"type": "url", "url": url}}))
            }
            Segment::ToolCall { .. } => None,
        })
        .collect();

    let tool_use: Vec<serde_json::Value> = response
        .tool_calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            })
        })
        .collect();

    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": response.model_used,
        "content": content,
        "tool_use": tool_use,
        "stop_reason": if response.tool_calls.is_empty() { "end_turn" } else { "tool_use" },
        "usage": {
            "input_tokens": response.usage.input_tokens,
            "output_tokens": response.usage.output_tokens,
            "total_tokens": response.usage.total_tokens,
        },
        "aimux": {
            "provider": response.provider_id,
            "model_used": response.model_used,
            "attempts": response.attempts,
            "latency_ms": response.latency_ms,
            "request_type": request_type,
            "correlation_id": correlation_id,
            "warnings": response.warnings,
            "artifact": artifact.render(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::models::{ToolCall, Usage};
    use aimux_core::prettifier::ArtifactMetadata;
    use std::collections::BTreeMap;

    fn wire_request(body: serde_json::Value) -> WireRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn string_content_resolves_to_text_block() {
        let request = wire_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 50
        }));
        let canonical = request.into_canonical().unwrap();
        assert_eq!(canonical.model_hint.as_deref(), Some("x"));
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.messages[0].text(), "hi");
        assert_eq!(canonical.max_tokens, Some(50));
        assert!(!canonical.stream);
    }

    #[test]
    fn block_content_and_system_field_resolve() {
        let request = wire_request(json!({
            "system": "be factual",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image", "source": {"type": "url", "url": "https://e.com/a.png",
                                                  "media_type": "image/png"}},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
                ]
            }]
        }));
        let canonical = request.into_canonical().unwrap();
        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, Role::System);
        let user = &canonical.messages[1];
        assert!(user.has_image());
        assert!(user.has_tool_result());
    }

    #[test]
    fn empty_messages_are_malformed() {
        let request = wire_request(json!({"messages": []}));
        let err = request.into_canonical().unwrap_err();
        assert_eq!(err.kind, aimux_core::error::ErrorKind::MalformedRequest);
    }

    #[test]
    fn unknown_role_is_malformed() {
        let request = wire_request(json!({
            "messages": [{"role": "narrator", "content": "once upon a time"}]
        }));
        assert!(request.into_canonical().is_err());
    }

    #[test]
    fn response_encoding_includes_aimux_block() {
        let response = CanonicalResponse {
            success: true,
            provider_id: "synthetic".to_string(),
            model_used: "echo-1".to_string(),
            attempts: 2,
            latency_ms: 84,
            content: vec![Segment::Text {
                text: "done".to_string(),
            }],
            tool_calls: vec![ToolCall {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                arguments: BTreeMap::from([("q".to_string(), "x".to_string())]),
            }],
            usage: Usage::new(5, 3),
            warnings: vec!["max_tokens not set; defaulted to 4096".to_string()],
            error: None,
        };
        let now = chrono::Utc::now();
        let artifact = PrettifiedArtifact {
            metadata: ArtifactMetadata {
                provider: "synthetic".to_string(),
                model: "echo-1".to_string(),
                started_at: now,
                completed_at: now,
                latency_ms: 84,
                usage: response.usage,
            },
            reasoning: vec![],
            content: vec!["done".to_string()],
            tools: response.tool_calls.clone(),
        };

        let body = encode_response(&response, &artifact, RequestType::Tools, "corr-9");
        assert_eq!(body["aimux"]["provider"], "synthetic");
        assert_eq!(body["aimux"]["attempts"], 2);
        assert_eq!(body["aimux"]["request_type"], "tools");
        assert_eq!(body["aimux"]["correlation_id"], "corr-9");
        assert_eq!(body["stop_reason"], "tool_use");
        assert_eq!(body["tool_use"][0]["name"], "lookup");
        assert_eq!(body["usage"]["total_tokens"], 8);
        assert!(body["aimux"]["artifact"]
            .as_str()
            .unwrap()
            .contains("# metadata"));
    }
}
