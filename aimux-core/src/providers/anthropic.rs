use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::{CanonicalRequest, ContentBlock, Role, Segment, StreamEvent, Usage};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{prune_unsupported, AdapterResponse, EventStream, ProviderAdapter};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for backends speaking the Anthropic messages dialect.
pub struct AnthropicAdapter {
    http: HttpProviderClient,
    descriptor: Arc<ProviderDescriptor>,
    kind: ProviderKind,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    content: Vec<WireContentBlock>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Result<Self, AdapterError> {
        Self::with_base(descriptor, DEFAULT_BASE, ProviderKind::AnthropicLike)
    }

    /// Shared constructor for anthropic-dialect backends with other
    /// endpoints (zai).
    pub(crate) fn with_base(
        descriptor: Arc<ProviderDescriptor>,
        default_base: &str,
        kind: ProviderKind,
    ) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            Some(descriptor.endpoint.clone()),
            default_base,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: descriptor.credentials.expose().to_string(),
            },
            &[(
                "anthropic-version".to_string(),
                API_VERSION.to_string(),
            )],
        )?;
        Ok(Self {
            http,
            descriptor,
            kind,
        })
    }

    pub(crate) fn encode(&self, request: &CanonicalRequest) -> (WireRequest, Vec<String>) {
        let (pruned, mut warnings) = prune_unsupported(&self.descriptor, request);

        if request.max_tokens.is_none() {
            warnings.push("max_tokens not set; defaulted to 4096".to_string());
        }

        let mut system = String::new();
        let mut messages = Vec::new();
        for message in &pruned.messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.text());
                }
                Role::User | Role::Tool => {
                    messages.push(WireMessage {
                        role: "user".to_string(),
                        content: message.content.iter().map(encode_block).collect(),
                    });
                }
                Role::Assistant => {
                    messages.push(WireMessage {
                        role: "assistant".to_string(),
                        content: message.content.iter().map(encode_block).collect(),
                    });
                }
            }
        }

        let tools = pruned.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect()
        });

        let wire = WireRequest {
            model: self.descriptor.resolve_model(pruned.model_hint.as_deref()),
            max_tokens: pruned.max_tokens.unwrap_or(4096),
            messages,
            system: (!system.is_empty()).then_some(system),
            tools,
            temperature: pruned.temperature,
            top_p: pruned.top_p,
            stream: pruned.stream.then_some(true),
        };
        (wire, warnings)
    }

    fn decode(&self, raw: serde_json::Value, warnings: Vec<String>) -> Result<AdapterResponse, AdapterError> {
        let response: WireResponse =
            serde_json::from_value(raw.clone()).map_err(AdapterError::Decode)?;

        let mut content = Vec::new();
        let mut text_for_fallback = String::new();
        for block in &response.content {
            match block.block_type.as_str() {
                "text" => {
                    let text = block.text.clone().unwrap_or_default();
                    text_for_fallback.push_str(&text);
                    content.push(Segment::Text { text });
                }
                "thinking" => content.push(Segment::Reasoning {
                    text: block.thinking.clone().unwrap_or_default(),
                }),
                "tool_use" => {
                    if let Some(id) = &block.id {
                        content.push(Segment::ToolCall { id: id.clone() });
                    }
                }
                _ => {}
            }
        }

        let tool_calls = crate::providers::tool_calls::normalize_tool_calls(&raw, &text_for_fallback);
        if content.is_empty() && tool_calls.is_empty() {
            return Err(AdapterError::InvalidResponse {
                message: "response carried neither content nor tool calls".to_string(),
            });
        }

        Ok(AdapterResponse {
            model_used: response.model,
            content,
            tool_calls,
            usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
            warnings,
        })
    }
}

fn encode_block(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::ImageRef { url, media_type } => serde_json::json!({
            "type": "image",
            "source": {"type": "url", "url": url, "media_type": media_type}
        }),
        ContentBlock::ToolResult {
            tool_call_id,
            content,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": content
        }),
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<AdapterResponse, AdapterError> {
        let (mut wire, warnings) = self.encode(request);
        wire.stream = None;
        let raw: serde_json::Value = self.http.post_json("/v1/messages", &wire, timeout).await?;
        self.decode(raw, warnings)
    }

    async fn invoke_stream(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<EventStream, AdapterError> {
        let (mut wire, _warnings) = self.encode(request);
        wire.stream = Some(true);

        let response = self.http.post_raw("/v1/messages", &wire, timeout).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            let Some(json_str) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            let Ok(event) = serde_json::from_str::<serde_json::Value>(json_str) else {
                                continue;
                            };

                            match event.get("type").and_then(|t| t.as_str()) {
                                Some("content_block_delta") => {
                                    let delta = event.get("delta");
                                    if let Some(text) = delta
                                        .and_then(|d| d.get("text"))
                                        .and_then(|t| t.as_str())
                                    {
                                        yield Ok(StreamEvent::TextDelta { text: text.to_string() });
                                    } else if let Some(text) = delta
                                        .and_then(|d| d.get("thinking"))
                                        .and_then(|t| t.as_str())
                                    {
                                        yield Ok(StreamEvent::ReasoningDelta { text: text.to_string() });
                                    } else if let Some(json) = delta
                                        .and_then(|d| d.get("partial_json"))
                                        .and_then(|t| t.as_str())
                                    {
                                        yield Ok(StreamEvent::ToolCallDelta {
                                            id: None,
                                            name: None,
                                            arguments_fragment: json.to_string(),
                                        });
                                    }
                                }
                                Some("content_block_start") => {
                                    let block = event.get("content_block");
                                    if block.and_then(|b| b.get("type")).and_then(|t| t.as_str())
                                        == Some("tool_use")
                                    {
                                        yield Ok(StreamEvent::ToolCallDelta {
                                            id: block
                                                .and_then(|b| b.get("id"))
                                                .and_then(|v| v.as_str())
                                                .map(|s| s.to_string()),
                                            name: block
                                                .and_then(|b| b.get("name"))
                                                .and_then(|v| v.as_str())
                                                .map(|s| s.to_string()),
                                            arguments_fragment: String::new(),
                                        });
                                    }
                                }
                                Some("message_delta") => {
                                    if let Some(u) = event.get("usage") {
                                        let output = u
                                            .get("output_tokens")
                                            .and_then(|v| v.as_u64())
                                            .unwrap_or(0) as u32;
                                        let input = u
                                            .get("input_tokens")
                                            .and_then(|v| v.as_u64())
                                            .unwrap_or(0) as u32;
                                        usage = Some(Usage::new(input, output));
                                    }
                                }
                                Some("message_stop") => {
                                    yield Ok(StreamEvent::Completed { usage: usage.take() });
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(crate::providers::http_client::map_transport_error(e));
                        return;
                    }
                }
            }
            yield Ok(StreamEvent::Completed { usage });
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::models::Message;
    use serde_json::json;

    fn adapter() -> AnthropicAdapter {
        let descriptor = ProviderDescriptor::new("anth", ProviderKind::AnthropicLike)
            .with_credentials("key")
            .with_capabilities([Capability::Tools, Capability::Vision, Capability::Thinking])
            .with_models(vec!["claude-sonnet-4".to_string()]);
        AnthropicAdapter::new(Arc::new(descriptor)).unwrap()
    }

    #[test]
    fn encode_folds_system_messages_and_defaults_max_tokens() {
        let request = CanonicalRequest {
            messages: vec![
                Message::system("be brief"),
                Message::system("be kind"),
                Message::user("hello"),
            ],
            ..Default::default()
        };
        let (wire, warnings) = adapter().encode(&request);
        assert_eq!(wire.system.as_deref(), Some("be brief\nbe kind"));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, 4096);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn encode_uses_first_model_when_no_hint() {
        let request = CanonicalRequest {
            messages: vec![Message::user("hi")],
            max_tokens: Some(10),
            ..Default::default()
        };
        let (wire, warnings) = adapter().encode(&request);
        assert_eq!(wire.model, "claude-sonnet-4");
        assert!(warnings.is_empty());
    }

    #[test]
    fn decode_maps_blocks_to_segments() {
        let raw = json!({
            "model": "claude-sonnet-4",
            "content": [
                {"type": "thinking", "thinking": "considering"},
                {"type": "text", "text": "answer"},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let decoded = adapter().decode(raw, vec![]).unwrap();
        assert_eq!(decoded.content.len(), 3);
        assert_eq!(
            decoded.content[0],
            Segment::Reasoning {
                text: "considering".to_string()
            }
        );
        assert_eq!(decoded.tool_calls.len(), 1);
        assert_eq!(decoded.tool_calls[0].name, "lookup");
        assert_eq!(decoded.usage.total_tokens, 19);
    }

    #[test]
    fn decode_rejects_empty_responses() {
        let raw = json!({"model": "m", "content": [], "usage": {}});
        let err = adapter().decode(raw, vec![]).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidResponse { .. }));
    }
}
