use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::{CanonicalRequest, ContentBlock, Role, Segment, StreamEvent, Usage};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{prune_unsupported, AdapterResponse, EventStream, ProviderAdapter};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.openai.com/v1";

/// Adapter for backends speaking the OpenAI chat-completions dialect.
pub struct OpenAiAdapter {
    http: HttpProviderClient,
    descriptor: Arc<ProviderDescriptor>,
    kind: ProviderKind,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
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
    content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Result<Self, AdapterError> {
        Self::with_base(descriptor, DEFAULT_BASE, ProviderKind::OpenaiLike)
    }

    /// Shared constructor for openai-dialect backends with other endpoints
    /// (cerebras, minimax).
    pub(crate) fn with_base(
        descriptor: Arc<ProviderDescriptor>,
        default_base: &str,
        kind: ProviderKind,
    ) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            Some(descriptor.endpoint.clone()),
            default_base,
            AuthStrategy::Bearer {
                token: descriptor.credentials.expose().to_string(),
            },
            &[],
        )?;
        Ok(Self {
            http,
            descriptor,
            kind,
        })
    }

    pub(crate) fn encode(&self, request: &CanonicalRequest) -> (WireRequest, Vec<String>) {
        let (pruned, warnings) = prune_unsupported(&self.descriptor, request);

        let mut messages = Vec::new();
        for message in &pruned.messages {
            // tool results become dedicated `tool` role messages
            let mut plain_blocks = Vec::new();
            for block in &message.content {
                match block {
                    ContentBlock::ToolResult {
                        tool_call_id,
                        content,
                    } => messages.push(WireMessage {
                        role: "tool".to_string(),
                        content: serde_json::Value::String(content.clone()),
                        tool_call_id: Some(tool_call_id.clone()),
                    }),
                    other => plain_blocks.push(other),
                }
            }
            if plain_blocks.is_empty() {
                continue;
            }

            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let content = if plain_blocks.len() == 1 {
                if let ContentBlock::Text { text } = plain_blocks[0] {
                    serde_json::Value::String(text.clone())
                } else {
                    serde_json::Value::Array(
                        plain_blocks.iter().copied().map(encode_block).collect(),
                    )
                }
            } else {
                serde_json::Value::Array(plain_blocks.iter().copied().map(encode_block).collect())
            };
            messages.push(WireMessage {
                role: role.to_string(),
                content,
                tool_call_id: None,
            });
        }

        let tools = pruned.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        });

        let wire = WireRequest {
            model: self.descriptor.resolve_model(pruned.model_hint.as_deref()),
            messages,
            tools,
            max_tokens: pruned.max_tokens,
            temperature: pruned.temperature,
            top_p: pruned.top_p,
            stream: pruned.stream.then_some(true),
        };
        (wire, warnings)
    }

    fn decode(
        &self,
        raw: serde_json::Value,
        warnings: Vec<String>,
    ) -> Result<AdapterResponse, AdapterError> {
        let response: WireResponse =
            serde_json::from_value(raw.clone()).map_err(AdapterError::Decode)?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| AdapterError::InvalidResponse {
                message: "response carried no choices".to_string(),
            })?;

        let mut content = Vec::new();
        if let Some(reasoning) = &choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(Segment::Reasoning {
                    text: reasoning.clone(),
                });
            }
        }
        let text = choice.message.content.clone().unwrap_or_default();
        if !text.is_empty() {
            content.push(Segment::Text { text: text.clone() });
        }

        let tool_calls = crate::providers::tool_calls::normalize_tool_calls(&raw, &text);
        for call in &tool_calls {
            content.push(Segment::ToolCall {
                id: call.id.clone(),
            });
        }

        if content.is_empty() && tool_calls.is_empty() {
            return Err(AdapterError::InvalidResponse {
                message: "response carried neither content nor tool calls".to_string(),
            });
        }

        Ok(AdapterResponse {
            model_used: response.model,
            content,
            tool_calls,
            usage: Usage::new(response.usage.prompt_tokens, response.usage.completion_tokens),
            warnings,
        })
    }
}

fn encode_block(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::ImageRef { url, .. } => serde_json::json!({
            "type": "image_url",
            "image_url": {"url": url}
        }),
        // tool results are hoisted to dedicated messages before this point
        ContentBlock::ToolResult { content, .. } => {
            serde_json::json!({"type": "text", "text": content})
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let raw: serde_json::Value = self
            .http
            .post_json("/chat/completions", &wire, timeout)
            .await?;
        self.decode(raw, warnings)
    }

    async fn invoke_stream(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<EventStream, AdapterError> {
        let (mut wire, _warnings) = self.encode(request);
        wire.stream = Some(true);

        let response = self.http.post_raw("/chat/completions", &wire, timeout).await?;
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
                            if json_str == "[DONE]" {
                                yield Ok(StreamEvent::Completed { usage: usage.take() });
                                return;
                            }
                            let Ok(event) = serde_json::from_str::<serde_json::Value>(json_str) else {
                                continue;
                            };

                            if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                                let input = u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                                let output = u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                                usage = Some(Usage::new(input, output));
                            }

                            let Some(delta) = event
                                .get("choices")
                                .and_then(|c| c.as_array())
                                .and_then(|c| c.first())
                                .and_then(|c| c.get("delta"))
                            else {
                                continue;
                            };

                            if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::TextDelta { text: text.to_string() });
                                }
                            }
                            if let Some(text) = delta.get("reasoning_content").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::ReasoningDelta { text: text.to_string() });
                                }
                            }
                            if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                                for call in tool_calls {
                                    let function = call.get("function");
                                    yield Ok(StreamEvent::ToolCallDelta {
                                        id: call.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
                                        name: function
                                            .and_then(|f| f.get("name"))
                                            .and_then(|v| v.as_str())
                                            .map(|s| s.to_string()),
                                        arguments_fragment: function
                                            .and_then(|f| f.get("arguments"))
                                            .and_then(|v| v.as_str())
                                            .unwrap_or_default()
                                            .to_string(),
                                    });
                                }
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

    fn adapter() -> OpenAiAdapter {
        let descriptor = ProviderDescriptor::new("oa", ProviderKind::OpenaiLike)
            .with_credentials("key")
            .with_capabilities([Capability::Tools, Capability::Vision])
            .with_models(vec!["gpt-4o".to_string()]);
        OpenAiAdapter::new(Arc::new(descriptor)).unwrap()
    }

    #[test]
    fn encode_keeps_plain_text_as_string_content() {
        let request = CanonicalRequest {
            messages: vec![Message::system("short"), Message::user("hello")],
            max_tokens: Some(16),
            ..Default::default()
        };
        let (wire, warnings) = adapter().encode(&request);
        assert!(warnings.is_empty());
        assert_eq!(wire.messages.len(), 2);
        assert_eq!(wire.messages[0].role, "system");
        assert!(wire.messages[1].content.is_string());
    }

    #[test]
    fn encode_hoists_tool_results_into_tool_messages() {
        let request = CanonicalRequest {
            messages: vec![Message {
                role: Role::Tool,
                content: vec![ContentBlock::ToolResult {
                    tool_call_id: "call_1".to_string(),
                    content: "42".to_string(),
                }],
            }],
            ..Default::default()
        };
        let (wire, _) = adapter().encode(&request);
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "tool");
        assert_eq!(wire.messages[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn decode_extracts_reasoning_text_and_tool_calls() {
        let raw = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": "done",
                    "reasoning_content": "thinking about it",
                    "tool_calls": [{
                        "id": "call_7",
                        "type": "function",
                        "function": {"name": "calc", "arguments": "{\"a\":1}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        });
        let decoded = adapter().decode(raw, vec![]).unwrap();
        assert_eq!(decoded.tool_calls.len(), 1);
        assert_eq!(decoded.tool_calls[0].name, "calc");
        assert!(decoded
            .content
            .iter()
            .any(|s| matches!(s, Segment::Reasoning { .. })));
        assert!(decoded
            .content
            .iter()
            .any(|s| matches!(s, Segment::ToolCall { .. })));
        assert_eq!(decoded.usage.total_tokens, 14);
    }

    #[test]
    fn decode_rejects_missing_choices() {
        let raw = json!({"model": "m", "choices": [], "usage": {}});
        assert!(matches!(
            adapter().decode(raw, vec![]).unwrap_err(),
            AdapterError::InvalidResponse { .. }
        ));
    }
}
