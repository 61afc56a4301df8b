//! # Provider Adapter Layer
//!
//! One adapter per backend wire dialect. An adapter owns three concerns:
//! encoding a [`CanonicalRequest`] into the backend's wire format, driving
//! the HTTP exchange under a per-attempt deadline, and decoding the wire
//! response back into canonical segments and tool calls.
//!
//! Encoding is lossless over the capability intersection: a parameter the
//! backend cannot honor is dropped and a structured warning is attached to
//! the decoded response instead of failing the call.
//!
//! ## Supported kinds
//!
//! - `anthropic-like` — Anthropic messages API dialect
//! - `openai-like` — OpenAI chat-completions dialect
//! - `cerebras` — Cerebras cloud (openai dialect, fixed endpoint)
//! - `zai` — Z.AI (anthropic dialect, fixed endpoint)
//! - `minimax` — MiniMax (openai dialect, fixed endpoint)
//! - `synthetic` — in-process echo backend for probes, tests, and dev

use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::{CanonicalRequest, Segment, StreamEvent, ToolCall, Usage};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod cerebras;
pub mod http_client;
pub mod minimax;
pub mod openai;
pub mod synthetic;
pub mod tool_calls;
pub mod zai;

/// Stream of canonical events produced by a streaming invocation.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AdapterError>> + Send>>;

/// Decoded result of one provider call, before the gateway attaches
/// provenance (attempt count, end-to-end latency).
#[derive(Debug, Clone, Default)]
pub struct AdapterResponse {
    /// Provider-native model that served the call
    pub model_used: String,
    pub content: Vec<Segment>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Structured warnings, e.g. dropped parameters
    pub warnings: Vec<String>,
}

/// Contract every backend adapter implements.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter serves (descriptor id, not kind).
    fn id(&self) -> &str;

    /// Wire dialect of the backend.
    fn kind(&self) -> ProviderKind;

    /// Perform a buffered chat completion within `timeout`.
    async fn invoke(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<AdapterResponse, AdapterError>;

    /// Perform a streaming chat completion within `timeout`.
    async fn invoke_stream(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<EventStream, AdapterError>;

    /// Issue the synthetic minimal recovery probe. Returns the observed
    /// latency in milliseconds on success.
    async fn probe(&self, timeout: Duration) -> Result<u64, AdapterError> {
        let request = CanonicalRequest {
            messages: vec![crate::models::Message::user("ping")],
            max_tokens: Some(1),
            ..Default::default()
        };
        let start = std::time::Instant::now();
        self.invoke(&request, timeout).await?;
        Ok(start.elapsed().as_millis() as u64)
    }
}

/// Build the adapter matching a descriptor's kind.
pub fn create_adapter(
    descriptor: Arc<ProviderDescriptor>,
) -> Result<Arc<dyn ProviderAdapter>, AdapterError> {
    match descriptor.kind {
        ProviderKind::AnthropicLike => Ok(Arc::new(anthropic::AnthropicAdapter::new(descriptor)?)),
        ProviderKind::OpenaiLike => Ok(Arc::new(openai::OpenAiAdapter::new(descriptor)?)),
        ProviderKind::Cerebras => Ok(Arc::new(cerebras::CerebrasAdapter::new(descriptor)?)),
        ProviderKind::Zai => Ok(Arc::new(zai::ZaiAdapter::new(descriptor)?)),
        ProviderKind::Minimax => Ok(Arc::new(minimax::MinimaxAdapter::new(descriptor)?)),
        ProviderKind::Synthetic => Ok(Arc::new(synthetic::SyntheticAdapter::new(descriptor))),
    }
}

/// Shared encode-side capability pruning.
///
/// Returns the request with unsupported content removed plus the warnings
/// describing what was dropped.
pub(crate) fn prune_unsupported(
    descriptor: &ProviderDescriptor,
    request: &CanonicalRequest,
) -> (CanonicalRequest, Vec<String>) {
    use crate::capability::Capability;
    use crate::models::ContentBlock;

    let mut pruned = request.clone();
    let mut warnings = Vec::new();

    if pruned.tools.as_ref().is_some_and(|t| !t.is_empty())
        && !descriptor.capabilities.contains(Capability::Tools)
    {
        warnings.push(format!(
            "provider {} does not support tools; {} declaration(s) dropped",
            descriptor.id,
            pruned.tools.as_ref().map(|t| t.len()).unwrap_or(0)
        ));
        pruned.tools = None;
    }

    if !descriptor.capabilities.contains(Capability::Vision) {
        let mut dropped = 0usize;
        for message in &mut pruned.messages {
            let before = message.content.len();
            message
                .content
                .retain(|b| !matches!(b, ContentBlock::ImageRef { .. }));
            dropped += before - message.content.len();
        }
        if dropped > 0 {
            warnings.push(format!(
                "provider {} does not support vision; {dropped} image reference(s) dropped",
                descriptor.id
            ));
        }
    }

    (pruned, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::models::{ContentBlock, Message, Role, ToolDeclaration};

    #[test]
    fn pruning_drops_tools_and_images_for_incapable_providers() {
        let descriptor = ProviderDescriptor::new("plain", ProviderKind::OpenaiLike);
        let request = CanonicalRequest {
            messages: vec![Message {
                role: Role::User,
                content: vec![
                    ContentBlock::Text {
                        text: "look".to_string(),
                    },
                    ContentBlock::ImageRef {
                        url: "https://example.com/x.png".to_string(),
                        media_type: None,
                    },
                ],
            }],
            tools: Some(vec![ToolDeclaration {
                name: "search".to_string(),
                description: None,
                parameters: serde_json::json!({}),
            }]),
            ..Default::default()
        };

        let (pruned, warnings) = prune_unsupported(&descriptor, &request);
        assert!(pruned.tools.is_none());
        assert_eq!(pruned.messages[0].content.len(), 1);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn pruning_is_identity_for_capable_providers() {
        let descriptor = ProviderDescriptor::new("full", ProviderKind::AnthropicLike)
            .with_capabilities([Capability::Tools, Capability::Vision]);
        let request = CanonicalRequest {
            messages: vec![Message::user("hi")],
            tools: Some(vec![ToolDeclaration {
                name: "t".to_string(),
                description: None,
                parameters: serde_json::json!({}),
            }]),
            ..Default::default()
        };
        let (pruned, warnings) = prune_unsupported(&descriptor, &request);
        assert!(warnings.is_empty());
        assert!(pruned.tools.is_some());
    }

    #[test]
    fn factory_builds_every_kind() {
        for kind in [
            ProviderKind::AnthropicLike,
            ProviderKind::OpenaiLike,
            ProviderKind::Cerebras,
            ProviderKind::Zai,
            ProviderKind::Minimax,
            ProviderKind::Synthetic,
        ] {
            let descriptor = Arc::new(
                ProviderDescriptor::new("p", kind).with_credentials("test-key"),
            );
            let adapter = create_adapter(descriptor).unwrap();
            assert_eq!(adapter.kind(), kind);
            assert_eq!(adapter.id(), "p");
        }
    }
}
