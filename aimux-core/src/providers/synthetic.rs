//! In-process backend with no network dependency. Useful as a development
//! target, a deterministic test provider, and the cheapest possible probe
//! destination.

use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::{CanonicalRequest, Role, Segment, StreamEvent, Usage};
use crate::providers::{prune_unsupported, AdapterResponse, EventStream, ProviderAdapter};
use async_stream::stream;
use std::sync::Arc;
use std::time::Duration;

pub struct SyntheticAdapter {
    descriptor: Arc<ProviderDescriptor>,
}

impl SyntheticAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Self {
        Self { descriptor }
    }

    fn reply_text(request: &CanonicalRequest) -> String {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        if last_user.is_empty() {
            "synthetic response".to_string()
        } else {
            format!("synthetic echo: {last_user}")
        }
    }

    fn build_response(&self, request: &CanonicalRequest) -> AdapterResponse {
        let (_, warnings) = prune_unsupported(&self.descriptor, request);
        let text = Self::reply_text(request);
        let input_tokens: u32 = request
            .messages
            .iter()
            .map(|m| (m.text().len() as u32).div_ceil(4))
            .sum();
        let output_tokens = (text.len() as u32).div_ceil(4);

        AdapterResponse {
            model_used: self
                .descriptor
                .resolve_model(request.model_hint.as_deref()),
            content: vec![Segment::Text { text }],
            tool_calls: Vec::new(),
            usage: Usage::new(input_tokens, output_tokens),
            warnings,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for SyntheticAdapter {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Synthetic
    }

    async fn invoke(
        &self,
        request: &CanonicalRequest,
        _timeout: Duration,
    ) -> Result<AdapterResponse, AdapterError> {
        Ok(self.build_response(request))
    }

    async fn invoke_stream(
        &self,
        request: &CanonicalRequest,
        _timeout: Duration,
    ) -> Result<EventStream, AdapterError> {
        let response = self.build_response(request);
        let usage = response.usage;
        let text = response
            .content
            .first()
            .and_then(|s| s.as_text())
            .unwrap_or_default()
            .to_string();

        let stream = Box::pin(stream! {
            // emit the reply in word-sized deltas so stream consumers see
            // more than one chunk
            for word in text.split_inclusive(' ') {
                yield Ok(StreamEvent::TextDelta { text: word.to_string() });
            }
            yield Ok(StreamEvent::Completed { usage: Some(usage) });
        });
        Ok(stream)
    }

    async fn probe(&self, _timeout: Duration) -> Result<u64, AdapterError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use futures::StreamExt;

    fn adapter() -> SyntheticAdapter {
        SyntheticAdapter::new(Arc::new(ProviderDescriptor::new(
            "synthetic",
            ProviderKind::Synthetic,
        )))
    }

    #[tokio::test]
    async fn invoke_echoes_last_user_message() {
        let request = CanonicalRequest {
            messages: vec![Message::user("hi there")],
            ..Default::default()
        };
        let response = adapter().invoke(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            response.content[0],
            Segment::Text {
                text: "synthetic echo: hi there".to_string()
            }
        );
        assert!(response.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn stream_ends_with_completion_event() {
        let request = CanonicalRequest {
            messages: vec![Message::user("one two three")],
            stream: true,
            ..Default::default()
        };
        let mut stream = adapter()
            .invoke_stream(&request, Duration::from_secs(1))
            .await
            .unwrap();

        let mut text = String::new();
        let mut completed = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::Completed { usage } => {
                    completed = true;
                    assert!(usage.is_some());
                }
                _ => {}
            }
        }
        assert!(completed);
        assert_eq!(text, "synthetic echo: one two three");
    }
}
