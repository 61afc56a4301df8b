use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::CanonicalRequest;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::{AdapterResponse, EventStream, ProviderAdapter};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.minimax.io/v1";

/// MiniMax exposes an OpenAI-compatible chat surface, including the
/// `reasoning_content` field its thinking models emit.
pub struct MinimaxAdapter {
    inner: OpenAiAdapter,
}

impl MinimaxAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Result<Self, AdapterError> {
        Ok(Self {
            inner: OpenAiAdapter::with_base(descriptor, DEFAULT_BASE, ProviderKind::Minimax)?,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MinimaxAdapter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Minimax
    }

    async fn invoke(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<AdapterResponse, AdapterError> {
        self.inner.invoke(request, timeout).await
    }

    async fn invoke_stream(
        &self,
        request: &CanonicalRequest,
        timeout: Duration,
    ) -> Result<EventStream, AdapterError> {
        self.inner.invoke_stream(request, timeout).await
    }
}
