use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::CanonicalRequest;
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::{AdapterResponse, EventStream, ProviderAdapter};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.z.ai/api/anthropic";

/// Z.AI speaks the Anthropic messages dialect on its own endpoint.
pub struct ZaiAdapter {
    inner: AnthropicAdapter,
}

impl ZaiAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Result<Self, AdapterError> {
        Ok(Self {
            inner: AnthropicAdapter::with_base(descriptor, DEFAULT_BASE, ProviderKind::Zai)?,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ZaiAdapter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Zai
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
