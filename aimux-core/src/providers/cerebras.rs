use crate::capability::{ProviderDescriptor, ProviderKind};
use crate::error::AdapterError;
use crate::models::CanonicalRequest;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::{AdapterResponse, EventStream, ProviderAdapter};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.cerebras.ai/v1";

/// Cerebras cloud exposes the OpenAI chat-completions dialect.
pub struct CerebrasAdapter {
    inner: OpenAiAdapter,
}

impl CerebrasAdapter {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Result<Self, AdapterError> {
        Ok(Self {
            inner: OpenAiAdapter::with_base(descriptor, DEFAULT_BASE, ProviderKind::Cerebras)?,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for CerebrasAdapter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Cerebras
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
