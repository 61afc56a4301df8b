//! # Gateway Core
//!
//! Composes the core components into the per-request pipeline and exposes
//! the control-plane operations. One instance serves the whole process.
//!
//! Request flow: classify, snapshot the descriptor set, rank candidates,
//! drive the failover loop, prettify, and return the response together
//! with its artifact. The descriptor set is an immutable snapshot behind
//! an `Arc`; hot-reload builds a new registry and swaps the pointer, so
//! requests already in flight keep the set they started with.

use crate::config::{AimuxConfig, DeadlineConfig};
use crate::gateway_error::GatewayError;
use crate::metrics::MetricsHub;
use aimux_core::capability::ProviderDescriptor;
use aimux_core::classifier::{RequestClassification, RequestClassifier, RequestType};
use aimux_core::error::{ErrorClass, ErrorKind};
use aimux_core::failover::{AttemptTarget, FailoverEngine};
use aimux_core::health::{HealthSupervisor, RuntimeSnapshot};
use aimux_core::models::{CanonicalRequest, CanonicalResponse, StreamEvent};
use aimux_core::prettifier::{FormatterRegistry, Prettifier, PrettifiedArtifact};
use aimux_core::providers::{create_adapter, ProviderAdapter};
use aimux_core::rate_limit::RateLimiter;
use aimux_core::selector::{Candidate, ProviderSelector, RankedCandidate, RoutingPolicy};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// How long the failover loop may wait for rate-limiter admission.
const STREAM_ADMISSION_WAIT: Duration = Duration::from_millis(250);

/// Interval of the background probe scheduler.
const PROBE_TICK: Duration = Duration::from_millis(1_000);

/// One registered provider: immutable descriptor plus its adapter.
#[derive(Clone)]
pub struct ProviderEntry {
    pub descriptor: Arc<ProviderDescriptor>,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Immutable snapshot of the registered provider set.
#[derive(Default)]
pub struct ProviderRegistry {
    pub entries: BTreeMap<String, ProviderEntry>,
}

/// Result of a successful pipeline run.
pub struct GatewayReply {
    pub response: CanonicalResponse,
    pub artifact: PrettifiedArtifact,
    pub classification: RequestClassification,
}

/// Control-plane mutation failures, mapped to HTTP statuses by handlers.
#[derive(Debug)]
pub enum ControlPlaneError {
    Duplicate(String),
    NotFound(String),
    Invalid(String),
}

impl std::fmt::Display for ControlPlaneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlPlaneError::Duplicate(id) => write!(f, "provider '{id}' already exists"),
            ControlPlaneError::NotFound(id) => write!(f, "provider '{id}' does not exist"),
            ControlPlaneError::Invalid(message) => write!(f, "{message}"),
        }
    }
}

/// Streaming request handle: the producer task feeds event payloads and
/// closes the channel when the stream completes.
pub struct StreamHandle {
    pub provider_id: String,
    pub rx: mpsc::Receiver<serde_json::Value>,
}

struct RoutingHints {
    default: Option<String>,
    thinking: Option<String>,
    vision: Option<String>,
    tools: Option<String>,
}

/// Gauge guard: decrements the in-flight request counter on drop.
struct RequestGauge<'a>(&'a MetricsHub);

impl<'a> RequestGauge<'a> {
    fn new(hub: &'a MetricsHub) -> Self {
        hub.request_started();
        Self(hub)
    }
}

impl Drop for RequestGauge<'_> {
    fn drop(&mut self) {
        self.0.request_finished();
    }
}

/// The gateway core.
pub struct GatewayCore {
    registry: RwLock<Arc<ProviderRegistry>>,
    classifier: RequestClassifier,
    selector: ProviderSelector,
    policy: RwLock<RoutingPolicy>,
    health: Arc<HealthSupervisor>,
    rate_limiter: Arc<RateLimiter>,
    failover: FailoverEngine,
    prettifier: Prettifier,
    metrics: Arc<MetricsHub>,
    hints: RoutingHints,
    deadlines: DeadlineConfig,
    accepting: AtomicBool,
}

impl GatewayCore {
    /// Build the core from configuration, registering every enabled and
    /// disabled descriptor (disabled ones stay visible to the control
    /// plane; the selector filters them).
    pub fn new(config: &AimuxConfig, metrics: Arc<MetricsHub>) -> Result<Self, GatewayError> {
        let health = Arc::new(HealthSupervisor::new(config.circuit_breaker.health_config()));
        let rate_limiter = Arc::new(RateLimiter::new());

        let mut entries = BTreeMap::new();
        for descriptor in &config.providers {
            let descriptor = Arc::new(descriptor.clone());
            let adapter = create_adapter(descriptor.clone())
                .map_err(|e| GatewayError::configuration(e.to_string()))?;
            health.register(&descriptor.id, &descriptor.policy);
            rate_limiter.register(
                &descriptor.id,
                descriptor.limits.rpm,
                descriptor.limits.max_concurrent,
            );
            entries.insert(
                descriptor.id.clone(),
                ProviderEntry {
                    descriptor,
                    adapter,
                },
            );
        }

        Ok(Self {
            registry: RwLock::new(Arc::new(ProviderRegistry { entries })),
            classifier: RequestClassifier::new(config.classifier.clone()),
            selector: ProviderSelector::new(),
            policy: RwLock::new(config.routing.clone()),
            health,
            rate_limiter,
            failover: FailoverEngine::new(config.failover.clone()),
            prettifier: Prettifier::new(config.prettifier.clone(), FormatterRegistry::default()),
            metrics,
            hints: RoutingHints {
                default: config.default_provider.clone(),
                thinking: config.thinking_provider.clone(),
                vision: config.vision_provider.clone(),
                tools: config.tools_provider.clone(),
            },
            deadlines: config.deadlines.clone(),
            accepting: AtomicBool::new(true),
        })
    }

    pub fn health(&self) -> &HealthSupervisor {
        &self.health
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    /// Run the buffered pipeline for one request.
    pub async fn handle(
        &self,
        request: CanonicalRequest,
        correlation_id: &str,
    ) -> Result<GatewayReply, GatewayError> {
        let _gauge = RequestGauge::new(&self.metrics);
        let started = Instant::now();

        let result = self.handle_inner(request, correlation_id, started).await;
        match &result {
            Ok(reply) => {
                self.metrics.record_request(
                    Some(&reply.response.provider_id),
                    true,
                    reply.response.latency_ms,
                    None,
                );
            }
            Err(error) => {
                self.metrics.record_request(
                    error.provider.as_deref(),
                    false,
                    started.elapsed().as_millis() as u64,
                    Some(error.kind),
                );
            }
        }
        result
    }

    async fn handle_inner(
        &self,
        request: CanonicalRequest,
        correlation_id: &str,
        started: Instant,
    ) -> Result<GatewayReply, GatewayError> {
        self.check_admittable(&request, correlation_id)?;

        let classification = self.classifier.classify(&request);
        tracing::debug!(
            correlation_id,
            request_type = ?classification.request_type,
            input_tokens = classification.estimated_input_tokens,
            "request classified"
        );

        let targets = self
            .ranked_targets(&request, &classification, correlation_id)
            .await?;

        let request = self
            .prettifier
            .preprocess(&targets[0].descriptor.id, request);

        let deadline = started + self.deadlines.per_request();
        let per_attempt_cap = Duration::from_millis(self.deadlines.per_attempt_ms);
        let outcome = self
            .failover
            .run(
                &targets,
                &request,
                &self.rate_limiter,
                &self.health,
                deadline,
                per_attempt_cap,
            )
            .await
            .map_err(|e| {
                GatewayError::from_failover(&e).with_correlation_id(correlation_id)
            })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let model_used = if outcome.response.model_used.is_empty() {
            request.model_hint.clone().unwrap_or_default()
        } else {
            outcome.response.model_used.clone()
        };
        let response = CanonicalResponse {
            success: true,
            provider_id: outcome.provider_id,
            model_used,
            attempts: outcome.attempts,
            latency_ms,
            content: outcome.response.content,
            tool_calls: outcome.response.tool_calls,
            usage: outcome.response.usage,
            warnings: outcome.response.warnings,
            error: None,
        };

        let artifact = self
            .prettifier
            .process(&response)
            .map_err(|e| GatewayError::from(e).with_correlation_id(correlation_id))?;

        Ok(GatewayReply {
            response,
            artifact,
            classification,
        })
    }

    /// Shared admission checks for both pipelines.
    fn check_admittable(
        &self,
        request: &CanonicalRequest,
        correlation_id: &str,
    ) -> Result<(), GatewayError> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(GatewayError::new(
                ErrorKind::NoEligibleProvider,
                "gateway is draining for shutdown",
            )
            .with_correlation_id(correlation_id));
        }

        // a per-request deadline that cannot cover one attempt fails fast
        if self.deadlines.per_request_ms < self.deadlines.per_attempt_ms {
            return Err(GatewayError::new(
                ErrorKind::DeadlineExceeded,
                "per-request deadline is smaller than a single attempt timeout",
            )
            .with_correlation_id(correlation_id));
        }

        let input_bytes: usize = request
            .messages
            .iter()
            .map(|m| m.text().len())
            .sum();
        let limit = self.prettifier.config().max_stream_buffer_bytes;
        if input_bytes > limit {
            return Err(GatewayError::malformed(format!(
                "request text of {input_bytes} bytes exceeds the {limit} byte limit"
            ))
            .with_correlation_id(correlation_id));
        }

        Ok(())
    }

    /// Snapshot descriptors and runtime state, rank, and resolve adapters.
    async fn ranked_targets(
        &self,
        request: &CanonicalRequest,
        classification: &RequestClassification,
        correlation_id: &str,
    ) -> Result<Vec<AttemptTarget>, GatewayError> {
        let registry = self.registry.read().await.clone();

        let mut candidates = Vec::with_capacity(registry.entries.len());
        for entry in registry.entries.values() {
            if let Some(snapshot) = self.health.snapshot(&entry.descriptor.id).await {
                candidates.push(Candidate {
                    descriptor: entry.descriptor.clone(),
                    runtime: snapshot,
                });
            }
        }

        let policy = self.policy.read().await.clone();
        let mut ranked = self.selector.select(
            &candidates,
            classification,
            &policy,
            request.metadata.cost_sensitive,
            request.metadata.latency_sensitive,
        );
        self.apply_hints(&mut ranked, classification);

        if ranked.is_empty() {
            return Err(GatewayError::new(
                ErrorKind::NoEligibleProvider,
                "no provider satisfies the request's capability and health requirements",
            )
            .with_correlation_id(correlation_id));
        }

        Ok(ranked
            .iter()
            .filter_map(|candidate| registry.entries.get(&candidate.id))
            .map(|entry| AttemptTarget {
                descriptor: entry.descriptor.clone(),
                adapter: entry.adapter.clone(),
            })
            .collect())
    }

    /// Move the configured hint provider to the front of the ranking when
    /// it survived filtering.
    fn apply_hints(&self, ranked: &mut [RankedCandidate], classification: &RequestClassification) {
        let hint = match classification.request_type {
            RequestType::Thinking => self.hints.thinking.as_ref(),
            RequestType::Vision => self.hints.vision.as_ref(),
            RequestType::Tools => self.hints.tools.as_ref(),
            _ => self.hints.default.as_ref(),
        }
        .or(self.hints.default.as_ref());

        if let Some(hint) = hint {
            if let Some(position) = ranked.iter().position(|c| &c.id == hint) {
                ranked[..=position].rotate_right(1);
            }
        }
    }

    /// Run the streaming pipeline: pick a provider, start its stream, and
    /// spawn the producer task that assembles and forwards fragments.
    pub async fn handle_stream(
        self: &Arc<Self>,
        request: CanonicalRequest,
        correlation_id: String,
    ) -> Result<StreamHandle, GatewayError> {
        self.check_admittable(&request, &correlation_id)?;
        let classification = self.classifier.classify(&request);
        let targets = self
            .ranked_targets(&request, &classification, &correlation_id)
            .await?;
        let request = self
            .prettifier
            .preprocess(&targets[0].descriptor.id, request);

        let started = Instant::now();
        let mut last_error: Option<GatewayError> = None;

        for target in &targets {
            let provider_id = target.descriptor.id.clone();
            let admission = match self
                .rate_limiter
                .acquire(&provider_id, STREAM_ADMISSION_WAIT)
                .await
            {
                Ok(admission) => admission,
                Err(rejection) => {
                    tracing::debug!(provider = %provider_id, "stream admission refused: {rejection}");
                    last_error = Some(
                        GatewayError::new(ErrorKind::ProviderRateLimited, rejection.to_string())
                            .with_provider(&provider_id),
                    );
                    continue;
                }
            };

            let timeout = target
                .descriptor
                .limits
                .timeout()
                .min(Duration::from_millis(self.deadlines.per_attempt_ms));
            match target.adapter.invoke_stream(&request, timeout).await {
                Ok(events) => {
                    let (tx, rx) = mpsc::channel(64);
                    let core = self.clone();
                    let handle_provider = provider_id.clone();
                    let request_type = classification.request_type;
                    tokio::spawn(async move {
                        core.pump_stream(
                            events,
                            tx,
                            admission,
                            handle_provider,
                            request_type,
                            correlation_id,
                            started,
                        )
                        .await;
                    });
                    return Ok(StreamHandle { provider_id, rx });
                }
                Err(error) => {
                    let class = error.classify();
                    if !matches!(error, aimux_core::error::AdapterError::RateLimited)
                        && class != ErrorClass::ClientFault
                    {
                        self.health.record_failure(&provider_id, class).await;
                    }
                    let gateway_error = GatewayError::new(error.error_kind(), error.to_string())
                        .with_provider(&provider_id)
                        .with_correlation_id(&correlation_id);
                    if class == ErrorClass::ClientFault {
                        return Err(GatewayError::malformed(error.to_string())
                            .with_correlation_id(&correlation_id));
                    }
                    last_error = Some(gateway_error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::new(ErrorKind::NoEligibleProvider, "no provider could start a stream")
                .with_correlation_id(&correlation_id)
        }))
    }

    /// Producer side of a stream: assemble fragments, enforce security
    /// scanning on text, account metrics, and close the channel when done.
    #[allow(clippy::too_many_arguments)]
    async fn pump_stream(
        &self,
        mut events: aimux_core::providers::EventStream,
        tx: mpsc::Sender<serde_json::Value>,
        _admission: aimux_core::rate_limit::Admission,
        provider_id: String,
        request_type: RequestType,
        correlation_id: String,
        started: Instant,
    ) {
        use futures::StreamExt;

        let _gauge = RequestGauge::new(&self.metrics);
        let _in_flight = self.health.begin_request(&provider_id);
        let formatter = self.prettifier.formatter_for(&provider_id);
        let mut assembler = self.prettifier.begin_stream();
        let mut drops_seen: u64 = 0;

        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::TextDelta { text })
                | Ok(StreamEvent::ReasoningDelta { text }) => {
                    if let Some(pattern) = self.prettifier.scan_text(&text) {
                        let error = GatewayError::new(
                            ErrorKind::SecurityViolation,
                            format!("stream content matched security pattern '{pattern}'"),
                        )
                        .with_provider(&provider_id)
                        .with_correlation_id(&correlation_id);
                        let _ = tx.send(json!({"type": "error", "error": error.body()["error"]})).await;
                        self.metrics.record_request(
                            Some(&provider_id),
                            false,
                            started.elapsed().as_millis() as u64,
                            Some(ErrorKind::SecurityViolation),
                        );
                        return;
                    }

                    let bytes = text.len() as u64;
                    let fragments = if formatter.supports_streaming() {
                        formatter.postprocess_chunk(&mut assembler, &text)
                    } else {
                        assembler.push(&text)
                    };
                    let drops = assembler.backpressure_drops() - drops_seen;
                    drops_seen = assembler.backpressure_drops();
                    self.metrics
                        .record_stream(bytes, 1, fragments.len() as u64, drops);

                    for fragment in fragments {
                        let payload = json!({
                            "type": "fragment",
                            "reason": fragment.reason,
                            "body": fragment.body,
                        });
                        if tx.send(payload).await.is_err() {
                            // client went away; abandon the stream
                            return;
                        }
                    }
                }
                Ok(StreamEvent::ToolCallDelta {
                    id,
                    name,
                    arguments_fragment,
                }) => {
                    let payload = json!({
                        "type": "tool_call_delta",
                        "id": id,
                        "name": name,
                        "arguments_fragment": arguments_fragment,
                    });
                    if tx.send(payload).await.is_err() {
                        return;
                    }
                }
                Ok(StreamEvent::Completed { usage }) => {
                    if let Some(tail) = assembler.finish() {
                        self.metrics.record_stream(0, 0, 1, 0);
                        let _ = tx
                            .send(json!({
                                "type": "fragment",
                                "reason": tail.reason,
                                "body": tail.body,
                            }))
                            .await;
                    }
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.health.record_success(&provider_id, latency_ms).await;
                    self.metrics
                        .record_request(Some(&provider_id), true, latency_ms, None);
                    let _ = tx
                        .send(json!({
                            "type": "completed",
                            "usage": usage,
                            "aimux": {
                                "provider": provider_id,
                                "attempts": 1,
                                "latency_ms": latency_ms,
                                "request_type": request_type,
                                "correlation_id": correlation_id,
                            }
                        }))
                        .await;
                    return;
                }
                Err(error) => {
                    let class = error.classify();
                    if !matches!(error, aimux_core::error::AdapterError::RateLimited) {
                        self.health.record_failure(&provider_id, class).await;
                    }
                    let gateway_error = GatewayError::new(error.error_kind(), error.to_string())
                        .with_provider(&provider_id)
                        .with_correlation_id(&correlation_id);
                    self.metrics.record_request(
                        Some(&provider_id),
                        false,
                        started.elapsed().as_millis() as u64,
                        Some(gateway_error.kind),
                    );
                    let _ = tx
                        .send(json!({"type": "error", "error": gateway_error.body()["error"]}))
                        .await;
                    return;
                }
            }
        }

        // the provider closed the stream without a completion event
        if let Some(tail) = assembler.finish() {
            let _ = tx
                .send(json!({
                    "type": "fragment",
                    "reason": tail.reason,
                    "body": tail.body,
                }))
                .await;
        }
        let latency_ms = started.elapsed().as_millis() as u64;
        self.health.record_success(&provider_id, latency_ms).await;
        self.metrics
            .record_request(Some(&provider_id), true, latency_ms, None);
    }

    // --- control plane ---

    /// Current descriptor snapshot.
    pub async fn registry_snapshot(&self) -> Arc<ProviderRegistry> {
        self.registry.read().await.clone()
    }

    /// Providers with their runtime snapshots.
    pub async fn provider_overview(&self) -> Vec<(Arc<ProviderDescriptor>, RuntimeSnapshot)> {
        let registry = self.registry.read().await.clone();
        let mut overview = Vec::with_capacity(registry.entries.len());
        for entry in registry.entries.values() {
            if let Some(snapshot) = self.health.snapshot(&entry.descriptor.id).await {
                overview.push((entry.descriptor.clone(), snapshot));
            }
        }
        overview
    }

    /// Register a new provider descriptor.
    pub async fn add_provider(
        &self,
        descriptor: ProviderDescriptor,
    ) -> Result<(), ControlPlaneError> {
        descriptor.validate().map_err(ControlPlaneError::Invalid)?;

        let mut registry = self.registry.write().await;
        if registry.entries.contains_key(&descriptor.id) {
            return Err(ControlPlaneError::Duplicate(descriptor.id));
        }

        let descriptor = Arc::new(descriptor);
        let adapter = create_adapter(descriptor.clone())
            .map_err(|e| ControlPlaneError::Invalid(e.to_string()))?;
        self.health.register(&descriptor.id, &descriptor.policy);
        self.rate_limiter.register(
            &descriptor.id,
            descriptor.limits.rpm,
            descriptor.limits.max_concurrent,
        );

        let mut entries = registry.entries.clone();
        entries.insert(
            descriptor.id.clone(),
            ProviderEntry {
                descriptor: descriptor.clone(),
                adapter,
            },
        );
        *registry = Arc::new(ProviderRegistry { entries });
        tracing::info!(provider = %descriptor.id, "provider registered");
        Ok(())
    }

    /// Replace an existing provider descriptor. Runtime health state is
    /// preserved only when the circuit policy is unchanged.
    pub async fn update_provider(
        &self,
        id: &str,
        mut descriptor: ProviderDescriptor,
    ) -> Result<(), ControlPlaneError> {
        descriptor.id = id.to_string();
        descriptor.validate().map_err(ControlPlaneError::Invalid)?;

        let mut registry = self.registry.write().await;
        if !registry.entries.contains_key(id) {
            return Err(ControlPlaneError::NotFound(id.to_string()));
        }

        let descriptor = Arc::new(descriptor);
        let adapter = create_adapter(descriptor.clone())
            .map_err(|e| ControlPlaneError::Invalid(e.to_string()))?;
        self.health.register(id, &descriptor.policy);
        self.rate_limiter.register(
            id,
            descriptor.limits.rpm,
            descriptor.limits.max_concurrent,
        );

        let mut entries = registry.entries.clone();
        entries.insert(
            id.to_string(),
            ProviderEntry {
                descriptor,
                adapter,
            },
        );
        *registry = Arc::new(ProviderRegistry { entries });
        tracing::info!(provider = id, "provider updated");
        Ok(())
    }

    /// Remove a provider and drop its runtime state.
    pub async fn remove_provider(&self, id: &str) -> Result<(), ControlPlaneError> {
        let mut registry = self.registry.write().await;
        if !registry.entries.contains_key(id) {
            return Err(ControlPlaneError::NotFound(id.to_string()));
        }
        let mut entries = registry.entries.clone();
        entries.remove(id);
        *registry = Arc::new(ProviderRegistry { entries });
        self.health.deregister(id);
        self.rate_limiter.deregister(id);
        tracing::info!(provider = id, "provider removed");
        Ok(())
    }

    /// Fire a canned diagnostic request at one provider directly.
    pub async fn test_provider(&self, id: &str) -> Result<CanonicalResponse, GatewayError> {
        let registry = self.registry.read().await.clone();
        let entry = registry.entries.get(id).ok_or_else(|| {
            GatewayError::configuration(format!("provider '{id}' does not exist"))
        })?;

        let request = CanonicalRequest {
            messages: vec![aimux_core::models::Message::user(
                "Reply with a single short sentence.",
            )],
            max_tokens: Some(32),
            ..Default::default()
        };

        let started = Instant::now();
        let result = entry
            .adapter
            .invoke(&request, entry.descriptor.limits.timeout())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                self.health.record_success(id, latency_ms).await;
                Ok(CanonicalResponse {
                    success: true,
                    provider_id: id.to_string(),
                    model_used: reply.model_used,
                    attempts: 1,
                    latency_ms,
                    content: reply.content,
                    tool_calls: reply.tool_calls,
                    usage: reply.usage,
                    warnings: reply.warnings,
                    error: None,
                })
            }
            Err(error) => {
                self.health.record_failure(id, error.classify()).await;
                Err(GatewayError::new(error.error_kind(), error.to_string())
                    .with_provider(id))
            }
        }
    }

    pub async fn routing_policy(&self) -> RoutingPolicy {
        self.policy.read().await.clone()
    }

    /// Replace the routing policy block.
    pub async fn set_routing_policy(
        &self,
        policy: RoutingPolicy,
    ) -> Result<(), ControlPlaneError> {
        if policy.k == 0 {
            return Err(ControlPlaneError::Invalid("routing.k cannot be 0".to_string()));
        }
        if !policy.temperature.is_finite() || policy.temperature <= 0.0 {
            return Err(ControlPlaneError::Invalid(
                "routing.temperature must be positive".to_string(),
            ));
        }
        *self.policy.write().await = policy;
        tracing::info!("routing policy replaced");
        Ok(())
    }

    // --- background tasks and shutdown ---

    /// Spawn the recovery-probe scheduler. At each tick, circuit-open
    /// providers whose cooling period has elapsed get exactly one probe.
    pub fn spawn_probe_driver(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let core = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PROBE_TICK);
            loop {
                tick.tick().await;
                let registry = core.registry.read().await.clone();
                for entry in registry.entries.values() {
                    let id = entry.descriptor.id.clone();
                    if core.health.probe_due(&id).await && core.health.begin_probe(&id).await {
                        let adapter = entry.adapter.clone();
                        let health = core.health.clone();
                        let timeout = core.health.config().probe_timeout();
                        tokio::spawn(async move {
                            tracing::info!(provider = %id, "issuing recovery probe");
                            match adapter.probe(timeout).await {
                                Ok(latency_ms) => {
                                    health.complete_probe(&id, true, latency_ms).await
                                }
                                Err(error) => {
                                    tracing::warn!(provider = %id, "probe failed: {error}");
                                    health.complete_probe(&id, false, 0).await;
                                }
                            }
                        });
                    }
                }
            }
        })
    }

    /// Stop accepting new requests.
    pub fn begin_shutdown(&self) {
        self.accepting.store(false, Ordering::Relaxed);
        tracing::info!("gateway stopped accepting new requests");
    }

    /// Wait for in-flight requests to finish, up to the drain window.
    /// Returns true when the gateway drained cleanly.
    pub async fn drain(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            if self.metrics.requests_in_flight() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.metrics.requests_in_flight() == 0
    }
}
