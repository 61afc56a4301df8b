//! # Failover Engine
//!
//! Drives the attempt loop for one request across the ranked candidate
//! list. Attempts are strictly sequential; there is no speculative hedging.
//! The engine walks the list in order, never revisits a provider it has
//! left, and reacts to each failure according to its [`ErrorClass`]:
//!
//! - **client fault** — abort immediately; no other provider will accept
//!   the request either
//! - **retryable transient** — retry the same provider after exponential
//!   backoff with jitter, within the per-provider attempt allowance
//! - **retryable elsewhere** — move to the next provider at once
//! - **permanent provider fault** — report it to the health supervisor and
//!   move on
//!
//! Rate-limiter rejections skip a provider without touching its health
//! state and without consuming invocation budget. A decode failure is
//! retried once; a second decode failure from the same provider escalates
//! to a permanent fault.

use crate::capability::ProviderDescriptor;
use crate::error::{AdapterError, ErrorClass, ErrorKind};
use crate::health::HealthSupervisor;
use crate::providers::{AdapterResponse, ProviderAdapter};
use crate::rate_limit::RateLimiter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest the engine waits on the concurrency gate before trying the next
/// provider.
const ADMISSION_WAIT: Duration = Duration::from_millis(250);

/// Failover configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    pub enabled: bool,
    pub max_total_attempts: u32,
    pub per_provider_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_total_attempts: 4,
            per_provider_attempts: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            jitter_ratio: 0.1,
        }
    }
}

/// One provider in ranked order, paired with its adapter.
#[derive(Clone)]
pub struct AttemptTarget {
    pub descriptor: Arc<ProviderDescriptor>,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Record of one failed attempt, kept for the response trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Successful outcome of the attempt loop.
#[derive(Debug)]
pub struct FailoverOutcome {
    pub response: AdapterResponse,
    pub provider_id: String,
    pub attempts: u32,
    pub trace: Vec<AttemptRecord>,
}

/// Terminal failure of the attempt loop.
#[derive(Debug)]
pub enum FailoverError {
    /// The ranked list was empty
    NoEligibleProvider,
    /// The request itself is invalid; surfaced without further attempts
    ClientFault {
        message: String,
        trace: Vec<AttemptRecord>,
    },
    /// The per-request deadline expired
    DeadlineExceeded { trace: Vec<AttemptRecord> },
    /// Every permitted attempt failed
    Exhausted { trace: Vec<AttemptRecord> },
}

impl FailoverError {
    /// Error kind to surface for this failure.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            FailoverError::NoEligibleProvider => ErrorKind::NoEligibleProvider,
            FailoverError::ClientFault { .. } => ErrorKind::MalformedRequest,
            FailoverError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            FailoverError::Exhausted { trace } => trace
                .last()
                .map(|r| r.kind)
                .unwrap_or(ErrorKind::ProviderTransient),
        }
    }

    pub fn trace(&self) -> &[AttemptRecord] {
        match self {
            FailoverError::NoEligibleProvider => &[],
            FailoverError::ClientFault { trace, .. }
            | FailoverError::DeadlineExceeded { trace }
            | FailoverError::Exhausted { trace } => trace,
        }
    }
}

impl std::fmt::Display for FailoverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverError::NoEligibleProvider => write!(f, "no eligible provider"),
            FailoverError::ClientFault { message, .. } => {
                write!(f, "request rejected: {message}")
            }
            FailoverError::DeadlineExceeded { .. } => write!(f, "request deadline exceeded"),
            FailoverError::Exhausted { trace } => write!(
                f,
                "all {} attempt(s) failed; last: {}",
                trace.len(),
                trace.last().map(|r| r.message.as_str()).unwrap_or("unknown")
            ),
        }
    }
}

impl std::error::Error for FailoverError {}

/// Sequentially drives attempts across a ranked provider list.
pub struct FailoverEngine {
    config: FailoverConfig,
}

impl FailoverEngine {
    pub fn new(config: FailoverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Run the attempt loop. Each attempt's timeout is the provider's own
    /// limit clamped by `per_attempt_cap` and by the time left until
    /// `deadline`.
    pub async fn run(
        &self,
        targets: &[AttemptTarget],
        request: &crate::models::CanonicalRequest,
        rate_limiter: &RateLimiter,
        health: &HealthSupervisor,
        deadline: Instant,
        per_attempt_cap: Duration,
    ) -> Result<FailoverOutcome, FailoverError> {
        if targets.is_empty() {
            return Err(FailoverError::NoEligibleProvider);
        }

        let budget = if self.config.enabled {
            (targets.len() as u32).min(self.config.max_total_attempts.max(1))
        } else {
            1
        };
        let per_provider = self.config.per_provider_attempts.max(1);

        let mut attempts_used: u32 = 0;
        let mut trace: Vec<AttemptRecord> = Vec::new();
        let mut decode_failures: HashMap<String, u32> = HashMap::new();

        'providers: for target in targets {
            if attempts_used >= budget {
                break;
            }
            let provider_id = target.descriptor.id.clone();

            let mut retry_index: u32 = 0;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(FailoverError::DeadlineExceeded { trace });
                }
                let attempt_timeout = target
                    .descriptor
                    .limits
                    .timeout()
                    .min(per_attempt_cap)
                    .min(remaining);

                match rate_limiter
                    .acquire(&provider_id, ADMISSION_WAIT.min(remaining))
                    .await
                {
                    Ok(_admission) => {
                        let _in_flight = health.begin_request(&provider_id);
                        attempts_used += 1;

                        let started = Instant::now();
                        let result = target.adapter.invoke(request, attempt_timeout).await;
                        let latency_ms = started.elapsed().as_millis() as u64;

                        match result {
                            Ok(response) => {
                                health.record_success(&provider_id, latency_ms).await;
                                return Ok(FailoverOutcome {
                                    response,
                                    provider_id,
                                    attempts: attempts_used,
                                    trace,
                                });
                            }
                            Err(error) => {
                                let mut class = error.classify();

                                // a second decode failure from the same
                                // provider is treated as permanent
                                if matches!(
                                    error,
                                    AdapterError::Decode(_)
                                        | AdapterError::InvalidResponse { .. }
                                ) {
                                    let count =
                                        decode_failures.entry(provider_id.clone()).or_insert(0);
                                    *count += 1;
                                    if *count >= 2 {
                                        class = ErrorClass::PermanentProvider;
                                    }
                                }

                                let kind = match class {
                                    ErrorClass::PermanentProvider
                                        if matches!(
                                            error,
                                            AdapterError::Decode(_)
                                                | AdapterError::InvalidResponse { .. }
                                        ) =>
                                    {
                                        ErrorKind::ProviderPermanent
                                    }
                                    _ => error.error_kind(),
                                };

                                // saturation is not a fault; everything else
                                // counts against the provider's health
                                let is_rate_limit =
                                    matches!(error, AdapterError::RateLimited);
                                if !is_rate_limit && class != ErrorClass::ClientFault {
                                    health.record_failure(&provider_id, class).await;
                                }

                                tracing::warn!(
                                    provider = %provider_id,
                                    attempt = attempts_used,
                                    kind = %kind,
                                    "attempt failed: {error}"
                                );
                                trace.push(AttemptRecord {
                                    provider_id: provider_id.clone(),
                                    kind,
                                    message: error.to_string(),
                                });

                                match class {
                                    ErrorClass::ClientFault => {
                                        return Err(FailoverError::ClientFault {
                                            message: error.to_string(),
                                            trace,
                                        });
                                    }
                                    ErrorClass::RetryableTransient => {
                                        retry_index += 1;
                                        if retry_index >= per_provider
                                            || attempts_used >= budget
                                        {
                                            continue 'providers;
                                        }
                                        let delay = self.backoff_delay(retry_index - 1);
                                        let remaining = deadline
                                            .saturating_duration_since(Instant::now());
                                        if remaining.is_zero() {
                                            return Err(FailoverError::DeadlineExceeded {
                                                trace,
                                            });
                                        }
                                        tokio::time::sleep(delay.min(remaining)).await;
                                    }
                                    ErrorClass::RetryableElsewhere
                                    | ErrorClass::PermanentProvider => {
                                        continue 'providers;
                                    }
                                }
                            }
                        }
                    }
                    Err(rejection) => {
                        // no invocation happened; skip the provider without
                        // touching health or the attempt budget
                        tracing::debug!(provider = %provider_id, "admission refused: {rejection}");
                        trace.push(AttemptRecord {
                            provider_id: provider_id.clone(),
                            kind: ErrorKind::ProviderRateLimited,
                            message: rejection.to_string(),
                        });
                        continue 'providers;
                    }
                }
            }
        }

        Err(FailoverError::Exhausted { trace })
    }

    /// `min(initial · 2^k, cap)` plus proportional jitter.
    fn backoff_delay(&self, retry_index: u32) -> Duration {
        let base = Duration::from_millis(self.config.initial_backoff_ms)
            .saturating_mul(2u32.saturating_pow(retry_index))
            .min(Duration::from_millis(self.config.max_backoff_ms));
        let jitter = base.mul_f64(rand::thread_rng().gen::<f64>() * self.config.jitter_ratio);
        base + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ProviderKind;
    use crate::error::ErrorClass;
    use crate::health::{HealthConfig, ProviderStatus};
    use crate::models::{CanonicalRequest, Message, Segment, Usage};
    use crate::providers::EventStream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted adapter: pops one result per invocation, repeating the last
    /// scripted entry once the queue drains.
    struct ScriptedAdapter {
        id: String,
        script: Mutex<VecDeque<Result<AdapterResponse, AdapterError>>>,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(
            id: &str,
            script: Vec<Result<AdapterResponse, AdapterError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn ok_response(text: &str) -> AdapterResponse {
        AdapterResponse {
            model_used: "test-model".to_string(),
            content: vec![Segment::Text {
                text: text.to_string(),
            }],
            tool_calls: Vec::new(),
            usage: Usage::new(1, 1),
            warnings: Vec::new(),
        }
    }

    fn api_error(code: u16) -> AdapterError {
        AdapterError::Api {
            code,
            message: format!("status {code}"),
        }
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Synthetic
        }

        async fn invoke(
            &self,
            _request: &CanonicalRequest,
            _timeout: Duration,
        ) -> Result<AdapterResponse, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(result) => result,
                None => Ok(ok_response("default")),
            }
        }

        async fn invoke_stream(
            &self,
            _request: &CanonicalRequest,
            _timeout: Duration,
        ) -> Result<EventStream, AdapterError> {
            unimplemented!("not exercised by failover tests")
        }
    }

    struct Fixture {
        targets: Vec<AttemptTarget>,
        adapters: Vec<Arc<ScriptedAdapter>>,
        rate_limiter: RateLimiter,
        health: HealthSupervisor,
    }

    fn fixture(scripts: Vec<(&str, Vec<Result<AdapterResponse, AdapterError>>)>) -> Fixture {
        let rate_limiter = RateLimiter::new();
        let health = HealthSupervisor::new(HealthConfig::default());
        let mut targets = Vec::new();
        let mut adapters = Vec::new();

        for (id, script) in scripts {
            let descriptor = Arc::new(ProviderDescriptor::new(id, ProviderKind::Synthetic));
            rate_limiter.register(id, 1_000, 8);
            health.register(id, &descriptor.policy);
            let adapter = ScriptedAdapter::new(id, script);
            adapters.push(adapter.clone());
            targets.push(AttemptTarget {
                descriptor,
                adapter,
            });
        }

        Fixture {
            targets,
            adapters,
            rate_limiter,
            health,
        }
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            messages: vec![Message::user("go")],
            ..Default::default()
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    const CAP: Duration = Duration::from_secs(30);

    fn engine() -> FailoverEngine {
        FailoverEngine::new(FailoverConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn empty_list_is_no_eligible_provider() {
        let fx = fixture(vec![]);
        let err = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::NoEligibleProvider));
    }

    #[tokio::test]
    async fn first_provider_success_needs_one_attempt() {
        let fx = fixture(vec![("a", vec![Ok(ok_response("hi"))])]);
        let outcome = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap();
        assert_eq!(outcome.provider_id, "a");
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.trace.is_empty());
    }

    #[tokio::test]
    async fn unavailable_provider_fails_over_to_next() {
        // 503 is elsewhere-class: one attempt on a, then b
        let fx = fixture(vec![
            ("a", vec![Err(api_error(503))]),
            ("b", vec![Ok(ok_response("from b"))]),
        ]);
        let outcome = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap();

        assert_eq!(outcome.provider_id, "b");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(fx.adapters[0].calls(), 1);
        assert_eq!(
            fx.health.snapshot("a").await.unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn transient_error_retries_same_provider_with_backoff() {
        let fx = fixture(vec![(
            "a",
            vec![Err(api_error(500)), Ok(ok_response("recovered"))],
        )]);
        let outcome = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap();
        assert_eq!(outcome.provider_id, "a");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(fx.adapters[0].calls(), 2);
    }

    #[tokio::test]
    async fn client_fault_aborts_without_trying_others() {
        let fx = fixture(vec![
            ("a", vec![Err(api_error(400))]),
            ("b", vec![Ok(ok_response("never"))]),
        ]);
        let err = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::ClientFault { .. }));
        assert_eq!(err.error_kind(), ErrorKind::MalformedRequest);
        assert_eq!(fx.adapters[1].calls(), 0);
        // client faults do not dent provider health
        assert_eq!(
            fx.health.snapshot("a").await.unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn auth_failure_marks_provider_unhealthy_and_moves_on() {
        let fx = fixture(vec![
            ("a", vec![Err(AdapterError::Auth)]),
            ("b", vec![Ok(ok_response("from b"))]),
        ]);
        let outcome = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap();
        assert_eq!(outcome.provider_id, "b");
        assert_eq!(
            fx.health.snapshot("a").await.unwrap().status,
            ProviderStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn attempt_budget_bounds_total_invocations() {
        let fx = fixture(vec![
            ("a", vec![Err(api_error(500)), Err(api_error(500))]),
            ("b", vec![Err(api_error(500)), Err(api_error(500))]),
            ("c", vec![Err(api_error(500)), Err(api_error(500))]),
        ]);
        let err = FailoverEngine::new(FailoverConfig {
            max_total_attempts: 3,
            per_provider_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..Default::default()
        })
        .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
        .await
        .unwrap_err();

        assert!(matches!(err, FailoverError::Exhausted { .. }));
        let total: u32 = fx.adapters.iter().map(|a| a.calls()).sum();
        assert_eq!(total, 3);
        // attempted ids form a prefix of the ranked list with no repeats
        let mut seen = Vec::new();
        for record in err.trace() {
            if !seen.contains(&record.provider_id) {
                seen.push(record.provider_id.clone());
            }
        }
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn rate_limited_provider_is_skipped_without_health_penalty() {
        let fx = fixture(vec![
            ("a", vec![Ok(ok_response("unused"))]),
            ("b", vec![Ok(ok_response("from b"))]),
        ]);
        // drain a's token bucket
        fx.rate_limiter.register("a", 1, 8);
        fx.rate_limiter
            .acquire("a", Duration::from_millis(1))
            .await
            .unwrap();

        let outcome = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap();

        assert_eq!(outcome.provider_id, "b");
        assert_eq!(fx.adapters[0].calls(), 0);
        assert_eq!(
            fx.health.snapshot("a").await.unwrap().consecutive_failures,
            0
        );
        // only b's invocation consumed attempt budget
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].kind, ErrorKind::ProviderRateLimited);
    }

    #[tokio::test]
    async fn second_decode_failure_escalates_to_permanent() {
        let decode_err = || {
            serde_json::from_str::<serde_json::Value>("not json")
                .map_err(AdapterError::Decode)
                .unwrap_err()
        };
        let fx = fixture(vec![("a", vec![Err(decode_err()), Err(decode_err())])]);
        let err = engine()
            .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
            .await
            .unwrap_err();

        let trace = err.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].kind, ErrorKind::ProviderTransient);
        assert_eq!(trace[1].kind, ErrorKind::ProviderPermanent);
        assert_eq!(
            fx.health.snapshot("a").await.unwrap().status,
            ProviderStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_any_call() {
        let fx = fixture(vec![("a", vec![Ok(ok_response("unused"))])]);
        let err = engine()
            .run(
                &fx.targets,
                &request(),
                &fx.rate_limiter,
                &fx.health,
                Instant::now() - Duration::from_millis(1),
                CAP,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::DeadlineExceeded { .. }));
        assert_eq!(fx.adapters[0].calls(), 0);
    }

    #[tokio::test]
    async fn disabled_failover_stops_after_first_provider() {
        let fx = fixture(vec![
            ("a", vec![Err(api_error(503))]),
            ("b", vec![Ok(ok_response("never"))]),
        ]);
        let err = FailoverEngine::new(FailoverConfig {
            enabled: false,
            ..Default::default()
        })
        .run(&fx.targets, &request(), &fx.rate_limiter, &fx.health, deadline(), CAP)
        .await
        .unwrap_err();

        assert!(matches!(err, FailoverError::Exhausted { .. }));
        assert_eq!(fx.adapters[1].calls(), 0);
    }
}
