//! Per-provider admission control: a token bucket for request rate plus a
//! fair semaphore for concurrency.
//!
//! The bucket holds `rpm` tokens and refills continuously at `rpm` per
//! minute. Admission never queues behind the bucket: an empty bucket
//! rejects immediately and the failover engine moves on to another
//! provider. The concurrency gate waits, but only up to the caller's short
//! bound; `tokio`'s semaphore hands out permits in FIFO order.
//!
//! Rejections here are deliberately invisible to health tracking. A
//! saturated provider is not a failing provider.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Why admission was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitRejection {
    #[error("provider {provider} request budget exhausted")]
    RateExhausted { provider: String },

    #[error("provider {provider} concurrency limit reached")]
    Saturated { provider: String },

    #[error("provider {provider} is not registered with the rate limiter")]
    UnknownProvider { provider: String },
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct ProviderBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    concurrency: Arc<Semaphore>,
}

impl ProviderBucket {
    fn new(rpm: u32, max_concurrent: u32) -> Self {
        let capacity = rpm.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1) as usize)),
        }
    }

    /// Take one token if available. Refill happens lazily on access.
    fn try_take(&self) -> bool {
        let mut state = self.state.lock().expect("bucket mutex poisoned");
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refund(&self) {
        let mut state = self.state.lock().expect("bucket mutex poisoned");
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }
}

/// Admission ticket. Holding it accounts for one concurrent call; the
/// concurrency slot frees on drop.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// Per-provider token-bucket throttle shared across the gateway.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<ProviderBucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Register (or replace) the bucket for a provider.
    pub fn register(&self, provider_id: &str, rpm: u32, max_concurrent: u32) {
        self.buckets.insert(
            provider_id.to_string(),
            Arc::new(ProviderBucket::new(rpm, max_concurrent)),
        );
    }

    pub fn deregister(&self, provider_id: &str) {
        self.buckets.remove(provider_id);
    }

    /// Request admission for one call.
    ///
    /// The token bucket is checked first and rejects immediately when
    /// empty. The concurrency gate then waits at most `wait` for a permit
    /// before giving up; a refused concurrency slot refunds the taken
    /// token.
    pub async fn acquire(
        &self,
        provider_id: &str,
        wait: Duration,
    ) -> Result<Admission, RateLimitRejection> {
        let bucket = self
            .buckets
            .get(provider_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| RateLimitRejection::UnknownProvider {
                provider: provider_id.to_string(),
            })?;

        if !bucket.try_take() {
            return Err(RateLimitRejection::RateExhausted {
                provider: provider_id.to_string(),
            });
        }

        let permit = match tokio::time::timeout(
            wait,
            bucket.concurrency.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                bucket.refund();
                return Err(RateLimitRejection::Saturated {
                    provider: provider_id.to_string(),
                });
            }
        };

        Ok(Admission { _permit: permit })
    }

    /// Remaining concurrency slots for a provider, for diagnostics.
    pub fn available_concurrency(&self, provider_id: &str) -> Option<usize> {
        self.buckets
            .get(provider_id)
            .map(|b| b.concurrency.available_permits())
    }
}
