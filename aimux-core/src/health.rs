//! # Provider Health Supervision
//!
//! One [`HealthSupervisor`] owns the mutable runtime state for every
//! registered provider and is the only component that mutates it. The
//! failover engine reports call outcomes here; the selector and control
//! plane read cloned snapshots. This single-owner arrangement keeps the
//! routing path lock-light and removes any back-edge between routing and
//! health tracking.
//!
//! ## State machine
//!
//! Each provider moves through four public states:
//!
//! ```text
//!           first failure             consecutive > N/2
//!   HEALTHY ───────────► DEGRADED ─────────────────► UNHEALTHY
//!      ▲                    │                             │
//!      │                    │ success                     │ consecutive ≥ N
//!      └────────────────────┘                             ▼
//!                                                  CIRCUIT_OPEN
//!                                                        │ after recovery delay,
//!                                                        │ one probe at a time
//!                                                        ▼
//!                                             probe ok → HEALTHY
//!                                             probe fail → CIRCUIT_OPEN (timer reset)
//! ```
//!
//! UNHEALTHY closes back to HEALTHY after a configured number of
//! consecutive successes. While the circuit is open a single in-flight
//! recovery probe is permitted; that half-open refinement is tracked
//! internally and never surfaces as a distinct status.

use crate::capability::ProviderPolicy;
use crate::error::ErrorClass;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Smoothing factor for the latency moving average.
const EWMA_ALPHA: f64 = 0.1;

/// Rolling success window length.
const SUCCESS_WINDOW: usize = 100;

/// Public health status of a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Unhealthy,
    CircuitOpen,
}

/// Gateway-wide circuit-breaker defaults; per-provider thresholds come from
/// each descriptor's policy block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Consecutive successes needed to close from UNHEALTHY
    pub successes_to_close: u32,
    /// Timeout for recovery probes, typically half the normal attempt timeout
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            successes_to_close: 3,
            probe_timeout_ms: 15_000,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Per-provider circuit thresholds, derived from the descriptor policy.
#[derive(Debug, Clone)]
struct CircuitSettings {
    max_consecutive_failures: u32,
    recovery_delay: Duration,
}

/// Mutable runtime state for one provider. Owned by the supervisor.
#[derive(Debug)]
struct RuntimeState {
    status: ProviderStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    ewma_latency_ms: f64,
    window: VecDeque<bool>,
    circuit_opened_at: Option<Instant>,
    probes_succeeded: u32,
    probe_in_flight: bool,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: ProviderStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_success_at: None,
            last_failure_at: None,
            ewma_latency_ms: 0.0,
            window: VecDeque::with_capacity(SUCCESS_WINDOW),
            circuit_opened_at: None,
            probes_succeeded: 0,
            probe_in_flight: false,
        }
    }
}

impl RuntimeState {
    fn push_outcome(&mut self, success: bool) {
        if self.window.len() == SUCCESS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }

    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|s| **s).count();
        successes as f64 / self.window.len() as f64
    }

    fn blend_latency(&mut self, latency_ms: u64) {
        if self.ewma_latency_ms == 0.0 {
            self.ewma_latency_ms = latency_ms as f64;
        } else {
            self.ewma_latency_ms =
                EWMA_ALPHA * latency_ms as f64 + (1.0 - EWMA_ALPHA) * self.ewma_latency_ms;
        }
    }
}

struct ProviderEntry {
    settings: CircuitSettings,
    in_flight: AtomicU32,
    state: RwLock<RuntimeState>,
}

/// Read-only view of a provider's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub ewma_latency_ms: f64,
    pub success_rate: f64,
    pub in_flight: u32,
    /// Seconds the circuit has been open, when applicable
    pub circuit_open_for_s: Option<u64>,
    pub probes_succeeded: u32,
}

/// RAII guard for the in-flight gauge; dropping it decrements the count.
pub struct InFlightGuard {
    entry: Arc<ProviderEntry>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Owns and mutates health state for all providers.
pub struct HealthSupervisor {
    providers: DashMap<String, Arc<ProviderEntry>>,
    config: HealthConfig,
}

impl HealthSupervisor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            providers: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Register a provider, creating fresh runtime state.
    pub fn register(&self, provider_id: &str, policy: &ProviderPolicy) {
        let settings = CircuitSettings {
            max_consecutive_failures: policy.max_consecutive_failures.max(1),
            recovery_delay: policy.recovery_delay(),
        };
        self.providers.insert(
            provider_id.to_string(),
            Arc::new(ProviderEntry {
                settings,
                in_flight: AtomicU32::new(0),
                state: RwLock::new(RuntimeState::default()),
            }),
        );
    }

    /// Drop a provider's runtime state entirely.
    pub fn deregister(&self, provider_id: &str) {
        self.providers.remove(provider_id);
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    fn entry(&self, provider_id: &str) -> Option<Arc<ProviderEntry>> {
        self.providers.get(provider_id).map(|e| e.value().clone())
    }

    /// Claim an in-flight slot for the gauge. Returns `None` for unknown
    /// providers.
    pub fn begin_request(&self, provider_id: &str) -> Option<InFlightGuard> {
        let entry = self.entry(provider_id)?;
        entry.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(InFlightGuard { entry })
    }

    /// Record a successful call and update latency and window statistics.
    pub async fn record_success(&self, provider_id: &str, latency_ms: u64) {
        let Some(entry) = self.entry(provider_id) else {
            return;
        };
        let mut state = entry.state.write().await;

        state.push_outcome(true);
        state.blend_latency(latency_ms);
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        state.last_success_at = Some(Utc::now());

        match state.status {
            ProviderStatus::Healthy => {}
            ProviderStatus::Degraded => {
                state.status = ProviderStatus::Healthy;
                tracing::info!(provider = provider_id, "provider recovered to healthy");
            }
            ProviderStatus::Unhealthy => {
                if state.consecutive_successes >= self.config.successes_to_close {
                    state.status = ProviderStatus::Healthy;
                    tracing::info!(
                        provider = provider_id,
                        successes = state.consecutive_successes,
                        "provider closed back to healthy"
                    );
                }
            }
            ProviderStatus::CircuitOpen => {
                // A success observed while open means a probe (or a stale
                // reader's attempt) went through. Opening the path again is
                // always safe.
                state.status = ProviderStatus::Healthy;
                state.circuit_opened_at = None;
                state.probe_in_flight = false;
                tracing::info!(provider = provider_id, "circuit closed after success");
            }
        }
    }

    /// Record a failed call. `class` distinguishes permanent provider faults,
    /// which jump straight to UNHEALTHY.
    pub async fn record_failure(&self, provider_id: &str, class: ErrorClass) {
        let Some(entry) = self.entry(provider_id) else {
            return;
        };
        let mut state = entry.state.write().await;

        state.push_outcome(false);
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Utc::now());

        let max = entry.settings.max_consecutive_failures;

        if state.consecutive_failures >= max {
            if state.status != ProviderStatus::CircuitOpen {
                state.status = ProviderStatus::CircuitOpen;
                state.circuit_opened_at = Some(Instant::now());
                state.probes_succeeded = 0;
                state.probe_in_flight = false;
                tracing::warn!(
                    provider = provider_id,
                    failures = state.consecutive_failures,
                    "circuit opened"
                );
            }
            return;
        }

        match (state.status, class) {
            (ProviderStatus::CircuitOpen, _) => {}
            (_, ErrorClass::PermanentProvider) => {
                if state.status != ProviderStatus::Unhealthy {
                    state.status = ProviderStatus::Unhealthy;
                    tracing::warn!(provider = provider_id, "provider marked unhealthy");
                }
            }
            (ProviderStatus::Healthy, _) => {
                state.status = ProviderStatus::Degraded;
                tracing::warn!(provider = provider_id, "provider degraded");
            }
            (ProviderStatus::Degraded, _) => {
                // half the threshold, rounded up, so short circuits (small N)
                // stay selectable until they open
                if state.consecutive_failures > max.div_ceil(2) {
                    state.status = ProviderStatus::Unhealthy;
                    tracing::warn!(
                        provider = provider_id,
                        failures = state.consecutive_failures,
                        "provider marked unhealthy"
                    );
                }
            }
            (ProviderStatus::Unhealthy, _) => {}
        }
    }

    /// Whether the selector may route to this provider.
    pub async fn is_selectable(&self, provider_id: &str) -> bool {
        let Some(entry) = self.entry(provider_id) else {
            return false;
        };
        if !self.config.enabled {
            return true;
        }
        let state = entry.state.read().await;
        matches!(
            state.status,
            ProviderStatus::Healthy | ProviderStatus::Degraded
        )
    }

    /// Whether a recovery probe should be issued now.
    pub async fn probe_due(&self, provider_id: &str) -> bool {
        let Some(entry) = self.entry(provider_id) else {
            return false;
        };
        let state = entry.state.read().await;
        state.status == ProviderStatus::CircuitOpen
            && !state.probe_in_flight
            && state
                .circuit_opened_at
                .is_some_and(|opened| opened.elapsed() >= entry.settings.recovery_delay)
    }

    /// Claim the single probe permit. Returns false when no probe is due or
    /// one is already in flight.
    pub async fn begin_probe(&self, provider_id: &str) -> bool {
        let Some(entry) = self.entry(provider_id) else {
            return false;
        };
        let mut state = entry.state.write().await;
        let due = state.status == ProviderStatus::CircuitOpen
            && !state.probe_in_flight
            && state
                .circuit_opened_at
                .is_some_and(|opened| opened.elapsed() >= entry.settings.recovery_delay);
        if due {
            state.probe_in_flight = true;
        }
        due
    }

    /// Report a probe result. Success closes the circuit; failure restarts
    /// the recovery timer.
    pub async fn complete_probe(&self, provider_id: &str, success: bool, latency_ms: u64) {
        let Some(entry) = self.entry(provider_id) else {
            return;
        };
        let mut state = entry.state.write().await;
        state.probe_in_flight = false;

        if success {
            state.probes_succeeded += 1;
            state.status = ProviderStatus::Healthy;
            state.consecutive_failures = 0;
            state.circuit_opened_at = None;
            state.last_success_at = Some(Utc::now());
            state.push_outcome(true);
            state.blend_latency(latency_ms);
            tracing::info!(provider = provider_id, "recovery probe succeeded, circuit closed");
        } else {
            state.circuit_opened_at = Some(Instant::now());
            state.last_failure_at = Some(Utc::now());
            state.push_outcome(false);
            tracing::warn!(provider = provider_id, "recovery probe failed, timer reset");
        }
    }

    /// Snapshot one provider's runtime state.
    pub async fn snapshot(&self, provider_id: &str) -> Option<RuntimeSnapshot> {
        let entry = self.entry(provider_id)?;
        let state = entry.state.read().await;
        Some(RuntimeSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            last_success_at: state.last_success_at,
            last_failure_at: state.last_failure_at,
            ewma_latency_ms: state.ewma_latency_ms,
            success_rate: state.success_rate(),
            in_flight: entry.in_flight.load(Ordering::Relaxed),
            circuit_open_for_s: state
                .circuit_opened_at
                .map(|opened| opened.elapsed().as_secs()),
            probes_succeeded: state.probes_succeeded,
        })
    }

    /// Snapshot every registered provider.
    pub async fn snapshot_all(&self) -> Vec<(String, RuntimeSnapshot)> {
        let ids: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = self.snapshot(&id).await {
                snapshots.push((id, snapshot));
            }
        }
        snapshots
    }

    /// Current in-flight gauge for one provider.
    pub fn in_flight(&self, provider_id: &str) -> u32 {
        self.entry(provider_id)
            .map(|e| e.in_flight.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
