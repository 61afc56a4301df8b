//! # Provider Selection
//!
//! The selector turns a classified request plus the current descriptor and
//! runtime snapshots into a ranked candidate list. Filtering removes
//! providers that are disabled, missing a required capability, or not
//! selectable health-wise; the survivors are scored with a weighted sum and
//! sorted. The full sorted list is returned, not just the winner, because
//! the failover engine walks it in order.
//!
//! Scoring is a straight weighted sum:
//!
//! - `+ w_priority · priority_score`
//! - `− w_latency · ewma_latency_ms` (weight ×3 for latency-sensitive requests)
//! - `− w_cost · cost_per_output_token · estimated_output_tokens` (weight ×3
//!   for cost-sensitive requests)
//! - `+ w_health · success_rate`
//! - `− w_load · in_flight / max_concurrent`
//!
//! Ties break on the lexicographic provider id, so under the `best` strategy
//! the ranking is a pure function of its inputs.

use crate::capability::ProviderDescriptor;
use crate::classifier::RequestClassification;
use crate::health::{ProviderStatus, RuntimeSnapshot};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Load-balancing mode applied on top of the score ranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    /// Highest score first
    #[default]
    #[serde(rename = "best")]
    Best,
    /// Sample proportional to `exp(score / temperature)`
    #[serde(rename = "weighted-random")]
    WeightedRandom,
    /// Cycle across the top k by score
    #[serde(rename = "round-robin-among-top-k")]
    RoundRobinAmongTopK,
    /// Among the top k by score, prefer the lowest in-flight count
    #[serde(rename = "least-inflight")]
    LeastInflight,
}

/// Weights for the scoring terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub priority: f64,
    pub latency: f64,
    pub cost: f64,
    pub health: f64,
    pub load: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            priority: 1.0,
            latency: 0.05,
            cost: 20.0,
            health: 50.0,
            load: 25.0,
        }
    }
}

/// Full routing policy block, replaceable at runtime via the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Pool size for the top-k strategies
    #[serde(default = "default_k")]
    pub k: usize,
    /// Softmax temperature for weighted-random sampling
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub weights: RoutingWeights,
}

fn default_k() -> usize {
    2
}

fn default_temperature() -> f64 {
    1.0
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Best,
            k: default_k(),
            temperature: default_temperature(),
            weights: RoutingWeights::default(),
        }
    }
}

/// One provider as seen by the selector: immutable descriptor plus a
/// point-in-time runtime snapshot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub descriptor: Arc<ProviderDescriptor>,
    pub runtime: RuntimeSnapshot,
}

/// Entry of the ranked output list.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub id: String,
    pub score: f64,
}

/// Stateless apart from the round-robin cursor.
pub struct ProviderSelector {
    round_robin: AtomicUsize,
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self {
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Produce the ranked candidate list for one request.
    ///
    /// An empty result means no provider qualifies; the caller surfaces
    /// `NoEligibleProvider`.
    pub fn select(
        &self,
        candidates: &[Candidate],
        classification: &RequestClassification,
        policy: &RoutingPolicy,
        cost_sensitive: bool,
        latency_sensitive: bool,
    ) -> Vec<RankedCandidate> {
        let mut scored: Vec<RankedCandidate> = candidates
            .iter()
            .filter(|c| Self::eligible(c, classification))
            .map(|c| RankedCandidate {
                id: c.descriptor.id.clone(),
                score: Self::score(
                    c,
                    classification,
                    &policy.weights,
                    cost_sensitive,
                    latency_sensitive,
                ),
            })
            .collect();

        // Descending score, lexicographic id on ties for reproducible routing.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        if scored.len() > 1 {
            match policy.strategy {
                RoutingStrategy::Best => {}
                RoutingStrategy::WeightedRandom => {
                    scored = Self::weighted_shuffle(scored, policy.temperature);
                }
                RoutingStrategy::RoundRobinAmongTopK => {
                    let k = policy.k.clamp(1, scored.len());
                    let offset = self.round_robin.fetch_add(1, Ordering::Relaxed) % k;
                    scored[..k].rotate_left(offset);
                }
                RoutingStrategy::LeastInflight => {
                    let k = policy.k.clamp(1, scored.len());
                    let by_id: std::collections::HashMap<&str, u32> = candidates
                        .iter()
                        .map(|c| (c.descriptor.id.as_str(), c.runtime.in_flight))
                        .collect();
                    scored[..k].sort_by(|a, b| {
                        let load_a = by_id.get(a.id.as_str()).copied().unwrap_or(0);
                        let load_b = by_id.get(b.id.as_str()).copied().unwrap_or(0);
                        load_a
                            .cmp(&load_b)
                            .then_with(|| {
                                b.score
                                    .partial_cmp(&a.score)
                                    .unwrap_or(std::cmp::Ordering::Equal)
                            })
                            .then_with(|| a.id.cmp(&b.id))
                    });
                }
            }
        }

        scored
    }

    fn eligible(candidate: &Candidate, classification: &RequestClassification) -> bool {
        candidate.descriptor.enabled
            && candidate
                .descriptor
                .capabilities
                .superset_of(&classification.required_capabilities)
            && matches!(
                candidate.runtime.status,
                ProviderStatus::Healthy | ProviderStatus::Degraded
            )
    }

    fn score(
        candidate: &Candidate,
        classification: &RequestClassification,
        weights: &RoutingWeights,
        cost_sensitive: bool,
        latency_sensitive: bool,
    ) -> f64 {
        let descriptor = &candidate.descriptor;
        let runtime = &candidate.runtime;

        let latency_weight = if latency_sensitive {
            weights.latency * 3.0
        } else {
            weights.latency
        };
        let cost_weight = if cost_sensitive {
            weights.cost * 3.0
        } else {
            weights.cost
        };

        let load = if descriptor.limits.max_concurrent > 0 {
            runtime.in_flight as f64 / descriptor.limits.max_concurrent as f64
        } else {
            0.0
        };
        let estimated_cost = descriptor.policy.cost_per_output_token
            * classification.estimated_output_tokens as f64;

        weights.priority * descriptor.policy.priority_score
            - latency_weight * runtime.ewma_latency_ms
            - cost_weight * estimated_cost
            + weights.health * runtime.success_rate
            - weights.load * load
    }

    /// Sample a full permutation without replacement, weight `exp(score/τ)`.
    fn weighted_shuffle(mut ranked: Vec<RankedCandidate>, temperature: f64) -> Vec<RankedCandidate> {
        let tau = if temperature.is_finite() && temperature > 1e-6 {
            temperature
        } else {
            1e-6
        };
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(ranked.len());

        while !ranked.is_empty() {
            // shift by the max score so exp() stays finite
            let max_score = ranked
                .iter()
                .map(|c| c.score)
                .fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = ranked
                .iter()
                .map(|c| ((c.score - max_score) / tau).exp())
                .collect();
            let total: f64 = weights.iter().sum();

            let mut roll: f64 = rng.gen::<f64>() * total;
            let mut picked = ranked.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                roll -= w;
                if roll <= 0.0 {
                    picked = i;
                    break;
                }
            }
            out.push(ranked.remove(picked));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, ProviderKind};
    use crate::classifier::{ClassifierConfig, RequestClassifier};
    use crate::models::{CanonicalRequest, ContentBlock, Message, Role};

    fn candidate(
        id: &str,
        capabilities: &[Capability],
        priority: f64,
        status: ProviderStatus,
    ) -> Candidate {
        let descriptor = ProviderDescriptor::new(id, ProviderKind::Synthetic)
            .with_capabilities(capabilities.iter().copied())
            .with_priority(priority);
        Candidate {
            descriptor: Arc::new(descriptor),
            runtime: RuntimeSnapshot {
                status,
                consecutive_failures: 0,
                last_success_at: None,
                last_failure_at: None,
                ewma_latency_ms: 0.0,
                success_rate: 1.0,
                in_flight: 0,
                circuit_open_for_s: None,
                probes_succeeded: 0,
            },
        }
    }

    fn classify(request: &CanonicalRequest) -> RequestClassification {
        RequestClassifier::new(ClassifierConfig::default()).classify(request)
    }

    fn standard_classification() -> RequestClassification {
        classify(&CanonicalRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        })
    }

    #[test]
    fn vision_request_filters_to_capable_provider() {
        let selector = ProviderSelector::new();
        let request = CanonicalRequest {
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock::ImageRef {
                    url: "https://example.com/x.png".to_string(),
                    media_type: None,
                }],
            }],
            ..Default::default()
        };
        let classification = classify(&request);

        let candidates = vec![
            candidate("a", &[Capability::Tools], 100.0, ProviderStatus::Healthy),
            candidate(
                "b",
                &[Capability::Vision, Capability::Tools],
                50.0,
                ProviderStatus::Healthy,
            ),
        ];

        let ranked = selector.select(
            &candidates,
            &classification,
            &RoutingPolicy::default(),
            false,
            false,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "b");
    }

    #[test]
    fn disabled_and_circuit_open_providers_never_rank() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();

        let mut disabled = candidate("a", &[], 100.0, ProviderStatus::Healthy);
        Arc::get_mut(&mut disabled.descriptor).unwrap().enabled = false;
        let open = candidate("b", &[], 100.0, ProviderStatus::CircuitOpen);
        let unhealthy = candidate("c", &[], 100.0, ProviderStatus::Unhealthy);
        let degraded = candidate("d", &[], 10.0, ProviderStatus::Degraded);

        let ranked = selector.select(
            &[disabled, open, unhealthy, degraded],
            &classification,
            &RoutingPolicy::default(),
            false,
            false,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "d");
    }

    #[test]
    fn empty_candidate_set_returns_empty_list() {
        let selector = ProviderSelector::new();
        let ranked = selector.select(
            &[],
            &standard_classification(),
            &RoutingPolicy::default(),
            false,
            false,
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn equal_scores_tie_break_lexicographically() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();
        let candidates = vec![
            candidate("zeta", &[], 50.0, ProviderStatus::Healthy),
            candidate("alpha", &[], 50.0, ProviderStatus::Healthy),
            candidate("mid", &[], 50.0, ProviderStatus::Healthy),
        ];

        for _ in 0..5 {
            let ranked = selector.select(
                &candidates,
                &classification,
                &RoutingPolicy::default(),
                false,
                false,
            );
            let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        }
    }

    #[test]
    fn latency_sensitivity_triples_latency_penalty() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();

        let mut fast = candidate("fast", &[], 10.0, ProviderStatus::Healthy);
        fast.runtime.ewma_latency_ms = 100.0;
        let mut slow = candidate("slow", &[], 13.0, ProviderStatus::Healthy);
        slow.runtime.ewma_latency_ms = 150.0;

        let candidates = vec![fast, slow];
        let policy = RoutingPolicy::default();

        // with default weights the higher priority wins despite latency
        let relaxed = selector.select(&candidates, &classification, &policy, false, false);
        // tripled latency weight flips the ordering
        let strict = selector.select(&candidates, &classification, &policy, false, true);

        assert_eq!(relaxed[0].id, "slow");
        assert_eq!(strict[0].id, "fast");
    }

    #[test]
    fn cost_sensitivity_penalizes_expensive_providers() {
        let selector = ProviderSelector::new();
        let classification = classify(&CanonicalRequest {
            messages: vec![Message::user("hello")],
            max_tokens: Some(2_000),
            ..Default::default()
        });

        let mut pricey = candidate("pricey", &[], 80.0, ProviderStatus::Healthy);
        Arc::get_mut(&mut pricey.descriptor)
            .unwrap()
            .policy
            .cost_per_output_token = 0.0005;
        let cheap = candidate("cheap", &[], 50.0, ProviderStatus::Healthy);
        let candidates = [pricey, cheap];
        let policy = RoutingPolicy::default();

        // without cost sensitivity the higher priority still wins
        let relaxed = selector.select(&candidates, &classification, &policy, false, false);
        // tripled cost weight flips the ordering
        let strict = selector.select(&candidates, &classification, &policy, true, false);

        assert_eq!(relaxed[0].id, "pricey");
        assert_eq!(strict[0].id, "cheap");
    }

    #[test]
    fn weighted_random_returns_a_permutation_of_eligible_ids() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();
        let candidates = vec![
            candidate("a", &[], 90.0, ProviderStatus::Healthy),
            candidate("b", &[], 50.0, ProviderStatus::Healthy),
            candidate("c", &[], 10.0, ProviderStatus::Healthy),
        ];
        let policy = RoutingPolicy {
            strategy: RoutingStrategy::WeightedRandom,
            ..Default::default()
        };

        for _ in 0..20 {
            let ranked = selector.select(&candidates, &classification, &policy, false, false);
            let mut ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
            ids.sort_unstable();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn round_robin_cycles_the_top_k() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();
        let candidates = vec![
            candidate("a", &[], 90.0, ProviderStatus::Healthy),
            candidate("b", &[], 80.0, ProviderStatus::Healthy),
            candidate("c", &[], 10.0, ProviderStatus::Healthy),
        ];
        let policy = RoutingPolicy {
            strategy: RoutingStrategy::RoundRobinAmongTopK,
            k: 2,
            ..Default::default()
        };

        let first = selector.select(&candidates, &classification, &policy, false, false);
        let second = selector.select(&candidates, &classification, &policy, false, false);
        let third = selector.select(&candidates, &classification, &policy, false, false);

        assert_eq!(first[0].id, "a");
        assert_eq!(second[0].id, "b");
        assert_eq!(third[0].id, "a");
        // the tail beyond k keeps its score order
        assert_eq!(first[2].id, "c");
    }

    #[test]
    fn least_inflight_prefers_idle_provider_within_top_k() {
        let selector = ProviderSelector::new();
        let classification = standard_classification();

        let mut busy = candidate("busy", &[], 90.0, ProviderStatus::Healthy);
        busy.runtime.in_flight = 20;
        let idle = candidate("idle", &[], 80.0, ProviderStatus::Healthy);

        let policy = RoutingPolicy {
            strategy: RoutingStrategy::LeastInflight,
            k: 2,
            ..Default::default()
        };
        let ranked = selector.select(&[busy, idle], &classification, &policy, false, false);
        assert_eq!(ranked[0].id, "idle");
        assert_eq!(ranked[1].id, "busy");
    }
}
