//! Provider descriptors: the immutable half of provider state.
//!
//! A [`ProviderDescriptor`] is created at configuration load (or through the
//! control plane) and never mutated afterwards; hot-reload replaces the whole
//! descriptor set atomically. The mutable half lives in the health
//! supervisor's runtime state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// A named feature a backend advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Thinking,
    Vision,
    Tools,
    Streaming,
    LongContext,
}

/// Set of capabilities, ordered for stable serialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct CapabilitySet(pub BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// True when every capability in `required` is present.
    pub fn superset_of(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Backend wire dialect a descriptor speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Cerebras,
    Zai,
    Minimax,
    AnthropicLike,
    OpenaiLike,
    Synthetic,
}

/// Opaque bearer material. Never persisted by the core and redacted from
/// Debug output and control-plane listings.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the secret for constructing an auth header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// Throughput and concurrency limits for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Requests per minute admitted by the local token bucket
    pub rpm: u32,
    /// Maximum concurrent in-flight calls
    pub max_concurrent: u32,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            rpm: 600,
            max_concurrent: 32,
            timeout_ms: 30_000,
        }
    }
}

impl ProviderLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Routing and circuit-breaker policy knobs for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPolicy {
    /// Static preference weight; higher scores rank earlier
    pub priority_score: f64,
    /// Cost per output token in USD, used by cost-sensitive scoring
    pub cost_per_output_token: f64,
    /// Consecutive failures that open the circuit
    pub max_consecutive_failures: u32,
    /// Cooling period before a recovery probe is allowed
    pub recovery_delay_s: u64,
    /// Interval between background health evaluations
    pub health_check_interval_s: u64,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            priority_score: 50.0,
            cost_per_output_token: 0.0,
            max_consecutive_failures: 5,
            recovery_delay_s: 60,
            health_check_interval_s: 30,
        }
    }
}

impl ProviderPolicy {
    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_s)
    }
}

/// Immutable description of one backend provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique short name, e.g. `"zai"`
    pub id: String,
    /// Wire dialect
    pub kind: ProviderKind,
    /// Base URL; empty means the adapter's built-in default
    #[serde(default)]
    pub endpoint: String,
    /// Opaque bearer material
    #[serde(default)]
    pub credentials: Credentials,
    /// Models this provider advertises, in preference order
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub limits: ProviderLimits,
    #[serde(default)]
    pub policy: ProviderPolicy,
    /// Client model hints rewritten to provider-native names
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint: String::new(),
            credentials: Credentials::default(),
            models: Vec::new(),
            capabilities: CapabilitySet::default(),
            limits: ProviderLimits::default(),
            policy: ProviderPolicy::default(),
            model_mapping: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Credentials::new(credentials);
        self
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.capabilities = CapabilitySet::new(capabilities);
        self
    }

    pub fn with_models(mut self, models: impl IntoIterator<Item = String>) -> Self {
        self.models = models.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority_score: f64) -> Self {
        self.policy.priority_score = priority_score;
        self
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Resolve a client model hint to the provider-native model name.
    ///
    /// Falls back to the first advertised model when no hint is given.
    pub fn resolve_model(&self, hint: Option<&str>) -> String {
        match hint {
            Some(hint) => self
                .model_mapping
                .get(hint)
                .cloned()
                .unwrap_or_else(|| hint.to_string()),
            None => self.models.first().cloned().unwrap_or_default(),
        }
    }

    /// Basic structural validation, used by the control plane before a
    /// descriptor is registered.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("provider id cannot be empty".to_string());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("provider id '{}' contains invalid characters", self.id));
        }
        if !self.endpoint.is_empty()
            && !self.endpoint.starts_with("http://")
            && !self.endpoint.starts_with("https://")
        {
            return Err(format!(
                "provider {} endpoint must start with http:// or https://",
                self.id
            ));
        }
        if self.limits.rpm == 0 {
            return Err(format!("provider {} rpm cannot be 0", self.id));
        }
        if self.limits.max_concurrent == 0 {
            return Err(format!("provider {} max_concurrent cannot be 0", self.id));
        }
        if self.limits.timeout_ms == 0 {
            return Err(format!("provider {} timeout_ms cannot be 0", self.id));
        }
        if self.policy.max_consecutive_failures == 0 {
            return Err(format!(
                "provider {} max_consecutive_failures cannot be 0",
                self.id
            ));
        }
        Ok(())
    }
}
