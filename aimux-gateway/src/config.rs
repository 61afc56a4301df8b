//! # Gateway Configuration
//!
//! The typed configuration the core consumes. The gateway binary loads it
//! from TOML, applies environment-variable overrides, and validates it
//! before the server starts; a validation failure is fatal (exit code 64).
//!
//! ## Environment variables
//!
//! - `AIMUX_HOST` / `AIMUX_PORT` — override the listener binding
//! - `AIMUX_LOG_LEVEL` — override the logging level
//! - `<PROVIDER_ID>_API_KEY` — inject a provider's credentials, keeping
//!   secrets out of the configuration file
//!
//! ## File example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! default_provider = "zai"
//!
//! [[providers]]
//! id = "zai"
//! kind = "zai"
//! capabilities = ["thinking", "tools", "streaming"]
//! models = ["glm-4.7"]
//!
//! [routing]
//! strategy = "best"
//!
//! [failover]
//! max_total_attempts = 4
//!
//! [deadlines]
//! per_request_ms = 30000
//! ```

use aimux_core::capability::ProviderDescriptor;
use aimux_core::classifier::ClassifierConfig;
use aimux_core::failover::FailoverConfig;
use aimux_core::health::HealthConfig;
use aimux_core::prettifier::PrettifierConfig;
use aimux_core::selector::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body
    pub max_body_bytes: usize,
    /// Grace window for in-flight requests during shutdown
    pub drain_window_s: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 16 * 1024 * 1024,
            drain_window_s: 30,
        }
    }
}

impl ServerConfig {
    pub fn drain_window(&self) -> Duration {
        Duration::from_secs(self.drain_window_s)
    }
}

/// Per-request and per-attempt deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub per_request_ms: u64,
    pub per_attempt_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            per_request_ms: 30_000,
            per_attempt_ms: 30_000,
        }
    }
}

impl DeadlineConfig {
    pub fn per_request(&self) -> Duration {
        Duration::from_millis(self.per_request_ms)
    }
}

/// Gateway-wide circuit-breaker block; per-provider policy fields override
/// the defaults given here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub max_consecutive_failures: u32,
    pub recovery_delay_s: u64,
    pub probe_timeout_ms: u64,
    pub successes_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_consecutive_failures: 5,
            recovery_delay_s: 60,
            probe_timeout_ms: 15_000,
            successes_to_close: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.enabled,
            successes_to_close: self.successes_to_close,
            probe_timeout_ms: self.probe_timeout_ms,
        }
    }
}

/// Logging settings applied by the binary at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AimuxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Optional routing hints per request type
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub thinking_provider: Option<String>,
    #[serde(default)]
    pub vision_provider: Option<String>,
    #[serde(default)]
    pub tools_provider: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    #[serde(default)]
    pub routing: RoutingPolicy,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub prettifier: PrettifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AimuxConfig {
    /// Load from a TOML file, apply environment overrides, and validate.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config file {path}: {e}"))?;
        let mut config: AimuxConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("cannot parse config file {path}: {e}"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("AIMUX_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("AIMUX_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid AIMUX_PORT: {port_str}"))?;
            if port > 0 {
                self.server.port = port;
            }
        }
        if let Ok(level) = env::var("AIMUX_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }

        for descriptor in &mut self.providers {
            let env_key = format!(
                "{}_API_KEY",
                descriptor.id.to_uppercase().replace('-', "_")
            );
            if let Ok(api_key) = env::var(&env_key) {
                if !api_key.is_empty() {
                    descriptor.credentials =
                        aimux_core::capability::Credentials::new(api_key);
                    tracing::debug!(provider = %descriptor.id, "credentials loaded from environment");
                }
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_providers()?;
        self.validate_routing()?;
        self.validate_failover()?;
        self.validate_deadlines()?;
        self.validate_prettifier()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(anyhow::anyhow!("server max_body_bytes cannot be 0"));
        }
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.providers {
            descriptor
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid provider: {e}"))?;
            if !seen.insert(&descriptor.id) {
                return Err(anyhow::anyhow!("duplicate provider id: {}", descriptor.id));
            }
        }

        for (field, hint) in [
            ("default_provider", &self.default_provider),
            ("thinking_provider", &self.thinking_provider),
            ("vision_provider", &self.vision_provider),
            ("tools_provider", &self.tools_provider),
        ] {
            if let Some(hint) = hint {
                if !self.providers.iter().any(|p| &p.id == hint) {
                    return Err(anyhow::anyhow!(
                        "{field} references unknown provider '{hint}'"
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_routing(&self) -> anyhow::Result<()> {
        if self.routing.k == 0 {
            return Err(anyhow::anyhow!("routing.k cannot be 0"));
        }
        if !self.routing.temperature.is_finite() || self.routing.temperature <= 0.0 {
            return Err(anyhow::anyhow!("routing.temperature must be positive"));
        }
        Ok(())
    }

    fn validate_failover(&self) -> anyhow::Result<()> {
        if self.failover.max_total_attempts == 0 {
            return Err(anyhow::anyhow!("failover.max_total_attempts cannot be 0"));
        }
        if self.failover.per_provider_attempts == 0 {
            return Err(anyhow::anyhow!("failover.per_provider_attempts cannot be 0"));
        }
        if self.failover.jitter_ratio < 0.0 || self.failover.jitter_ratio > 1.0 {
            return Err(anyhow::anyhow!(
                "failover.jitter_ratio must be between 0.0 and 1.0"
            ));
        }
        if self.failover.max_backoff_ms < self.failover.initial_backoff_ms {
            return Err(anyhow::anyhow!(
                "failover.max_backoff_ms cannot be smaller than initial_backoff_ms"
            ));
        }
        Ok(())
    }

    fn validate_deadlines(&self) -> anyhow::Result<()> {
        if self.deadlines.per_request_ms == 0 {
            return Err(anyhow::anyhow!("deadlines.per_request_ms cannot be 0"));
        }
        if self.deadlines.per_attempt_ms == 0 {
            return Err(anyhow::anyhow!("deadlines.per_attempt_ms cannot be 0"));
        }
        Ok(())
    }

    fn validate_prettifier(&self) -> anyhow::Result<()> {
        if self.prettifier.max_stream_buffer_bytes == 0 {
            return Err(anyhow::anyhow!(
                "prettifier.max_stream_buffer_bytes cannot be 0"
            ));
        }
        if self.prettifier.flush_threshold_bytes > self.prettifier.max_stream_buffer_bytes {
            return Err(anyhow::anyhow!(
                "prettifier.flush_threshold_bytes cannot exceed max_stream_buffer_bytes"
            ));
        }
        if self.prettifier.default_formatter.is_empty() {
            return Err(anyhow::anyhow!("prettifier.default_formatter cannot be empty"));
        }
        Ok(())
    }

    fn validate_logging(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "invalid log level: {}. Use one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}
