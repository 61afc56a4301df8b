//! # Error Taxonomy and Classification
//!
//! Two layers of error handling live here. [`AdapterError`] is what a
//! provider adapter reports for a single backend call: HTTP failures, API
//! status errors, decode problems, timeouts. [`ErrorKind`] is the closed
//! taxonomy the gateway surfaces to clients; every error path in the system
//! maps onto exactly one kind.
//!
//! Between the two sits [`ErrorClass`], the failover engine's view: given an
//! adapter error, [`AdapterError::classify`] decides whether to retry the
//! same provider, move to the next one, or abort the request. The mapping
//! follows a fixed table:
//!
//! | Observed | Class |
//! |---|---|
//! | connection refused / DNS / TLS | retryable transient |
//! | HTTP 408, 429, 503 | retryable elsewhere |
//! | HTTP 500, 502, 504 | retryable transient |
//! | HTTP 400, 422 | client fault |
//! | HTTP 401, 403 | permanent provider fault (misconfigured key) |
//! | body decode failure | retryable transient once, then permanent |
//! | deadline exceeded | retryable transient |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of error kinds the gateway distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request could not be parsed or violates basic constraints
    MalformedRequest,
    /// Selection produced an empty candidate list
    NoEligibleProvider,
    /// A provider call exceeded its per-attempt timeout
    ProviderTimeout,
    /// Transient provider failure (5xx, network)
    ProviderTransient,
    /// Provider or local rate limit rejected the call
    ProviderRateLimited,
    /// Provider rejected the gateway's credentials
    ProviderAuth,
    /// Provider is persistently failing
    ProviderPermanent,
    /// The per-request deadline expired
    DeadlineExceeded,
    /// Response content matched a configured injection pattern
    SecurityViolation,
    /// Control-plane mutation carried an invalid payload
    ConfigurationInvalid,
    /// Unexpected internal failure; always a bug
    InternalError,
}

impl ErrorKind {
    /// Whether the client may reasonably retry the request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoEligibleProvider
                | ErrorKind::ProviderTimeout
                | ErrorKind::ProviderTransient
                | ErrorKind::ProviderRateLimited
                | ErrorKind::DeadlineExceeded
        )
    }

    /// Stable string form used in wire responses and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedRequest => "MalformedRequest",
            ErrorKind::NoEligibleProvider => "NoEligibleProvider",
            ErrorKind::ProviderTimeout => "ProviderTimeout",
            ErrorKind::ProviderTransient => "ProviderTransient",
            ErrorKind::ProviderRateLimited => "ProviderRateLimited",
            ErrorKind::ProviderAuth => "ProviderAuth",
            ErrorKind::ProviderPermanent => "ProviderPermanent",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::SecurityViolation => "SecurityViolation",
            ErrorKind::ConfigurationInvalid => "ConfigurationInvalid",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the failover engine reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is bad; no provider will accept it
    ClientFault,
    /// Same provider may succeed on retry after backoff
    RetryableTransient,
    /// This provider is saturated or cooling down; try the next one now
    RetryableElsewhere,
    /// Provider is broken for the foreseeable future; mark it unhealthy
    PermanentProvider,
}

/// Error reported by a provider adapter for a single backend call.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport-level failure from the HTTP client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status with the provider's message
    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Provider rejected the configured credentials
    #[error("authentication rejected by provider")]
    Auth,

    /// Provider-side rate limit
    #[error("rate limited by provider")]
    RateLimited,

    /// The attempt timed out against the provider
    #[error("provider call timed out")]
    Timeout,

    /// The request deadline expired before the attempt finished
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Response body was not valid JSON
    #[error("response decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Response parsed but did not match the expected shape
    #[error("invalid response shape: {message}")]
    InvalidResponse { message: String },

    /// Adapter misconfiguration detected at build or call time
    #[error("adapter configuration error: {message}")]
    Configuration { message: String },

    /// Connection-level failure that reqwest did not surface as an error type
    #[error("network error: {message}")]
    Network { message: String },
}

impl AdapterError {
    /// Classify this error for the failover engine.
    ///
    /// Decode failures classify as transient here; the failover engine
    /// escalates a second decode failure from the same provider to
    /// [`ErrorClass::PermanentProvider`].
    pub fn classify(&self) -> ErrorClass {
        match self {
            AdapterError::Http(e) => {
                if e.is_timeout() {
                    ErrorClass::RetryableTransient
                } else if e.is_connect() {
                    ErrorClass::RetryableTransient
                } else if let Some(status) = e.status() {
                    Self::classify_status(status.as_u16())
                } else {
                    ErrorClass::RetryableTransient
                }
            }
            AdapterError::Api { code, .. } => Self::classify_status(*code),
            AdapterError::Auth => ErrorClass::PermanentProvider,
            AdapterError::RateLimited => ErrorClass::RetryableElsewhere,
            AdapterError::Timeout => ErrorClass::RetryableTransient,
            AdapterError::DeadlineExceeded => ErrorClass::RetryableTransient,
            AdapterError::Decode(_) => ErrorClass::RetryableTransient,
            AdapterError::InvalidResponse { .. } => ErrorClass::RetryableTransient,
            AdapterError::Configuration { .. } => ErrorClass::PermanentProvider,
            AdapterError::Network { .. } => ErrorClass::RetryableTransient,
        }
    }

    fn classify_status(code: u16) -> ErrorClass {
        match code {
            408 | 429 | 503 => ErrorClass::RetryableElsewhere,
            500 | 502 | 504 => ErrorClass::RetryableTransient,
            400 | 422 => ErrorClass::ClientFault,
            401 | 403 => ErrorClass::PermanentProvider,
            code if code >= 500 => ErrorClass::RetryableTransient,
            _ => ErrorClass::ClientFault,
        }
    }

    /// Map this error onto the surfaced taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            AdapterError::Timeout => ErrorKind::ProviderTimeout,
            AdapterError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AdapterError::Auth => ErrorKind::ProviderAuth,
            AdapterError::RateLimited => ErrorKind::ProviderRateLimited,
            AdapterError::Api { code, .. } => match Self::classify_status(*code) {
                ErrorClass::ClientFault => ErrorKind::MalformedRequest,
                ErrorClass::PermanentProvider => ErrorKind::ProviderAuth,
                ErrorClass::RetryableElsewhere => ErrorKind::ProviderRateLimited,
                ErrorClass::RetryableTransient => ErrorKind::ProviderTransient,
            },
            AdapterError::Configuration { .. } => ErrorKind::ProviderPermanent,
            _ => ErrorKind::ProviderTransient,
        }
    }
}
