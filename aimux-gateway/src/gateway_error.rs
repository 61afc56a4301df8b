//! # Gateway Error Surface
//!
//! Every error path in the gateway resolves to a [`GatewayError`]: one
//! [`ErrorKind`] from the closed taxonomy, a human-readable message, the
//! provider involved (when there is one), a retry hint, and the request's
//! correlation id. Conversion into an HTTP response is automatic via
//! `IntoResponse`.
//!
//! Status mapping:
//!
//! | Kind | Status |
//! |---|---|
//! | `MalformedRequest`, `SecurityViolation`, `ConfigurationInvalid` | 400 |
//! | `ProviderRateLimited` | 429 |
//! | `NoEligibleProvider` | 503 |
//! | `DeadlineExceeded`, `ProviderTimeout` | 504 |
//! | `ProviderTransient`, `ProviderAuth`, `ProviderPermanent` | 502 |
//! | `InternalError` | 500 |

use aimux_core::error::ErrorKind;
use aimux_core::failover::FailoverError;
use aimux_core::prettifier::PrettifyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Structured error returned to clients and control-plane callers.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub correlation_id: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            correlation_id: String::new(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationInvalid, message)
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Build from a terminal failover outcome.
    pub fn from_failover(error: &FailoverError) -> Self {
        let provider = error.trace().last().map(|r| r.provider_id.clone());
        Self {
            kind: error.error_kind(),
            message: error.to_string(),
            provider,
            correlation_id: String::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::MalformedRequest
            | ErrorKind::SecurityViolation
            | ErrorKind::ConfigurationInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::ProviderRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NoEligibleProvider => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::DeadlineExceeded | ErrorKind::ProviderTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ErrorKind::ProviderTransient
            | ErrorKind::ProviderAuth
            | ErrorKind::ProviderPermanent => StatusCode::BAD_GATEWAY,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body in the shared error envelope.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "kind": self.kind.as_str(),
                "message": self.message,
                "provider": self.provider,
                "retryable": self.kind.retryable(),
                "correlation_id": self.correlation_id,
            }
        })
    }
}

impl From<PrettifyError> for GatewayError {
    fn from(error: PrettifyError) -> Self {
        Self::new(error.error_kind(), error.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::InternalError {
            tracing::error!(
                correlation_id = %self.correlation_id,
                "internal error: {}",
                self.message
            );
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy_table() {
        let cases = [
            (ErrorKind::MalformedRequest, StatusCode::BAD_REQUEST),
            (ErrorKind::SecurityViolation, StatusCode::BAD_REQUEST),
            (ErrorKind::NoEligibleProvider, StatusCode::SERVICE_UNAVAILABLE),
            (ErrorKind::DeadlineExceeded, StatusCode::GATEWAY_TIMEOUT),
            (ErrorKind::ProviderRateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ErrorKind::ProviderTransient, StatusCode::BAD_GATEWAY),
            (ErrorKind::InternalError, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            assert_eq!(GatewayError::new(kind, "x").status(), status, "{kind}");
        }
    }

    #[test]
    fn body_carries_the_full_envelope() {
        let error = GatewayError::new(ErrorKind::NoEligibleProvider, "nothing qualified")
            .with_provider("zai")
            .with_correlation_id("corr-1");
        let body = error.body();
        assert_eq!(body["error"]["kind"], "NoEligibleProvider");
        assert_eq!(body["error"]["provider"], "zai");
        assert_eq!(body["error"]["retryable"], true);
        assert_eq!(body["error"]["correlation_id"], "corr-1");
    }
}
