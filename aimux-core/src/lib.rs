//! # Aimux Core
//!
//! The gateway core of Aimux: everything between a resolved canonical
//! request and a prettified canonical response. This crate knows nothing
//! about HTTP serving; the `aimux-gateway` crate composes these pieces
//! behind the wire protocol.
//!
//! ## Components
//!
//! - [`classifier`] — derives the capability requirements of a request
//! - [`selector`] — filters and scores providers into a ranked list
//! - [`health`] — per-provider health state machine with circuit breaking
//! - [`rate_limit`] — per-provider token-bucket admission control
//! - [`failover`] — the sequential attempt loop over the ranked list
//! - [`providers`] — wire adapters for each backend dialect
//! - [`prettifier`] — response post-processing into the tabular artifact
//!
//! ## Request flow
//!
//! ```text
//! CanonicalRequest
//!   -> RequestClassifier -> RequestClassification
//!   -> ProviderSelector  -> ranked candidates
//!   -> FailoverEngine { RateLimiter -> ProviderAdapter -> HealthSupervisor }
//!   -> Prettifier -> PrettifiedArtifact
//! ```

pub mod capability;
pub mod classifier;
pub mod error;
pub mod failover;
pub mod health;
pub mod models;
pub mod prettifier;
pub mod providers;
pub mod rate_limit;
pub mod selector;

pub use capability::{Capability, CapabilitySet, ProviderDescriptor, ProviderKind};
pub use classifier::{RequestClassification, RequestClassifier};
pub use error::{AdapterError, ErrorClass, ErrorKind};
pub use failover::{FailoverConfig, FailoverEngine, FailoverError, FailoverOutcome};
pub use health::{HealthConfig, HealthSupervisor, ProviderStatus, RuntimeSnapshot};
pub use models::{CanonicalRequest, CanonicalResponse, Message, Segment, ToolCall, Usage};
pub use prettifier::{Prettifier, PrettifiedArtifact, PrettifierConfig};
pub use providers::{create_adapter, ProviderAdapter};
pub use rate_limit::{RateLimiter, RateLimitRejection};
pub use selector::{ProviderSelector, RoutingPolicy, RoutingStrategy};
