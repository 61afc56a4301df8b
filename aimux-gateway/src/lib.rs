//! # Aimux Gateway
//!
//! HTTP composition of the Aimux core: the Anthropic-compatible wire
//! surface, the control plane, metrics, and the WebSocket update stream.
//!
//! ## Module map
//!
//! - [`config`] — typed configuration, TOML loading, env overrides
//! - [`gateway`] — the per-request pipeline and control-plane operations
//! - [`gateway_error`] — the error taxonomy's HTTP mapping
//! - [`wire`] — wire request/response conversion
//! - [`handlers`] — axum endpoint handlers
//! - [`server`] — router assembly and graceful shutdown
//! - [`metrics`] — counters, histograms, aggregation
//! - [`ws`] — metric-update broadcasting

pub mod config;
pub mod gateway;
pub mod gateway_error;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod wire;
pub mod ws;

pub use config::AimuxConfig;
pub use server::create_server;
