//! # Server Assembly
//!
//! Builds the application state and the axum router, and owns graceful
//! shutdown: on the shutdown signal the gateway stops accepting requests,
//! waits up to the configured drain window for in-flight requests, then
//! lets the process exit.

use crate::config::AimuxConfig;
use crate::gateway::GatewayCore;
use crate::handlers;
use crate::metrics::MetricsHub;
use crate::ws::MetricsBroadcaster;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<GatewayCore>,
    pub metrics: Arc<MetricsHub>,
    pub broadcaster: Arc<MetricsBroadcaster>,
    pub config: Arc<AimuxConfig>,
}

/// Build the application state and router, and start the background tasks
/// (recovery probes, metric publishing).
pub async fn create_server(config: AimuxConfig) -> anyhow::Result<(Router, AppState)> {
    let metrics = Arc::new(MetricsHub::new());
    let core = Arc::new(
        GatewayCore::new(&config, metrics.clone())
            .map_err(|e| anyhow::anyhow!("failed to build gateway core: {e}"))?,
    );
    let broadcaster = Arc::new(MetricsBroadcaster::new());

    core.spawn_probe_driver();
    broadcaster.spawn_publisher(core.clone(), metrics.clone());

    let state = AppState {
        core,
        metrics,
        broadcaster,
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        // wire protocol
        .route("/anthropic/v1/messages", post(handlers::messages))
        .route("/anthropic/v1/models", get(handlers::list_models))
        // control plane
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/providers",
            get(handlers::list_providers).post(handlers::add_provider),
        )
        .route(
            "/providers/{id}",
            get(handlers::provider_detail)
                .put(handlers::update_provider)
                .delete(handlers::remove_provider),
        )
        .route("/test", post(handlers::test_provider))
        .route(
            "/config",
            get(handlers::get_config).post(handlers::set_config),
        )
        .route("/ws", get(handlers::ws_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(config.server.max_body_bytes)),
        )
        .with_state(state.clone());

    Ok((app, state))
}

/// Resolve on ctrl-c (and SIGTERM on unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
