//! # HTTP Handlers
//!
//! The client-facing wire endpoint plus the control plane:
//!
//! - `POST /anthropic/v1/messages` — chat completions, buffered or SSE
//! - `GET  /anthropic/v1/models` — aggregated model list
//! - `GET  /health`, `GET /metrics` — operational state
//! - `GET/POST /providers`, `GET/PUT/DELETE /providers/{id}` — descriptor CRUD
//! - `POST /test` — direct provider diagnostics
//! - `GET/POST /config` — routing policy block
//! - `GET  /ws` — metric-update WebSocket

use crate::gateway::ControlPlaneError;
use crate::gateway_error::GatewayError;
use crate::server::AppState;
use crate::wire::{encode_response, WireRequest};
use aimux_core::capability::ProviderDescriptor;
use axum::body::Body;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{Response, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Chat completions on the Anthropic-compatible surface.
pub async fn messages(
    State(state): State<AppState>,
    Json(wire): Json<WireRequest>,
) -> Result<Response<Body>, GatewayError> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let request = wire
        .into_canonical()
        .map_err(|e| e.with_correlation_id(&correlation_id))?;

    if request.stream {
        return handle_streaming(state, request, correlation_id).await;
    }

    let reply = state.core.handle(request, &correlation_id).await?;
    let body = encode_response(
        &reply.response,
        &reply.artifact,
        reply.classification.request_type,
        &correlation_id,
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).map_err(|e| {
            GatewayError::internal(e.to_string()).with_correlation_id(&correlation_id)
        })?))
        .map_err(|e| GatewayError::internal(e.to_string()))?)
}

async fn handle_streaming(
    state: AppState,
    request: aimux_core::models::CanonicalRequest,
    correlation_id: String,
) -> Result<Response<Body>, GatewayError> {
    let handle = state.core.handle_stream(request, correlation_id).await?;

    let stream = ReceiverStream::new(handle.rx)
        .map(|payload| Event::default().data(payload.to_string()))
        .chain(tokio_stream::once(Event::default().data("[DONE]")))
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(stream).into_response())
}

/// Aggregated `{id, provider}` model list across enabled descriptors.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let registry = state.core.registry_snapshot().await;
    let mut models = Vec::new();
    for entry in registry.entries.values() {
        if !entry.descriptor.enabled {
            continue;
        }
        for model in &entry.descriptor.models {
            models.push(json!({
                "id": model,
                "provider": entry.descriptor.id,
            }));
        }
    }
    Json(json!({"models": models}))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_s": state.metrics.uptime_s(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let aggregated = state.metrics.aggregate();
    let mut provider_health = serde_json::Map::new();
    for (descriptor, snapshot) in state.core.provider_overview().await {
        provider_health.insert(
            descriptor.id.clone(),
            serde_json::to_value(&snapshot).unwrap_or(Value::Null),
        );
    }

    let mut body = serde_json::to_value(&aggregated).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut body {
        map.insert("provider_health".to_string(), Value::Object(provider_health));
    }
    Json(body)
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    let mut providers = Vec::new();
    for (descriptor, snapshot) in state.core.provider_overview().await {
        providers.push(json!({
            "id": descriptor.id,
            "status": snapshot.status,
            "ewma_latency_ms": snapshot.ewma_latency_ms,
            "success_rate": snapshot.success_rate,
            "in_flight": snapshot.in_flight,
            "limits": descriptor.limits,
        }));
    }
    Json(json!({"providers": providers}))
}

pub async fn provider_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let registry = state.core.registry_snapshot().await;
    let entry = registry
        .entries
        .get(&id)
        .ok_or_else(|| GatewayError::configuration(format!("provider '{id}' does not exist")))?;
    let snapshot = state.core.health().snapshot(&id).await;

    // credentials never leave the gateway
    let descriptor = &entry.descriptor;
    Ok(Json(json!({
        "id": descriptor.id,
        "kind": descriptor.kind,
        "endpoint": descriptor.endpoint,
        "models": descriptor.models,
        "capabilities": descriptor.capabilities,
        "limits": descriptor.limits,
        "policy": descriptor.policy,
        "enabled": descriptor.enabled,
        "runtime": snapshot,
    })))
}

pub async fn add_provider(
    State(state): State<AppState>,
    Json(descriptor): Json<ProviderDescriptor>,
) -> Response<Body> {
    match state.core.add_provider(descriptor).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({"status": "created"}))).into_response(),
        Err(error) => control_plane_response(error),
    }
}

pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(descriptor): Json<ProviderDescriptor>,
) -> Response<Body> {
    match state.core.update_provider(&id, descriptor).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "updated"}))).into_response(),
        Err(error) => control_plane_response(error),
    }
}

pub async fn remove_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response<Body> {
    match state.core.remove_provider(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "removed"}))).into_response(),
        Err(error) => control_plane_response(error),
    }
}

fn control_plane_response(error: ControlPlaneError) -> Response<Body> {
    let (status, kind) = match &error {
        ControlPlaneError::Duplicate(_) => (StatusCode::CONFLICT, "ConfigurationInvalid"),
        ControlPlaneError::NotFound(_) => (StatusCode::NOT_FOUND, "ConfigurationInvalid"),
        ControlPlaneError::Invalid(_) => (StatusCode::BAD_REQUEST, "ConfigurationInvalid"),
    };
    (
        status,
        Json(json!({
            "error": {
                "kind": kind,
                "message": error.to_string(),
                "provider": Value::Null,
                "retryable": false,
                "correlation_id": "",
            }
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub provider: String,
}

/// Diagnostic call against a single provider.
pub async fn test_provider(
    State(state): State<AppState>,
    Json(body): Json<TestRequest>,
) -> Result<Json<Value>, GatewayError> {
    let response = state.core.test_provider(&body.provider).await?;
    Ok(Json(json!({
        "provider": response.provider_id,
        "model_used": response.model_used,
        "latency_ms": response.latency_ms,
        "content": response.content,
        "usage": response.usage,
    })))
}

pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let policy = state.core.routing_policy().await;
    Json(json!({"routing": policy}))
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub routing: aimux_core::selector::RoutingPolicy,
}

pub async fn set_config(
    State(state): State<AppState>,
    Json(body): Json<ConfigUpdate>,
) -> Response<Body> {
    match state.core.set_routing_policy(body.routing).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "updated"}))).into_response(),
        Err(error) => control_plane_response(error),
    }
}

/// Metric-update subscription.
pub async fn ws_metrics(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response<Body> {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| async move {
        broadcaster.serve_socket(socket).await;
    })
}
