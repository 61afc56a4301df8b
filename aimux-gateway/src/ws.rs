//! # WebSocket Metrics Stream
//!
//! `GET /ws` upgrades into a subscription to the gateway's metric updates.
//! A background publisher broadcasts periodic `metrics_update` messages and
//! `provider_status` messages whenever a provider's health state changes.
//! Clients can pause and resume delivery with
//! `{"type": "toggle_refresh", "enabled": false}`.

use crate::gateway::GatewayCore;
use crate::metrics::MetricsHub;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Publisher interval for metric updates.
const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Broadcast capacity; slow subscribers skip missed updates.
const CHANNEL_CAPACITY: usize = 256;

/// Message a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ToggleRefresh { enabled: bool },
}

/// Fan-out hub for metric updates.
pub struct MetricsBroadcaster {
    tx: broadcast::Sender<serde_json::Value>,
}

impl Default for MetricsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: serde_json::Value) {
        // no subscribers is not an error
        let _ = self.tx.send(message);
    }

    /// Spawn the periodic publisher: metrics snapshots every interval and
    /// provider status transitions as they are observed.
    pub fn spawn_publisher(
        self: &Arc<Self>,
        core: Arc<GatewayCore>,
        metrics: Arc<MetricsHub>,
    ) -> tokio::task::JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PUBLISH_INTERVAL);
            let mut last_statuses: HashMap<String, String> = HashMap::new();

            loop {
                tick.tick().await;

                let aggregated = metrics.aggregate();
                broadcaster.publish(json!({
                    "type": "metrics_update",
                    "metrics": aggregated,
                }));

                for (descriptor, snapshot) in core.provider_overview().await {
                    let status = format!("{:?}", snapshot.status).to_lowercase();
                    let changed = last_statuses
                        .get(&descriptor.id)
                        .map(|previous| previous != &status)
                        .unwrap_or(true);
                    if changed {
                        broadcaster.publish(json!({
                            "type": "provider_status",
                            "provider": descriptor.id,
                            "status": status,
                        }));
                        last_statuses.insert(descriptor.id.clone(), status);
                    }
                }
            }
        })
    }

    /// Drive one upgraded socket until it closes.
    pub async fn serve_socket(&self, socket: WebSocket) {
        let mut rx = self.subscribe();
        let (mut sink, mut stream) = socket.split();
        let mut refresh_enabled = true;

        loop {
            tokio::select! {
                update = rx.recv() => {
                    match update {
                        Ok(message) => {
                            if !refresh_enabled {
                                continue;
                            }
                            let text = match serde_json::to_string(&message) {
                                Ok(text) => text,
                                Err(_) => continue,
                            };
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "ws subscriber lagged; skipping updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::ToggleRefresh { enabled }) => {
                                    refresh_enabled = enabled;
                                }
                                Err(e) => {
                                    tracing::debug!("ignoring malformed ws message: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sink.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!("ws receive error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }
}
