//! Authenticated WebSocket push channel with per-user presence.

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hl_core::metrics;
use hl_core::realtime::RealtimeEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::auth::bearer_token;
use crate::{AppState, SERVICE_NAME};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const BROADCAST_CAPACITY: usize = 1024;
const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Fans realtime events out to the sockets of their target user.
#[derive(Clone)]
pub(crate) struct Gateway {
    tx: broadcast::Sender<RealtimeEvent>,
    presence: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
}

impl Gateway {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            presence: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns false when no socket is subscribed.
    pub(crate) fn emit_to_user(&self, user_id: &str, event: &str, data: Value) -> bool {
        self.tx.send(RealtimeEvent::new(user_id, event, data)).is_ok()
    }

    pub(crate) async fn is_online(&self, user_id: &str) -> bool {
        self.presence
            .read()
            .await
            .get(user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    async fn connect(&self, user_id: &str) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.presence
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);
        connection_id
    }

    async fn disconnect(&self, user_id: &str, connection_id: Uuid) {
        let mut presence = self.presence.write().await;
        if let Some(connections) = presence.get_mut(user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                presence.remove(user_id);
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

pub(crate) fn frame_for(event: &RealtimeEvent) -> String {
    json!({ "event": event.event, "data": event.data }).to_string()
}

pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(&headers))
        .map(str::to_string);
    let user_id = token.and_then(|token| {
        state
            .tokens
            .verify_access(&token)
            .ok()
            .map(|claims| claims.sub)
    });
    ws.on_upgrade(move |socket| async move {
        match user_id {
            Some(user_id) => handle_socket(state, user_id, socket).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    metrics::inc_auth_failure(SERVICE_NAME, "ws");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: "unauthorized".into(),
        })))
        .await;
}

async fn handle_socket(state: AppState, user_id: String, socket: WebSocket) {
    metrics::inc_ws_connections(SERVICE_NAME);
    let gateway = state.gateway.clone();
    let connection_id = gateway.connect(&user_id).await;
    tracing::debug!(%user_id, %connection_id, "socket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events = gateway.subscribe();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "ping"
                            && sender.send(Message::Text("pong".into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            recv = events.recv() => {
                match recv {
                    Ok(event) if event.user_id == user_id => {
                        if let Err(err) = send_event(&mut sender, &event).await {
                            tracing::debug!(error = %err, %user_id, "socket send failed");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%user_id, skipped, "socket lagged behind realtime events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    gateway.disconnect(&user_id, connection_id).await;
    metrics::dec_ws_connections(SERVICE_NAME);
    tracing::debug!(%user_id, %connection_id, "socket disconnected");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &RealtimeEvent) -> Result<()> {
    sender.send(Message::Text(frame_for(event))).await?;
    Ok(())
}
