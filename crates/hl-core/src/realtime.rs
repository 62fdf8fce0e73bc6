use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgListener;
use sqlx::{Executor, Pool, Postgres};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const REALTIME_CHANNEL: &str = "hl_realtime";

/// Postgres caps NOTIFY payloads at 8000 bytes.
pub const MAX_PAYLOAD_BYTES: usize = 7500;

pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_MESSAGE: &str = "message";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub user_id: String,
    pub event: String,
    pub data: Value,
}

impl RealtimeEvent {
    pub fn new(user_id: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            user_id: user_id.into(),
            event: event.into(),
            data,
        }
    }
}

/// Serializes an event, replacing oversized data with `{id, truncated: true}` so
/// subscribers can refetch it.
pub fn encode_event(event: &RealtimeEvent) -> Result<String> {
    let payload = serde_json::to_string(event)?;
    if payload.len() <= MAX_PAYLOAD_BYTES {
        return Ok(payload);
    }
    let truncated = RealtimeEvent {
        user_id: event.user_id.clone(),
        event: event.event.clone(),
        data: json!({
            "id": event.data.get("id").cloned().unwrap_or(Value::Null),
            "truncated": true,
        }),
    };
    Ok(serde_json::to_string(&truncated)?)
}

/// Publishes through `pg_notify`; inside a transaction delivery happens on commit.
pub async fn publish<'e, E>(executor: E, event: &RealtimeEvent) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let payload = encode_event(event)?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(REALTIME_CHANNEL)
        .bind(payload)
        .execute(executor)
        .await?;
    Ok(())
}

async fn connect_listener(pool: &Pool<Postgres>) -> Option<PgListener> {
    let mut listener = match PgListener::connect_with(pool).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::warn!(error = %err, channel = REALTIME_CHANNEL, "failed to connect realtime listener");
            return None;
        }
    };
    if let Err(err) = listener.listen(REALTIME_CHANNEL).await {
        tracing::warn!(error = %err, channel = REALTIME_CHANNEL, "failed to subscribe realtime listener");
        return None;
    }
    tracing::info!(channel = REALTIME_CHANNEL, "realtime listener subscribed");
    Some(listener)
}

/// Relays published events to `handler` until the task is aborted, reconnecting on errors.
pub fn spawn_listener<F>(pool: Pool<Postgres>, handler: F) -> JoinHandle<()>
where
    F: Fn(RealtimeEvent) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let Some(mut listener) = connect_listener(&pool).await else {
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            };
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<RealtimeEvent>(notification.payload()) {
                            Ok(event) => handler(event),
                            Err(err) => {
                                tracing::warn!(error = %err, "dropping malformed realtime payload");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "realtime listener disconnected");
                        break;
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payloads_are_kept_intact() {
        let event = RealtimeEvent::new("u1", EVENT_MESSAGE, json!({"id": "m1", "text": "hi"}));
        let encoded = encode_event(&event).unwrap();
        let decoded: RealtimeEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn oversized_payloads_are_truncated_to_id() {
        let event = RealtimeEvent::new(
            "u1",
            EVENT_MESSAGE,
            json!({"id": "m1", "text": "x".repeat(MAX_PAYLOAD_BYTES)}),
        );
        let encoded = encode_event(&event).unwrap();
        assert!(encoded.len() < MAX_PAYLOAD_BYTES);
        let decoded: RealtimeEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.data, json!({"id": "m1", "truncated": true}));
        assert_eq!(decoded.user_id, "u1");
    }
}
