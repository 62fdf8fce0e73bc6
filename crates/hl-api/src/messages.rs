use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::pagination::{Page, PageQuery, Pagination};
use hl_core::realtime::{self, RealtimeEvent, EVENT_MESSAGE};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::auth::require_auth;
use crate::users::{is_blocked_between, user_exists};
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

const DEFAULT_LIMIT: i64 = 50;
const TEXT_MAX: usize = 4000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageView {
    id: String,
    sender_id: String,
    recipient_id: String,
    text: String,
    attachment_url: Option<String>,
    attachment_type: Option<String>,
    created_at: DateTime<Utc>,
    sender: UserSummary,
    is_from_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConversationView {
    other_user: UserSummary,
    last_message: String,
    last_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageRequest {
    recipient_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attachment_url: Option<String>,
    #[serde(default)]
    attachment_type: Option<String>,
}

const MESSAGE_COLUMNS: &str = "SELECT m.id, m.sender_id, m.recipient_id, m.text, \
     m.attachment_url, m.attachment_type, m.created_at, \
     u.id AS sender_user_id, u.username AS sender_user_username, \
     u.avatar_url AS sender_user_avatar_url \
     FROM messages m JOIN users u ON u.id = m.sender_id";

fn message_from_row(row: &PgRow, viewer_id: &str) -> Result<MessageView, sqlx::Error> {
    let sender_id: String = row.try_get("sender_id")?;
    Ok(MessageView {
        id: row.try_get("id")?,
        is_from_me: sender_id == viewer_id,
        sender_id,
        recipient_id: row.try_get("recipient_id")?,
        text: row.try_get("text")?,
        attachment_url: row.try_get("attachment_url")?,
        attachment_type: row.try_get("attachment_type")?,
        created_at: row.try_get("created_at")?,
        sender: UserSummary::from_row(row, "sender_user_")?,
    })
}

pub(crate) async fn conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<ConversationView>>> {
    let auth = require_auth(&state, &headers)?;
    let params = query.resolve(DEFAULT_LIMIT);
    let rows = sqlx::query(
        "WITH latest AS ( \
             SELECT DISTINCT ON (other_id) other_id, text, created_at FROM ( \
                 SELECT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END AS other_id, \
                        text, created_at, id \
                 FROM messages WHERE sender_id = $1 OR recipient_id = $1) pairs \
             ORDER BY other_id, created_at DESC, id DESC) \
         SELECT l.text, l.created_at, u.id AS other_id, u.username AS other_username, \
                u.avatar_url AS other_avatar_url \
         FROM latest l JOIN users u ON u.id = l.other_id \
         ORDER BY l.created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(&auth.user_id)
    .bind(params.limit)
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;
    let items = rows
        .iter()
        .map(|row| -> Result<_, sqlx::Error> {
            Ok(ConversationView {
                other_user: UserSummary::from_row(row, "other_")?,
                last_message: row.try_get("text")?,
                last_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END) \
         FROM messages WHERE sender_id = $1 OR recipient_id = $1",
    )
    .bind(&auth.user_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(Page {
        items,
        pagination: Pagination::offset(&params, total),
    }))
}

pub(crate) async fn thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(other_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<MessageView>>> {
    let auth = require_auth(&state, &headers)?;
    let params = query.resolve(DEFAULT_LIMIT);
    let rows = sqlx::query(&format!(
        "{MESSAGE_COLUMNS} \
         WHERE (m.sender_id = $1 AND m.recipient_id = $2) \
            OR (m.sender_id = $2 AND m.recipient_id = $1) \
         ORDER BY m.created_at ASC, m.id ASC LIMIT $3 OFFSET $4"
    ))
    .bind(&auth.user_id)
    .bind(&other_id)
    .bind(params.limit)
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;
    let items = rows
        .iter()
        .map(|row| message_from_row(row, &auth.user_id))
        .collect::<Result<Vec<_>, _>>()?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages \
         WHERE (sender_id = $1 AND recipient_id = $2) OR (sender_id = $2 AND recipient_id = $1)",
    )
    .bind(&auth.user_id)
    .bind(&other_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(Page {
        items,
        pagination: Pagination::offset(&params, total),
    }))
}

/// Trimmed text and attachment; at least one must be present.
fn message_content(payload: &SendMessageRequest) -> ApiResult<(String, Option<String>)> {
    let text = payload.text.as_deref().map(str::trim).unwrap_or_default();
    validation::max_length("text", Some(text), TEXT_MAX)?;
    let attachment = validation::non_blank(payload.attachment_url.clone());
    if text.is_empty() && attachment.is_none() {
        return Err(ApiError::bad_request(
            "Message must contain text or an attachment",
        ));
    }
    Ok((text.to_string(), attachment))
}

pub(crate) async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    let auth = require_auth(&state, &headers)?;
    validation::require_non_blank("recipientId", &payload.recipient_id)?;
    let (text, attachment_url) = message_content(&payload)?;
    let recipient_id = payload.recipient_id.trim();
    if recipient_id == auth.user_id {
        return Err(ApiError::bad_request("Cannot send message to yourself"));
    }
    if !user_exists(&state.pool, recipient_id).await? {
        return Err(ApiError::bad_request("User not found"));
    }
    if is_blocked_between(&state.pool, &auth.user_id, recipient_id).await? {
        return Err(ApiError::forbidden("You cannot message this user"));
    }

    let message_id = Uuid::new_v4().to_string();
    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO messages (id, sender_id, recipient_id, text, attachment_url, attachment_type) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&message_id)
    .bind(&auth.user_id)
    .bind(recipient_id)
    .bind(&text)
    .bind(&attachment_url)
    .bind(validation::non_blank(payload.attachment_type.clone()))
    .execute(&mut *tx)
    .await?;
    let row = sqlx::query(&format!("{MESSAGE_COLUMNS} WHERE m.id = $1"))
        .bind(&message_id)
        .fetch_one(&mut *tx)
        .await?;
    let message = message_from_row(&row, &auth.user_id)?;

    let mut pushed = serde_json::to_value(&message).map_err(anyhow::Error::from)?;
    pushed["isFromMe"] = serde_json::Value::Bool(false);
    realtime::publish(
        &mut *tx,
        &RealtimeEvent::new(recipient_id, EVENT_MESSAGE, pushed),
    )
    .await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub(crate) async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&state, &headers)?;
    let sender: Option<String> = sqlx::query_scalar("SELECT sender_id FROM messages WHERE id = $1")
        .bind(&message_id)
        .fetch_optional(&state.pool)
        .await?;
    let sender = sender.ok_or_else(|| ApiError::not_found("Message not found"))?;
    if sender != auth.user_id {
        return Err(ApiError::forbidden("You can only delete your own messages"));
    }
    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(&message_id)
        .execute(&state.pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: Option<&str>, attachment: Option<&str>) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id: "u2".into(),
            text: text.map(str::to_string),
            attachment_url: attachment.map(str::to_string),
            attachment_type: None,
        }
    }

    #[test]
    fn content_requires_text_or_attachment() {
        assert!(message_content(&request(None, None)).is_err());
        assert!(message_content(&request(Some("   "), Some(" "))).is_err());
        let (text, attachment) = message_content(&request(Some(" hi "), None)).unwrap();
        assert_eq!((text.as_str(), attachment), ("hi", None));
        let (text, attachment) =
            message_content(&request(None, Some("https://cdn.example.com/a.jpg"))).unwrap();
        assert_eq!(text, "");
        assert_eq!(attachment.as_deref(), Some("https://cdn.example.com/a.jpg"));
    }

    #[test]
    fn long_text_is_rejected() {
        let long = "x".repeat(TEXT_MAX + 1);
        let err = message_content(&request(Some(&long), None)).unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
    }
}
