use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use hl_core::notifications::NotificationView;
use hl_core::pagination::{PageQuery, Pagination};
use hl_core::views::UserSummary;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::auth::require_auth;
use crate::{ApiError, ApiResult, AppState};

const DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationPage {
    items: Vec<NotificationView>,
    pagination: Pagination,
    unread_count: i64,
}

fn notification_from_row(row: &PgRow) -> Result<NotificationView, sqlx::Error> {
    Ok(NotificationView {
        id: row.try_get("id")?,
        notification_type: row.try_get("notification_type")?,
        actor: UserSummary::from_row(row, "actor_")?,
        post_id: row.try_get("post_id")?,
        comment_id: row.try_get("comment_id")?,
        album_id: row.try_get("album_id")?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<NotificationPage>> {
    let auth = require_auth(&state, &headers)?;
    let params = query.resolve(DEFAULT_LIMIT);

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT n.id, n.notification_type, n.post_id, n.comment_id, n.album_id, n.read, \
         n.created_at, u.id AS actor_id, u.username AS actor_username, \
         u.avatar_url AS actor_avatar_url \
         FROM notifications n JOIN users u ON u.id = n.actor_id WHERE n.user_id = ",
    );
    builder.push_bind(auth.user_id.clone());
    if let Some(cursor) = &params.cursor {
        builder
            .push(" AND (n.created_at, n.id) < (SELECT created_at, id FROM notifications WHERE id = ")
            .push_bind(cursor.clone())
            .push(")");
    }
    builder
        .push(" ORDER BY n.created_at DESC, n.id DESC LIMIT ")
        .push_bind(params.limit);
    if !params.is_cursor() {
        builder.push(" OFFSET ").push_bind(params.offset());
    }
    let rows = builder.build().fetch_all(&state.pool).await?;
    let items = rows
        .iter()
        .map(notification_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let counts = sqlx::query(
        "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE read = FALSE) AS unread \
         FROM notifications WHERE user_id = $1",
    )
    .bind(&auth.user_id)
    .fetch_one(&state.pool)
    .await?;
    let total: i64 = counts.try_get("total")?;
    let unread_count: i64 = counts.try_get("unread")?;

    let last_id = items.last().map(|item| item.id.clone());
    let total = (!params.is_cursor()).then_some(total);
    Ok(Json(NotificationPage {
        pagination: Pagination::build(&params, total, items.len(), last_id.as_deref()),
        items,
        unread_count,
    }))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let owner: Option<String> =
        sqlx::query_scalar("SELECT user_id FROM notifications WHERE id = $1")
            .bind(&notification_id)
            .fetch_optional(&state.pool)
            .await?;
    let owner = owner.ok_or_else(|| ApiError::not_found("Notification not found"))?;
    if owner != auth.user_id {
        return Err(ApiError::forbidden("Not your notification"));
    }
    sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1")
        .bind(&notification_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "read": true })))
}

pub(crate) async fn mark_all_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let updated = sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE")
        .bind(&auth.user_id)
        .execute(&state.pool)
        .await?;
    tracing::debug!(user_id = %auth.user_id, updated = updated.rows_affected(), "notifications marked read");
    Ok(Json(json!({ "read": true })))
}
