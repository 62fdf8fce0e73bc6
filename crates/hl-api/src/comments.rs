use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::notifications::{self, NewNotification, NotificationType};
use hl_core::pagination::{PageQuery, Pagination};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::require_auth;
use crate::posts::live_post_owner;
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

const DEFAULT_LIMIT: i64 = 20;
const TEXT_MIN: usize = 1;
const TEXT_MAX: usize = 1000;

const COMMENT_COLUMNS: &str = "SELECT c.id, c.post_id, c.user_id, c.parent_id, c.text, \
     c.created_at, c.updated_at, u.id AS author_id, u.username AS author_username, \
     u.avatar_url AS author_avatar_url \
     FROM comments c JOIN users u ON u.id = c.user_id";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentView {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub parent_id: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<CommentView>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateCommentRequest {
    text: String,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct UpdateCommentRequest {
    text: String,
}

fn comment_from_row(row: &PgRow) -> Result<CommentView, sqlx::Error> {
    Ok(CommentView {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        user_id: row.try_get("user_id")?,
        parent_id: row.try_get("parent_id")?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        user: UserSummary::from_row(row, "author_")?,
        replies: None,
    })
}

fn validated_text(text: &str) -> ApiResult<String> {
    let text = text.trim();
    validation::require_length("text", text, TEXT_MIN, TEXT_MAX)?;
    Ok(text.to_string())
}

async fn fetch_comment<'e, E>(executor: E, comment_id: &str) -> ApiResult<Option<CommentView>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(&format!("{COMMENT_COLUMNS} WHERE c.id = $1"))
        .bind(comment_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(comment_from_row).transpose()?)
}

pub(crate) async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CommentPage>> {
    live_post_owner(&state.pool, &post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    let params = query.resolve(DEFAULT_LIMIT);

    let mut builder = QueryBuilder::<Postgres>::new(COMMENT_COLUMNS);
    builder
        .push(" WHERE c.post_id = ")
        .push_bind(post_id.clone())
        .push(" AND c.parent_id IS NULL");
    if let Some(cursor) = &params.cursor {
        builder
            .push(" AND (c.created_at, c.id) < (SELECT created_at, id FROM comments WHERE id = ")
            .push_bind(cursor.clone())
            .push(")");
    }
    builder
        .push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ")
        .push_bind(params.limit);
    if !params.is_cursor() {
        builder.push(" OFFSET ").push_bind(params.offset());
    }
    let rows = builder.build().fetch_all(&state.pool).await?;
    let mut comments = rows
        .iter()
        .map(comment_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let parent_ids: Vec<String> = comments.iter().map(|comment| comment.id.clone()).collect();
    let mut replies: HashMap<String, Vec<CommentView>> = HashMap::new();
    if !parent_ids.is_empty() {
        let rows = sqlx::query(&format!(
            "{COMMENT_COLUMNS} WHERE c.parent_id = ANY($1) ORDER BY c.created_at ASC, c.id ASC"
        ))
        .bind(parent_ids)
        .fetch_all(&state.pool)
        .await?;
        for row in &rows {
            let reply = comment_from_row(row)?;
            if let Some(parent_id) = reply.parent_id.clone() {
                replies.entry(parent_id).or_default().push(reply);
            }
        }
    }
    for comment in &mut comments {
        comment.replies = Some(replies.remove(&comment.id).unwrap_or_default());
    }

    let total = if params.is_cursor() {
        None
    } else {
        Some(
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM comments WHERE post_id = $1 AND parent_id IS NULL",
            )
            .bind(&post_id)
            .fetch_one(&state.pool)
            .await?,
        )
    };
    let last_id = comments.last().map(|comment| comment.id.clone());
    Ok(Json(CommentPage {
        pagination: Pagination::build(&params, total, comments.len(), last_id.as_deref()),
        comments,
    }))
}

pub(crate) async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    JsonBody(payload): JsonBody<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<CommentView>)> {
    let auth = require_auth(&state, &headers)?;
    let text = validated_text(&payload.text)?;
    let parent_id = validation::non_blank(payload.parent_id);

    let mut tx = state.pool.begin().await?;
    let post_owner: Option<String> = sqlx::query_scalar(
        "SELECT user_id FROM posts WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(&post_id)
    .fetch_optional(&mut *tx)
    .await?;
    let post_owner = post_owner.ok_or_else(|| ApiError::not_found("Post not found"))?;

    let parent_author = match &parent_id {
        Some(parent_id) => {
            let author: Option<String> = sqlx::query_scalar(
                "SELECT user_id FROM comments WHERE id = $1 AND post_id = $2",
            )
            .bind(parent_id)
            .bind(&post_id)
            .fetch_optional(&mut *tx)
            .await?;
            Some(author.ok_or_else(|| {
                ApiError::bad_request("Parent comment not found or does not belong to this post")
            })?)
        }
        None => None,
    };

    let comment_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO comments (id, post_id, user_id, parent_id, text) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&comment_id)
    .bind(&post_id)
    .bind(&auth.user_id)
    .bind(&parent_id)
    .bind(&text)
    .execute(&mut *tx)
    .await?;

    notifications::insert(
        &mut tx,
        &NewNotification::new(&post_owner, NotificationType::Comment, &auth.user_id)
            .with_post(&post_id)
            .with_comment(&comment_id),
    )
    .await?;
    if let Some(parent_author) = parent_author {
        notifications::insert(
            &mut tx,
            &NewNotification::new(parent_author, NotificationType::CommentReply, &auth.user_id)
                .with_post(&post_id)
                .with_comment(&comment_id),
        )
        .await?;
    }

    let comment = fetch_comment(&mut *tx, &comment_id)
        .await?
        .ok_or_else(|| ApiError::internal("created comment not found"))?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn comment_author(state: &AppState, comment_id: &str) -> ApiResult<String> {
    let author: Option<String> =
        sqlx::query_scalar("SELECT user_id FROM comments WHERE id = $1")
            .bind(comment_id)
            .fetch_optional(&state.pool)
            .await?;
    author.ok_or_else(|| ApiError::not_found("Comment not found"))
}

pub(crate) async fn update_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
    JsonBody(payload): JsonBody<UpdateCommentRequest>,
) -> ApiResult<Json<CommentView>> {
    let auth = require_auth(&state, &headers)?;
    let text = validated_text(&payload.text)?;
    if comment_author(&state, &comment_id).await? != auth.user_id {
        return Err(ApiError::forbidden("You can only edit your own comment"));
    }
    sqlx::query("UPDATE comments SET text = $1, updated_at = NOW() WHERE id = $2")
        .bind(&text)
        .bind(&comment_id)
        .execute(&state.pool)
        .await?;
    let comment = fetch_comment(&state.pool, &comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    Ok(Json(comment))
}

pub(crate) async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&state, &headers)?;
    if comment_author(&state, &comment_id).await? != auth.user_id {
        return Err(ApiError::forbidden("You can only delete your own comment"));
    }
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(&comment_id)
        .execute(&state.pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(validated_text("  nice shot  ").unwrap(), "nice shot");
        assert!(validated_text("   ").is_err());
        assert!(validated_text(&"a".repeat(1001)).is_err());
        assert!(validated_text(&"a".repeat(1000)).is_ok());
    }

    #[test]
    fn top_level_view_includes_replies_key() {
        let now = Utc::now();
        let reply = CommentView {
            id: "c2".into(),
            post_id: "p1".into(),
            user_id: "u2".into(),
            parent_id: Some("c1".into()),
            text: "thanks".into(),
            created_at: now,
            updated_at: now,
            user: UserSummary {
                id: "u2".into(),
                username: "bob".into(),
                avatar_url: None,
            },
            replies: None,
        };
        let mut parent = reply.clone();
        parent.id = "c1".into();
        parent.parent_id = None;
        parent.replies = Some(vec![reply]);

        let value = serde_json::to_value(&parent).unwrap();
        assert_eq!(value["replies"][0]["parentId"], "c1");
        assert!(value["replies"][0].get("replies").is_none());
        assert_eq!(value["user"]["username"], "bob");
    }
}
