use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::auth::require_auth;
use crate::posts::MEDIA_TYPES;
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

pub(crate) const STORY_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoryView {
    id: String,
    media_url: String,
    #[serde(rename = "type")]
    media_type: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StoryGroup {
    user: UserSummary,
    stories: Vec<StoryView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateStoryRequest {
    media_url: String,
    #[serde(rename = "type")]
    media_type: String,
}

fn story_from_row(row: &PgRow) -> Result<StoryView, sqlx::Error> {
    Ok(StoryView {
        id: row.try_get("id")?,
        media_url: row.try_get("media_url")?,
        media_type: row.try_get("media_type")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        user: None,
    })
}

/// Groups stories by author, keeping the order in which authors first appear.
fn group_by_user(stories: Vec<(UserSummary, StoryView)>) -> Vec<StoryGroup> {
    let mut groups: Vec<StoryGroup> = Vec::new();
    for (user, story) in stories {
        match groups.iter_mut().find(|group| group.user.id == user.id) {
            Some(group) => group.stories.push(story),
            None => groups.push(StoryGroup {
                user,
                stories: vec![story],
            }),
        }
    }
    groups
}

pub(crate) async fn create_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreateStoryRequest>,
) -> ApiResult<(StatusCode, Json<StoryView>)> {
    let auth = require_auth(&state, &headers)?;
    let media_url = payload.media_url.trim();
    validation::validate_url("mediaUrl", media_url)?;
    validation::one_of("type", &payload.media_type, MEDIA_TYPES)?;

    let expires_at = Utc::now() + Duration::hours(STORY_TTL_HOURS);
    let row = sqlx::query(
        "WITH inserted AS ( \
             INSERT INTO stories (id, user_id, media_url, media_type, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, user_id, media_url, media_type, expires_at, created_at) \
         SELECT i.*, u.username AS author_username, u.avatar_url AS author_avatar_url, \
                u.id AS author_id \
         FROM inserted i JOIN users u ON u.id = i.user_id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(media_url)
    .bind(&payload.media_type)
    .bind(expires_at)
    .fetch_one(&state.pool)
    .await?;
    let mut story = story_from_row(&row)?;
    story.user = Some(UserSummary::from_row(&row, "author_")?);
    Ok((StatusCode::CREATED, Json(story)))
}

pub(crate) async fn feed_stories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<StoryGroup>>> {
    let auth = require_auth(&state, &headers)?;
    let rows = sqlx::query(
        "SELECT s.id, s.media_url, s.media_type, s.expires_at, s.created_at, \
         u.id AS author_id, u.username AS author_username, u.avatar_url AS author_avatar_url \
         FROM stories s JOIN users u ON u.id = s.user_id \
         WHERE s.expires_at > NOW() \
           AND s.user_id IN (SELECT following_id FROM follows WHERE follower_id = $1) \
         ORDER BY s.created_at DESC, s.id DESC",
    )
    .bind(&auth.user_id)
    .fetch_all(&state.pool)
    .await?;
    let stories = rows
        .iter()
        .map(|row| -> Result<_, sqlx::Error> {
            Ok((UserSummary::from_row(row, "author_")?, story_from_row(row)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(group_by_user(stories)))
}

pub(crate) async fn my_stories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<StoryView>>> {
    let auth = require_auth(&state, &headers)?;
    let rows = sqlx::query(
        "SELECT id, media_url, media_type, expires_at, created_at FROM stories \
         WHERE user_id = $1 AND expires_at > NOW() ORDER BY created_at ASC, id ASC",
    )
    .bind(&auth.user_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(
        rows.iter()
            .map(story_from_row)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

pub(crate) async fn delete_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(story_id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&state, &headers)?;
    let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM stories WHERE id = $1")
        .bind(&story_id)
        .fetch_optional(&state.pool)
        .await?;
    let owner = owner.ok_or_else(|| ApiError::not_found("Story not found"))?;
    if owner != auth.user_id {
        return Err(ApiError::forbidden("You can only delete your own story"));
    }
    sqlx::query("DELETE FROM stories WHERE id = $1")
        .bind(&story_id)
        .execute(&state.pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
