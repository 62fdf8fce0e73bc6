use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::notifications::{self, NewNotification, NotificationType};
use hl_core::pagination::{Page, PageQuery, Pagination};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use std::time::Duration;

use crate::auth::{optional_auth, require_auth};
use crate::validation;
use crate::{is_unique_violation, ApiError, ApiResult, AppState, JsonBody};

const PROFILE_CACHE_TTL: Duration = Duration::from_secs(20);
const FOLLOW_LIST_LIMIT: i64 = 20;
const SUGGESTIONS_DEFAULT: i64 = 10;
const SUGGESTIONS_MAX: i64 = 50;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MeView {
    id: String,
    email: String,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    bio: Option<String>,
    website: Option<String>,
    is_private: bool,
    notify_likes: bool,
    notify_comments: bool,
    notify_follows: bool,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileView {
    id: String,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    bio: Option<String>,
    website: Option<String>,
    is_private: bool,
    created_at: DateTime<Utc>,
    posts_count: i64,
    followers_count: i64,
    following_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_following: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_viewer: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SuggestionView {
    id: String,
    username: String,
    avatar_url: Option<String>,
    followers_count: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateProfileRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    is_private: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationSettingsRequest {
    #[serde(default)]
    notify_likes: Option<bool>,
    #[serde(default)]
    notify_comments: Option<bool>,
    #[serde(default)]
    notify_follows: Option<bool>,
}

#[derive(Deserialize)]
pub(crate) struct SuggestionsQuery {
    #[serde(default)]
    limit: Option<String>,
}

pub(crate) fn profile_cache_key(user_id: &str, viewer_id: Option<&str>) -> String {
    format!("user:profile:{user_id}:viewer:{}", viewer_id.unwrap_or("anon"))
}

async fn invalidate_profile(state: &AppState, user_id: &str, viewer_id: &str) {
    state.cache.del(&profile_cache_key(user_id, None)).await;
    state
        .cache
        .del(&profile_cache_key(user_id, Some(viewer_id)))
        .await;
}

/// True when either user blocked the other.
pub(crate) async fn is_blocked_between(
    pool: &Pool<Postgres>,
    first: &str,
    second: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM blocks \
         WHERE (blocker_id = $1 AND blocked_id = $2) OR (blocker_id = $2 AND blocked_id = $1))",
    )
    .bind(first)
    .bind(second)
    .fetch_one(pool)
    .await
}

pub(crate) async fn user_exists(pool: &Pool<Postgres>, user_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

fn me_from_row(row: &PgRow) -> Result<MeView, sqlx::Error> {
    Ok(MeView {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        bio: row.try_get("bio")?,
        website: row.try_get("website")?,
        is_private: row.try_get("is_private")?,
        notify_likes: row.try_get("notify_likes")?,
        notify_comments: row.try_get("notify_comments")?,
        notify_follows: row.try_get("notify_follows")?,
        created_at: row.try_get("created_at")?,
    })
}

const ME_COLUMNS: &str = "id, email, username, display_name, avatar_url, bio, website, is_private, \
     notify_likes, notify_comments, notify_follows, created_at";

pub(crate) async fn get_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MeView>> {
    let auth = require_auth(&state, &headers)?;
    let row = sqlx::query(&format!("SELECT {ME_COLUMNS} FROM users WHERE id = $1"))
        .bind(&auth.user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(me_from_row(&row)?))
}

pub(crate) async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> ApiResult<Json<MeView>> {
    let auth = require_auth(&state, &headers)?;
    validation::max_length("displayName", payload.display_name.as_deref(), 50)?;
    validation::max_length("bio", payload.bio.as_deref(), 150)?;
    validation::max_length("website", payload.website.as_deref(), 100)?;
    let username = payload.username.as_deref().map(str::trim);
    if let Some(username) = username {
        validation::validate_username(username)?;
    }
    if let Some(avatar_url) = payload.avatar_url.as_deref() {
        validation::validate_url("avatarUrl", avatar_url)?;
    }

    let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = NOW()");
    if let Some(display_name) = payload.display_name.as_deref() {
        builder.push(", display_name = ").push_bind(display_name.trim());
    }
    if let Some(username) = username {
        builder.push(", username = ").push_bind(username);
    }
    if let Some(avatar_url) = payload.avatar_url.as_deref() {
        builder.push(", avatar_url = ").push_bind(avatar_url);
    }
    if let Some(bio) = payload.bio.as_deref() {
        builder.push(", bio = ").push_bind(bio);
    }
    if let Some(website) = payload.website.as_deref() {
        builder.push(", website = ").push_bind(website.trim());
    }
    if let Some(is_private) = payload.is_private {
        builder.push(", is_private = ").push_bind(is_private);
    }
    builder
        .push(" WHERE id = ")
        .push_bind(&auth.user_id)
        .push(" RETURNING ")
        .push(ME_COLUMNS);

    let row = match builder.build().fetch_optional(&state.pool).await {
        Ok(row) => row.ok_or_else(|| ApiError::not_found("User not found"))?,
        Err(err) if is_unique_violation(&err) => {
            return Err(ApiError::conflict("Username is already taken"));
        }
        Err(err) => return Err(err.into()),
    };
    invalidate_profile(&state, &auth.user_id, &auth.user_id).await;
    Ok(Json(me_from_row(&row)?))
}

pub(crate) async fn update_notification_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<NotificationSettingsRequest>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let row = sqlx::query(
        "UPDATE users SET \
           notify_likes = COALESCE($1, notify_likes), \
           notify_comments = COALESCE($2, notify_comments), \
           notify_follows = COALESCE($3, notify_follows), \
           updated_at = NOW() \
         WHERE id = $4 \
         RETURNING notify_likes, notify_comments, notify_follows",
    )
    .bind(payload.notify_likes)
    .bind(payload.notify_comments)
    .bind(payload.notify_follows)
    .bind(&auth.user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({
        "notifyLikes": row.try_get::<bool, _>("notify_likes")?,
        "notifyComments": row.try_get::<bool, _>("notify_comments")?,
        "notifyFollows": row.try_get::<bool, _>("notify_follows")?,
    })))
}

pub(crate) async fn list_blocked(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let auth = require_auth(&state, &headers)?;
    let rows = sqlx::query(
        "SELECT u.id, u.username, u.avatar_url FROM blocks b \
         JOIN users u ON u.id = b.blocked_id \
         WHERE b.blocker_id = $1 \
         ORDER BY b.created_at DESC, b.id DESC",
    )
    .bind(&auth.user_id)
    .fetch_all(&state.pool)
    .await?;
    let users = rows
        .iter()
        .map(|row| UserSummary::from_row(row, ""))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(users))
}

pub(crate) async fn suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let limit = query
        .limit
        .as_deref()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(SUGGESTIONS_DEFAULT)
        .clamp(1, SUGGESTIONS_MAX);

    let mut rows = sqlx::query(
        "WITH mine AS (SELECT following_id FROM follows WHERE follower_id = $1) \
         SELECT u.id, u.username, u.avatar_url, \
                (SELECT COUNT(*) FROM follows f2 WHERE f2.following_id = u.id) AS followers_count, \
                COUNT(*) AS mutual \
         FROM follows f \
         JOIN users u ON u.id = f.following_id \
         WHERE f.follower_id IN (SELECT following_id FROM mine) \
           AND f.following_id <> $1 \
           AND f.following_id NOT IN (SELECT following_id FROM mine) \
           AND NOT EXISTS (SELECT 1 FROM blocks b \
               WHERE (b.blocker_id = $1 AND b.blocked_id = u.id) \
                  OR (b.blocker_id = u.id AND b.blocked_id = $1)) \
         GROUP BY u.id, u.username, u.avatar_url \
         ORDER BY mutual DESC, followers_count DESC, u.id \
         LIMIT $2",
    )
    .bind(&auth.user_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    if rows.is_empty() {
        rows = sqlx::query(
            "SELECT u.id, u.username, u.avatar_url, \
                    (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id) AS followers_count \
             FROM users u \
             WHERE u.id <> $1 \
               AND u.id NOT IN (SELECT following_id FROM follows WHERE follower_id = $1) \
               AND NOT EXISTS (SELECT 1 FROM blocks b \
                   WHERE (b.blocker_id = $1 AND b.blocked_id = u.id) \
                      OR (b.blocker_id = u.id AND b.blocked_id = $1)) \
             ORDER BY followers_count DESC, u.created_at DESC \
             LIMIT $2",
        )
        .bind(&auth.user_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;
    }

    let items = rows
        .iter()
        .map(|row| {
            Ok(SuggestionView {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                avatar_url: row.try_get("avatar_url")?,
                followers_count: row.try_get("followers_count")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    Ok(Json(json!({ "items": items })))
}

pub(crate) async fn follow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    if target_id == auth.user_id {
        return Err(ApiError::bad_request("Cannot follow yourself"));
    }
    if !user_exists(&state.pool, &target_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    if is_blocked_between(&state.pool, &auth.user_id, &target_id).await? {
        return Err(ApiError::forbidden("You cannot follow this user"));
    }

    let mut tx = state.pool.begin().await?;
    let created = sqlx::query(
        "INSERT INTO follows (id, follower_id, following_id) VALUES ($1, $2, $3) \
         ON CONFLICT (follower_id, following_id) DO NOTHING",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(&target_id)
    .execute(&mut *tx)
    .await?;
    if created.rows_affected() > 0 {
        notifications::insert(
            &mut tx,
            &NewNotification::new(&target_id, NotificationType::Follow, &auth.user_id),
        )
        .await?;
    }
    tx.commit().await?;

    invalidate_profile(&state, &target_id, &auth.user_id).await;
    Ok(Json(json!({ "following": true })))
}

pub(crate) async fn unfollow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
        .bind(&auth.user_id)
        .bind(&target_id)
        .execute(&state.pool)
        .await?;
    invalidate_profile(&state, &target_id, &auth.user_id).await;
    Ok(Json(json!({ "following": false })))
}

#[derive(Clone, Copy)]
enum FollowDirection {
    Followers,
    Following,
}

async fn follow_page(
    state: &AppState,
    user_id: &str,
    query: &PageQuery,
    direction: FollowDirection,
) -> ApiResult<Page<UserSummary>> {
    let params = query.resolve(FOLLOW_LIST_LIMIT);
    let (join_column, filter_column) = match direction {
        FollowDirection::Followers => ("follower_id", "following_id"),
        FollowDirection::Following => ("following_id", "follower_id"),
    };
    let rows = sqlx::query(&format!(
        "SELECT u.id, u.username, u.avatar_url FROM follows f \
         JOIN users u ON u.id = f.{join_column} \
         WHERE f.{filter_column} = $1 \
         ORDER BY f.created_at DESC, f.id DESC \
         LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(params.limit)
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;
    let total = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM follows WHERE {filter_column} = $1"
    ))
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;
    let items = rows
        .iter()
        .map(|row| UserSummary::from_row(row, ""))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        pagination: Pagination::offset(&params, total),
    })
}

pub(crate) async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<UserSummary>>> {
    Ok(Json(
        follow_page(&state, &user_id, &query, FollowDirection::Followers).await?,
    ))
}

pub(crate) async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<UserSummary>>> {
    Ok(Json(
        follow_page(&state, &user_id, &query, FollowDirection::Following).await?,
    ))
}

pub(crate) async fn online(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_auth(&state, &headers)?;
    let online = state.gateway.is_online(&user_id).await;
    Ok(Json(json!({ "userId": user_id, "online": online })))
}

pub(crate) async fn block(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    if target_id == auth.user_id {
        return Err(ApiError::bad_request("Cannot block yourself"));
    }
    if !user_exists(&state.pool, &target_id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO blocks (id, blocker_id, blocked_id) VALUES ($1, $2, $3) \
         ON CONFLICT (blocker_id, blocked_id) DO NOTHING",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(&target_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM follows \
         WHERE (follower_id = $1 AND following_id = $2) OR (follower_id = $2 AND following_id = $1)",
    )
    .bind(&auth.user_id)
    .bind(&target_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    invalidate_profile(&state, &target_id, &auth.user_id).await;
    invalidate_profile(&state, &auth.user_id, &target_id).await;
    Ok(Json(json!({ "blocked": true })))
}

pub(crate) async fn unblock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    sqlx::query("DELETE FROM blocks WHERE blocker_id = $1 AND blocked_id = $2")
        .bind(&auth.user_id)
        .bind(&target_id)
        .execute(&state.pool)
        .await?;
    invalidate_profile(&state, &target_id, &auth.user_id).await;
    invalidate_profile(&state, &auth.user_id, &target_id).await;
    Ok(Json(json!({ "blocked": false })))
}

pub(crate) async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ProfileView>> {
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("Invalid user id"));
    }
    let viewer = optional_auth(&state, &headers);
    let viewer_id = viewer.as_ref().map(|viewer| viewer.user_id.as_str());
    let cache_key = profile_cache_key(&user_id, viewer_id);
    if let Some(cached) = state.cache.get::<ProfileView>(&cache_key).await {
        return Ok(Json(cached));
    }

    let row = sqlx::query(
        "SELECT u.id, u.username, u.display_name, u.avatar_url, u.bio, u.website, \
                u.is_private, u.created_at, \
                (SELECT COUNT(*) FROM posts p WHERE p.user_id = u.id AND p.is_deleted = FALSE) AS posts_count, \
                (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id) AS followers_count, \
                (SELECT COUNT(*) FROM follows f WHERE f.follower_id = u.id) AS following_count, \
                EXISTS (SELECT 1 FROM follows f WHERE f.follower_id = $2 AND f.following_id = u.id) \
                    AS is_following \
         FROM users u WHERE u.id = $1",
    )
    .bind(&user_id)
    .bind(viewer_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let profile = ProfileView {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        bio: row.try_get("bio")?,
        website: row.try_get("website")?,
        is_private: row.try_get("is_private")?,
        created_at: row.try_get("created_at")?,
        posts_count: row.try_get("posts_count")?,
        followers_count: row.try_get("followers_count")?,
        following_count: row.try_get("following_count")?,
        is_following: match viewer_id {
            Some(_) => Some(row.try_get("is_following")?),
            None => None,
        },
        is_viewer: viewer_id.map(|viewer_id| viewer_id == user_id),
    };
    state
        .cache
        .set(&cache_key, &profile, PROFILE_CACHE_TTL)
        .await;
    Ok(Json(profile))
}
