use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::notifications::{self, NewNotification, NotificationType};
use hl_core::pagination::{PageParams, PageQuery, Pagination};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{optional_auth, require_auth};
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

const DEFAULT_LIMIT: i64 = 10;
const SAVED_LIMIT: i64 = 20;
const USER_POSTS_LIMIT: i64 = 30;
const DISCOVERY_MAX: i64 = 20;
const FEED_CACHE_TTL: Duration = Duration::from_secs(5);

const CAPTION_MAX: usize = 2200;
const LOCATION_MAX: usize = 200;
const MEDIA_MAX: usize = 10;
pub(crate) const MEDIA_TYPES: &[&str] = &["photo", "video"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaView {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub thumbnail_url: Option<String>,
    pub order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostView {
    pub id: String,
    pub user_id: String,
    pub caption: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: UserSummary,
    pub media: Vec<MediaView>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub is_liked: bool,
    pub is_saved: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PostPage {
    pub posts: Vec<PostView>,
    pub pagination: Pagination,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaInput {
    url: String,
    #[serde(rename = "type")]
    media_type: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct CreatePostRequest {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    media: Vec<MediaInput>,
}

#[derive(Deserialize)]
pub(crate) struct UpdatePostRequest {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

/// Which non-deleted posts a listing covers.
#[derive(Clone, Copy, Debug)]
pub(crate) enum PostScope<'a> {
    All,
    Feed(&'a str),
    Author(&'a str),
    CaptionContains(&'a str),
}

/// Pushes the post columns, with like/save flags resolved for `viewer`.
fn push_post_columns(builder: &mut QueryBuilder<'_, Postgres>, viewer: Option<&str>) {
    let viewer = viewer.map(str::to_owned);
    builder.push(
        "SELECT p.id, p.user_id, p.caption, p.location, p.created_at, p.updated_at, \
         u.id AS author_id, u.username AS author_username, u.avatar_url AS author_avatar_url, \
         (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS likes_count, \
         (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count, \
         EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ",
    );
    builder.push_bind(viewer.clone());
    builder.push(
        ") AS is_liked, \
         EXISTS (SELECT 1 FROM saved_posts s WHERE s.post_id = p.id AND s.user_id = ",
    );
    builder.push_bind(viewer);
    builder.push(") AS is_saved");
}

fn push_scope(builder: &mut QueryBuilder<'_, Postgres>, scope: PostScope<'_>) {
    builder.push(" FROM posts p JOIN users u ON u.id = p.user_id WHERE p.is_deleted = FALSE");
    match scope {
        PostScope::All => {}
        PostScope::Feed(viewer) => {
            builder
                .push(" AND (p.user_id = ")
                .push_bind(viewer.to_owned())
                .push(" OR p.user_id IN (SELECT following_id FROM follows WHERE follower_id = ")
                .push_bind(viewer.to_owned())
                .push("))");
        }
        PostScope::Author(user_id) => {
            builder.push(" AND p.user_id = ").push_bind(user_id.to_owned());
        }
        PostScope::CaptionContains(term) => {
            builder
                .push(" AND p.caption ILIKE ")
                .push_bind(format!("%{}%", hl_core::db::escape_like(term)));
        }
    }
}

fn post_from_row(row: &PgRow) -> Result<PostView, sqlx::Error> {
    Ok(PostView {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        caption: row.try_get("caption")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        user: UserSummary::from_row(row, "author_")?,
        media: Vec::new(),
        likes_count: row.try_get("likes_count")?,
        comments_count: row.try_get("comments_count")?,
        is_liked: row.try_get("is_liked")?,
        is_saved: row.try_get("is_saved")?,
    })
}

/// Loads media for `posts` in one query, ordered by position.
pub(crate) async fn attach_media(
    pool: &Pool<Postgres>,
    posts: &mut [PostView],
) -> Result<(), sqlx::Error> {
    if posts.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = posts.iter().map(|post| post.id.clone()).collect();
    let rows = sqlx::query(
        "SELECT id, post_id, url, media_type, thumbnail_url, sort_order FROM media \
         WHERE post_id = ANY($1) ORDER BY sort_order ASC, created_at ASC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    let mut by_post: HashMap<String, Vec<MediaView>> = HashMap::new();
    for row in rows {
        let post_id: String = row.try_get("post_id")?;
        by_post.entry(post_id).or_default().push(MediaView {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            media_type: row.try_get("media_type")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            order: row.try_get("sort_order")?,
        });
    }
    for post in posts.iter_mut() {
        post.media = by_post.remove(&post.id).unwrap_or_default();
    }
    Ok(())
}

/// Lists posts newest first, by offset or strictly after the `cursor` post.
pub(crate) async fn load_posts(
    pool: &Pool<Postgres>,
    scope: PostScope<'_>,
    params: &PageParams,
    viewer: Option<&str>,
) -> ApiResult<PostPage> {
    let mut builder = QueryBuilder::<Postgres>::new("");
    push_post_columns(&mut builder, viewer);
    push_scope(&mut builder, scope);
    if let Some(cursor) = &params.cursor {
        builder
            .push(" AND (p.created_at, p.id) < (SELECT created_at, id FROM posts WHERE id = ")
            .push_bind(cursor.clone())
            .push(")");
    }
    builder
        .push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ")
        .push_bind(params.limit);
    if !params.is_cursor() {
        builder.push(" OFFSET ").push_bind(params.offset());
    }
    let rows = builder.build().fetch_all(pool).await?;
    let mut posts = rows
        .iter()
        .map(post_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    attach_media(pool, &mut posts).await?;

    let total = if params.is_cursor() {
        None
    } else {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_scope(&mut count, scope);
        Some(count.build_query_scalar::<i64>().fetch_one(pool).await?)
    };
    let last_id = posts.last().map(|post| post.id.clone());
    Ok(PostPage {
        pagination: Pagination::build(params, total, posts.len(), last_id.as_deref()),
        posts,
    })
}

pub(crate) async fn fetch_post(
    pool: &Pool<Postgres>,
    post_id: &str,
    viewer: Option<&str>,
) -> ApiResult<Option<PostView>> {
    let mut builder = QueryBuilder::<Postgres>::new("");
    push_post_columns(&mut builder, viewer);
    push_scope(&mut builder, PostScope::All);
    builder.push(" AND p.id = ").push_bind(post_id.to_owned());
    let row = builder.build().fetch_optional(pool).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut posts = vec![post_from_row(&row)?];
    attach_media(pool, &mut posts).await?;
    Ok(posts.pop())
}

/// Owner of a live post; `None` when missing or soft-deleted.
pub(crate) async fn live_post_owner(
    pool: &Pool<Postgres>,
    post_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM posts WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(post_id)
    .fetch_optional(pool)
    .await
}

pub(crate) fn feed_cache_key(viewer_id: &str, params: &PageParams) -> String {
    format!("feed:{viewer_id}:{}:{}", params.cache_token(), params.limit)
}

pub(crate) async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<PostView>)> {
    let auth = require_auth(&state, &headers)?;
    validation::max_length("caption", payload.caption.as_deref(), CAPTION_MAX)?;
    validation::max_length("location", payload.location.as_deref(), LOCATION_MAX)?;
    if payload.media.is_empty() || payload.media.len() > MEDIA_MAX {
        return Err(ApiError::validation(format!(
            "media must contain between 1 and {MEDIA_MAX} items"
        )));
    }
    for media in &payload.media {
        validation::require_non_blank("media.url", &media.url)?;
        validation::one_of("media.type", &media.media_type, MEDIA_TYPES)?;
    }

    let post_id = Uuid::new_v4().to_string();
    let mut tx = state.pool.begin().await?;
    sqlx::query("INSERT INTO posts (id, user_id, caption, location) VALUES ($1, $2, $3, $4)")
        .bind(&post_id)
        .bind(&auth.user_id)
        .bind(&payload.caption)
        .bind(&payload.location)
        .execute(&mut *tx)
        .await?;
    for (index, media) in payload.media.iter().enumerate() {
        sqlx::query(
            "INSERT INTO media (id, post_id, url, media_type, thumbnail_url, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&post_id)
        .bind(media.url.trim())
        .bind(&media.media_type)
        .bind(&media.thumbnail_url)
        .bind(index as i32)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    tracing::info!(user_id = %auth.user_id, %post_id, "post created");

    let post = fetch_post(&state.pool, &post_id, Some(&auth.user_id))
        .await?
        .ok_or_else(|| ApiError::internal("created post not found"))?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub(crate) async fn list_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PostPage>> {
    let viewer = optional_auth(&state, &headers);
    let params = query.resolve(DEFAULT_LIMIT);
    let page = load_posts(
        &state.pool,
        PostScope::All,
        &params,
        viewer.as_ref().map(|viewer| viewer.user_id.as_str()),
    )
    .await?;
    Ok(Json(page))
}

pub(crate) async fn feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PostPage>> {
    let auth = require_auth(&state, &headers)?;
    let params = query.resolve(DEFAULT_LIMIT);
    let cache_key = feed_cache_key(&auth.user_id, &params);
    if let Some(cached) = state.cache.get::<PostPage>(&cache_key).await {
        return Ok(Json(cached));
    }

    let viewer = Some(auth.user_id.as_str());
    let mut page = load_posts(&state.pool, PostScope::Feed(&auth.user_id), &params, viewer).await?;
    if page.posts.is_empty() && params.page == 1 && !params.is_cursor() {
        let discovery_params = PageParams {
            page: 1,
            limit: params.limit.min(DISCOVERY_MAX),
            cursor: None,
        };
        let discovery = load_posts(&state.pool, PostScope::All, &discovery_params, viewer).await?;
        if !discovery.posts.is_empty() {
            let last_id = discovery.posts.last().map(|post| post.id.clone());
            let mut pagination = Pagination::build(
                &params,
                Some(discovery.posts.len() as i64),
                discovery.posts.len(),
                last_id.as_deref(),
            );
            pagination.total_pages = Some(1);
            page = PostPage {
                posts: discovery.posts,
                pagination,
            };
        }
    }

    state.cache.set(&cache_key, &page, FEED_CACHE_TTL).await;
    Ok(Json(page))
}

pub(crate) async fn saved(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PostPage>> {
    let auth = require_auth(&state, &headers)?;
    let params = query.resolve(SAVED_LIMIT);

    let mut builder = QueryBuilder::<Postgres>::new("");
    push_post_columns(&mut builder, Some(&auth.user_id));
    builder
        .push(
            ", sp.id AS saved_id FROM saved_posts sp \
             JOIN posts p ON p.id = sp.post_id \
             JOIN users u ON u.id = p.user_id \
             WHERE p.is_deleted = FALSE AND sp.user_id = ",
        )
        .push_bind(auth.user_id.clone());
    if let Some(cursor) = &params.cursor {
        builder
            .push(
                " AND (sp.created_at, sp.id) < \
                 (SELECT created_at, id FROM saved_posts WHERE id = ",
            )
            .push_bind(cursor.clone())
            .push(")");
    }
    builder
        .push(" ORDER BY sp.created_at DESC, sp.id DESC LIMIT ")
        .push_bind(params.limit);
    if !params.is_cursor() {
        builder.push(" OFFSET ").push_bind(params.offset());
    }
    let rows = builder.build().fetch_all(&state.pool).await?;
    let last_saved_id = rows
        .last()
        .map(|row| row.try_get::<String, _>("saved_id"))
        .transpose()?;
    let mut posts = rows
        .iter()
        .map(post_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    for post in &mut posts {
        post.is_saved = true;
    }
    attach_media(&state.pool, &mut posts).await?;

    let total = if params.is_cursor() {
        None
    } else {
        Some(
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM saved_posts sp JOIN posts p ON p.id = sp.post_id \
                 WHERE sp.user_id = $1 AND p.is_deleted = FALSE",
            )
            .bind(&auth.user_id)
            .fetch_one(&state.pool)
            .await?,
        )
    };
    Ok(Json(PostPage {
        pagination: Pagination::build(&params, total, posts.len(), last_saved_id.as_deref()),
        posts,
    }))
}

pub(crate) async fn user_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PostPage>> {
    let viewer = optional_auth(&state, &headers);
    let params = query.resolve(USER_POSTS_LIMIT);
    let page = load_posts(
        &state.pool,
        PostScope::Author(&user_id),
        &params,
        viewer.as_ref().map(|viewer| viewer.user_id.as_str()),
    )
    .await?;
    Ok(Json(page))
}

pub(crate) async fn get_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult<Json<PostView>> {
    let viewer = optional_auth(&state, &headers);
    let post = fetch_post(
        &state.pool,
        &post_id,
        viewer.as_ref().map(|viewer| viewer.user_id.as_str()),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Post not found"))?;
    Ok(Json(post))
}

pub(crate) async fn update_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    JsonBody(payload): JsonBody<UpdatePostRequest>,
) -> ApiResult<Json<PostView>> {
    let auth = require_auth(&state, &headers)?;
    validation::max_length("caption", payload.caption.as_deref(), CAPTION_MAX)?;
    validation::max_length("location", payload.location.as_deref(), LOCATION_MAX)?;
    let owner = live_post_owner(&state.pool, &post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    if owner != auth.user_id {
        return Err(ApiError::forbidden("You can only edit your own posts"));
    }

    sqlx::query(
        "UPDATE posts SET caption = COALESCE($1, caption), location = COALESCE($2, location), \
         updated_at = NOW() WHERE id = $3",
    )
    .bind(&payload.caption)
    .bind(&payload.location)
    .bind(&post_id)
    .execute(&state.pool)
    .await?;

    let post = fetch_post(&state.pool, &post_id, Some(&auth.user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    Ok(Json(post))
}

pub(crate) async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&state, &headers)?;
    let owner = live_post_owner(&state.pool, &post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    if owner != auth.user_id {
        return Err(ApiError::forbidden("You can only delete your own posts"));
    }
    sqlx::query("UPDATE posts SET is_deleted = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(&post_id)
        .execute(&state.pool)
        .await?;
    tracing::info!(user_id = %auth.user_id, %post_id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn toggle_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let owner = live_post_owner(&state.pool, &post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    let mut tx = state.pool.begin().await?;
    let removed = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
        .bind(&auth.user_id)
        .bind(&post_id)
        .execute(&mut *tx)
        .await?;
    if removed.rows_affected() > 0 {
        tx.commit().await?;
        return Ok(Json(json!({ "liked": false })));
    }

    let inserted = sqlx::query(
        "INSERT INTO likes (id, user_id, post_id) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, post_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(&post_id)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() > 0 {
        notifications::insert(
            &mut tx,
            &NewNotification::new(&owner, NotificationType::Like, &auth.user_id)
                .with_post(&post_id),
        )
        .await?;
    }
    tx.commit().await?;
    Ok(Json(json!({ "liked": true })))
}

pub(crate) async fn save_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    live_post_owner(&state.pool, &post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    sqlx::query(
        "INSERT INTO saved_posts (id, user_id, post_id) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, post_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(&post_id)
    .execute(&state.pool)
    .await?;
    Ok(Json(json!({ "saved": true })))
}

pub(crate) async fn unsave_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    sqlx::query("DELETE FROM saved_posts WHERE user_id = $1 AND post_id = $2")
        .bind(&auth.user_id)
        .bind(&post_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "saved": false })))
}
