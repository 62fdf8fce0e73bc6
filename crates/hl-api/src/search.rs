use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use hl_core::db::escape_like;
use hl_core::pagination::{Page, PageParams, PageQuery, Pagination};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::time::Duration;

use crate::auth::optional_auth;
use crate::posts::{load_posts, PostPage, PostScope};
use crate::{ApiResult, AppState};

const DEFAULT_LIMIT: i64 = 20;
const MAX_QUERY_CHARS: usize = 100;
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

impl SearchQuery {
    fn term(&self) -> String {
        sanitize_term(self.q.as_deref())
    }

    /// Search pages are offset-only.
    fn params(&self) -> PageParams {
        PageQuery {
            page: self.page.clone(),
            limit: self.limit.clone(),
            cursor: None,
        }
        .resolve(DEFAULT_LIMIT)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserSearchItem {
    id: String,
    username: String,
    avatar_url: Option<String>,
    followers_count: i64,
    is_following: bool,
}

pub(crate) fn sanitize_term(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect()
}

pub(crate) async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Page<UserSearchItem>>> {
    let term = query.term();
    let params = query.params();
    if term.is_empty() {
        return Ok(Json(Page {
            items: Vec::new(),
            pagination: Pagination::offset(&params, 0),
        }));
    }
    let viewer = optional_auth(&state, &headers).map(|auth| auth.user_id);
    let cache_key = format!(
        "search:users:{term}:{}:{}:{}",
        params.page,
        params.limit,
        viewer.as_deref().unwrap_or("anon")
    );
    if let Some(cached) = state.cache.get::<Page<UserSearchItem>>(&cache_key).await {
        return Ok(Json(cached));
    }

    let pattern = format!("%{}%", escape_like(&term));
    let rows = sqlx::query(
        "SELECT u.id, u.username, u.avatar_url, \
         (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id) AS followers_count, \
         EXISTS (SELECT 1 FROM follows f WHERE f.following_id = u.id AND f.follower_id = $2) \
             AS is_following \
         FROM users u WHERE u.username ILIKE $1 \
         ORDER BY u.username ASC LIMIT $3 OFFSET $4",
    )
    .bind(&pattern)
    .bind(&viewer)
    .bind(params.limit)
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;
    let items = rows
        .iter()
        .map(|row| -> Result<_, sqlx::Error> {
            Ok(UserSearchItem {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                avatar_url: row.try_get("avatar_url")?,
                followers_count: row.try_get("followers_count")?,
                is_following: row.try_get("is_following")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username ILIKE $1")
        .bind(&pattern)
        .fetch_one(&state.pool)
        .await?;

    let page = Page {
        items,
        pagination: Pagination::offset(&params, total),
    };
    state.cache.set(&cache_key, &page, SEARCH_CACHE_TTL).await;
    Ok(Json(page))
}

pub(crate) async fn search_posts(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<PostPage>> {
    let term = query.term();
    let params = query.params();
    if term.is_empty() {
        return Ok(Json(PostPage {
            posts: Vec::new(),
            pagination: Pagination::offset(&params, 0),
        }));
    }
    let cache_key = format!("search:posts:{term}:{}:{}", params.page, params.limit);
    if let Some(cached) = state.cache.get::<PostPage>(&cache_key).await {
        return Ok(Json(cached));
    }

    let mut page = load_posts(&state.pool, PostScope::CaptionContains(&term), &params, None).await?;
    page.pagination.next_cursor = None;
    state.cache.set(&cache_key, &page, SEARCH_CACHE_TTL).await;
    Ok(Json(page))
}
