use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::media::{self, UploadKind};
use hl_core::notifications::{self, NewNotification, NotificationType};
use hl_core::pagination::{PageQuery, MAX_LIMIT};
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::auth::require_auth;
use crate::upload::{read_multipart, store_file};
use crate::users::user_exists;
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

const NAME_MIN: usize = 1;
const NAME_MAX: usize = 50;
const ITEMS_LIMIT: i64 = 20;
const VISIBILITIES: &[&str] = &["public", "private"];
const ROLES: &[&str] = &["editor", "viewer"];
const ROLE_EDITOR: &str = "editor";
const VISIBILITY_PUBLIC: &str = "public";
const VISIBILITY_PRIVATE: &str = "private";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LatestItem {
    url: String,
    #[serde(rename = "type")]
    media_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlbumView {
    id: String,
    owner_id: String,
    name: String,
    visibility: String,
    cover_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    owner: UserSummary,
    items_count: i64,
    members_count: i64,
    latest_item: Option<LatestItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberView {
    id: String,
    album_id: String,
    user_id: String,
    role: String,
    joined_at: DateTime<Utc>,
    user: UserSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlbumDetail {
    #[serde(flatten)]
    album: AlbumView,
    members: Vec<MemberView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemMedia {
    id: String,
    url: String,
    #[serde(rename = "type")]
    media_type: String,
    thumbnail_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlbumItemView {
    id: String,
    album_id: String,
    caption: Option<String>,
    created_at: DateTime<Utc>,
    media: ItemMedia,
    added_by: UserSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MyAlbums {
    owned: Vec<AlbumView>,
    member_of: Vec<AlbumView>,
}

#[derive(Deserialize)]
pub(crate) struct CreateAlbumRequest {
    name: String,
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateAlbumRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddMemberRequest {
    user_id: String,
    #[serde(default)]
    role: Option<String>,
}

/// What a requester may do with an album.
#[derive(Debug)]
struct AlbumAccess {
    owner_id: String,
    visibility: String,
    cover_url: Option<String>,
    member_role: Option<String>,
}

impl AlbumAccess {
    fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    fn can_view(&self, user_id: &str) -> bool {
        self.visibility == VISIBILITY_PUBLIC || self.is_owner(user_id) || self.member_role.is_some()
    }

    fn can_edit(&self, user_id: &str) -> bool {
        self.is_owner(user_id) || self.member_role.as_deref() == Some(ROLE_EDITOR)
    }

    fn ensure_view(&self, user_id: &str) -> ApiResult<()> {
        if self.can_view(user_id) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Access denied"))
        }
    }
}

async fn load_access(
    pool: &Pool<Postgres>,
    album_id: &str,
    user_id: &str,
) -> ApiResult<AlbumAccess> {
    let row = sqlx::query(
        "SELECT a.owner_id, a.visibility, a.cover_url, \
         (SELECT role FROM album_members m WHERE m.album_id = a.id AND m.user_id = $2) AS member_role \
         FROM albums a WHERE a.id = $1",
    )
    .bind(album_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Album not found"))?;
    Ok(AlbumAccess {
        owner_id: row.try_get("owner_id")?,
        visibility: row.try_get("visibility")?,
        cover_url: row.try_get("cover_url")?,
        member_role: row.try_get("member_role")?,
    })
}

fn album_query() -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(
        "SELECT a.id, a.owner_id, a.name, a.visibility, a.cover_url, a.created_at, a.updated_at, \
         o.username AS owner_username, o.avatar_url AS owner_avatar_url, \
         (SELECT COUNT(*) FROM album_items i WHERE i.album_id = a.id) AS items_count, \
         (SELECT COUNT(*) FROM album_members m WHERE m.album_id = a.id) AS members_count, \
         latest.url AS latest_url, latest.media_type AS latest_type \
         FROM albums a JOIN users o ON o.id = a.owner_id \
         LEFT JOIN LATERAL (SELECT md.url, md.media_type FROM album_items i \
             JOIN media md ON md.id = i.media_id WHERE i.album_id = a.id \
             ORDER BY i.created_at DESC LIMIT 1) latest ON TRUE",
    )
}

fn album_from_row(row: &PgRow) -> Result<AlbumView, sqlx::Error> {
    let latest_url: Option<String> = row.try_get("latest_url")?;
    let latest_type: Option<String> = row.try_get("latest_type")?;
    Ok(AlbumView {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        visibility: row.try_get("visibility")?,
        cover_url: row.try_get("cover_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        owner: UserSummary::from_row(row, "owner_")?,
        items_count: row.try_get("items_count")?,
        members_count: row.try_get("members_count")?,
        latest_item: latest_url.zip(latest_type).map(|(url, media_type)| LatestItem {
            url,
            media_type,
        }),
    })
}

async fn fetch_albums(
    pool: &Pool<Postgres>,
    mut builder: QueryBuilder<'_, Postgres>,
) -> ApiResult<Vec<AlbumView>> {
    builder.push(" ORDER BY a.created_at DESC, a.id DESC");
    let rows = builder.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(album_from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

async fn fetch_album(pool: &Pool<Postgres>, album_id: &str) -> ApiResult<AlbumView> {
    let mut builder = album_query();
    builder.push(" WHERE a.id = ").push_bind(album_id.to_owned());
    let row = builder
        .build()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Album not found"))?;
    Ok(album_from_row(&row)?)
}

const MEMBER_COLUMNS: &str = "SELECT m.id, m.album_id, m.user_id, m.role, m.joined_at, \
     u.id AS member_id, u.username AS member_username, u.avatar_url AS member_avatar_url \
     FROM album_members m JOIN users u ON u.id = m.user_id";

fn member_from_row(row: &PgRow) -> Result<MemberView, sqlx::Error> {
    Ok(MemberView {
        id: row.try_get("id")?,
        album_id: row.try_get("album_id")?,
        user_id: row.try_get("user_id")?,
        role: row.try_get("role")?,
        joined_at: row.try_get("joined_at")?,
        user: UserSummary::from_row(row, "member_")?,
    })
}

async fn fetch_members(pool: &Pool<Postgres>, album_id: &str) -> ApiResult<Vec<MemberView>> {
    let rows = sqlx::query(&format!(
        "{MEMBER_COLUMNS} WHERE m.album_id = $1 ORDER BY m.joined_at ASC, m.id ASC"
    ))
    .bind(album_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(member_from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

const ITEM_COLUMNS: &str = "SELECT i.id, i.album_id, i.caption, i.created_at, \
     md.id AS media_id, md.url AS media_url, md.media_type, md.thumbnail_url, \
     u.id AS adder_id, u.username AS adder_username, u.avatar_url AS adder_avatar_url \
     FROM album_items i JOIN media md ON md.id = i.media_id JOIN users u ON u.id = i.added_by_id";

fn item_from_row(row: &PgRow) -> Result<AlbumItemView, sqlx::Error> {
    Ok(AlbumItemView {
        id: row.try_get("id")?,
        album_id: row.try_get("album_id")?,
        caption: row.try_get("caption")?,
        created_at: row.try_get("created_at")?,
        media: ItemMedia {
            id: row.try_get("media_id")?,
            url: row.try_get("media_url")?,
            media_type: row.try_get("media_type")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
        },
        added_by: UserSummary::from_row(row, "adder_")?,
    })
}

fn validated_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    validation::require_length("name", name, NAME_MIN, NAME_MAX)?;
    Ok(name.to_string())
}

pub(crate) async fn create_album(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreateAlbumRequest>,
) -> ApiResult<(StatusCode, Json<AlbumView>)> {
    let auth = require_auth(&state, &headers)?;
    let name = validated_name(&payload.name)?;
    let visibility = payload
        .visibility
        .unwrap_or_else(|| VISIBILITY_PRIVATE.to_string());
    validation::one_of("visibility", &visibility, VISIBILITIES)?;

    let album_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO albums (id, owner_id, name, visibility) VALUES ($1, $2, $3, $4)")
        .bind(&album_id)
        .bind(&auth.user_id)
        .bind(&name)
        .bind(&visibility)
        .execute(&state.pool)
        .await?;
    tracing::info!(user_id = %auth.user_id, %album_id, "album created");
    Ok((StatusCode::CREATED, Json(fetch_album(&state.pool, &album_id).await?)))
}

pub(crate) async fn my_albums(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MyAlbums>> {
    let auth = require_auth(&state, &headers)?;

    let mut owned = album_query();
    owned.push(" WHERE a.owner_id = ").push_bind(auth.user_id.clone());
    let owned = fetch_albums(&state.pool, owned).await?;

    let mut member_of = album_query();
    member_of
        .push(" WHERE a.owner_id <> ")
        .push_bind(auth.user_id.clone())
        .push(" AND EXISTS (SELECT 1 FROM album_members m WHERE m.album_id = a.id AND m.user_id = ")
        .push_bind(auth.user_id.clone())
        .push(")");
    let member_of = fetch_albums(&state.pool, member_of).await?;

    Ok(Json(MyAlbums { owned, member_of }))
}

pub(crate) async fn user_albums(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<AlbumView>>> {
    let auth = require_auth(&state, &headers)?;
    let mut builder = album_query();
    builder.push(" WHERE a.owner_id = ").push_bind(user_id.clone());
    if auth.user_id != user_id {
        builder
            .push(" AND (a.visibility = 'public' OR EXISTS (SELECT 1 FROM album_members m \
                   WHERE m.album_id = a.id AND m.user_id = ")
            .push_bind(auth.user_id.clone())
            .push("))");
    }
    Ok(Json(fetch_albums(&state.pool, builder).await?))
}

pub(crate) async fn get_album(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
) -> ApiResult<Json<AlbumDetail>> {
    let auth = require_auth(&state, &headers)?;
    load_access(&state.pool, &album_id, &auth.user_id)
        .await?
        .ensure_view(&auth.user_id)?;
    let album = fetch_album(&state.pool, &album_id).await?;
    let members = fetch_members(&state.pool, &album_id).await?;
    Ok(Json(AlbumDetail { album, members }))
}

pub(crate) async fn list_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<AlbumItemView>>> {
    let auth = require_auth(&state, &headers)?;
    load_access(&state.pool, &album_id, &auth.user_id)
        .await?
        .ensure_view(&auth.user_id)?;
    let params = query.resolve_with_max(ITEMS_LIMIT, MAX_LIMIT);

    let mut builder = QueryBuilder::<Postgres>::new(ITEM_COLUMNS);
    builder.push(" WHERE i.album_id = ").push_bind(album_id.clone());
    if let Some(cursor) = &params.cursor {
        builder
            .push(" AND (i.created_at, i.id) < (SELECT created_at, id FROM album_items WHERE id = ")
            .push_bind(cursor.clone())
            .push(")");
    }
    builder
        .push(" ORDER BY i.created_at DESC, i.id DESC LIMIT ")
        .push_bind(params.limit);
    let rows = builder.build().fetch_all(&state.pool).await?;
    Ok(Json(
        rows.iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

pub(crate) async fn update_album(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    JsonBody(payload): JsonBody<UpdateAlbumRequest>,
) -> ApiResult<Json<AlbumView>> {
    let auth = require_auth(&state, &headers)?;
    let name = payload.name.as_deref().map(validated_name).transpose()?;
    if let Some(visibility) = &payload.visibility {
        validation::one_of("visibility", visibility, VISIBILITIES)?;
    }
    let access = load_access(&state.pool, &album_id, &auth.user_id).await?;
    if !access.is_owner(&auth.user_id) {
        return Err(ApiError::forbidden("Only the owner can edit"));
    }

    sqlx::query(
        "UPDATE albums SET name = COALESCE($1, name), visibility = COALESCE($2, visibility), \
         cover_url = COALESCE($3, cover_url), updated_at = NOW() WHERE id = $4",
    )
    .bind(&name)
    .bind(&payload.visibility)
    .bind(&payload.cover_url)
    .bind(&album_id)
    .execute(&state.pool)
    .await?;
    Ok(Json(fetch_album(&state.pool, &album_id).await?))
}

pub(crate) async fn delete_album(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let access = load_access(&state.pool, &album_id, &auth.user_id).await?;
    if !access.is_owner(&auth.user_id) {
        return Err(ApiError::forbidden("Only the owner can delete"));
    }
    sqlx::query("DELETE FROM albums WHERE id = $1")
        .bind(&album_id)
        .execute(&state.pool)
        .await?;
    tracing::info!(user_id = %auth.user_id, %album_id, "album deleted");
    Ok(Json(json!({ "deleted": true })))
}

pub(crate) async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AlbumItemView>)> {
    let auth = require_auth(&state, &headers)?;
    let access = load_access(&state.pool, &album_id, &auth.user_id).await?;
    if !access.can_edit(&auth.user_id) {
        return Err(ApiError::forbidden("You do not have edit access"));
    }
    let mut form = read_multipart(multipart).await?;
    let caption = form.field("caption").map(str::to_string);
    let file = form.take_file()?;
    let media_type = if media::is_video_mime(&file.content_type) {
        "video"
    } else {
        "photo"
    };
    let stored = store_file(&state, UploadKind::Albums, file).await?;

    let media_id = Uuid::new_v4().to_string();
    let item_id = Uuid::new_v4().to_string();
    let mut tx = state.pool.begin().await?;
    sqlx::query("INSERT INTO media (id, url, media_type) VALUES ($1, $2, $3)")
        .bind(&media_id)
        .bind(&stored.url)
        .bind(media_type)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO album_items (id, album_id, media_id, added_by_id, caption) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&item_id)
    .bind(&album_id)
    .bind(&media_id)
    .bind(&auth.user_id)
    .bind(&caption)
    .execute(&mut *tx)
    .await?;
    if access.cover_url.is_none() {
        sqlx::query("UPDATE albums SET cover_url = $1, updated_at = NOW() WHERE id = $2")
            .bind(&stored.url)
            .bind(&album_id)
            .execute(&mut *tx)
            .await?;
    }

    let member_ids: Vec<String> =
        sqlx::query_scalar("SELECT user_id FROM album_members WHERE album_id = $1")
            .bind(&album_id)
            .fetch_all(&mut *tx)
            .await?;
    for recipient in item_recipients(&access.owner_id, member_ids, &auth.user_id) {
        notifications::insert(
            &mut tx,
            &NewNotification::new(recipient, NotificationType::AlbumNewItem, &auth.user_id)
                .with_album(&album_id),
        )
        .await?;
    }

    let row = sqlx::query(&format!("{ITEM_COLUMNS} WHERE i.id = $1"))
        .bind(&item_id)
        .fetch_one(&mut *tx)
        .await?;
    let item = item_from_row(&row)?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Owner and members other than the uploader, without duplicates.
fn item_recipients(owner_id: &str, member_ids: Vec<String>, uploader_id: &str) -> Vec<String> {
    let mut recipients = Vec::with_capacity(member_ids.len() + 1);
    for user_id in std::iter::once(owner_id.to_string()).chain(member_ids) {
        if user_id != uploader_id && !recipients.contains(&user_id) {
            recipients.push(user_id);
        }
    }
    recipients
}

pub(crate) async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((album_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let row = sqlx::query(
        "SELECT i.added_by_id, a.owner_id FROM album_items i JOIN albums a ON a.id = i.album_id \
         WHERE i.id = $1 AND i.album_id = $2",
    )
    .bind(&item_id)
    .bind(&album_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Item not found"))?;
    let added_by: String = row.try_get("added_by_id")?;
    let owner_id: String = row.try_get("owner_id")?;
    if added_by != auth.user_id && owner_id != auth.user_id {
        return Err(ApiError::forbidden("Cannot remove this item"));
    }
    sqlx::query("DELETE FROM album_items WHERE id = $1")
        .bind(&item_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "deleted": true })))
}

pub(crate) async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
) -> ApiResult<Json<Vec<MemberView>>> {
    let auth = require_auth(&state, &headers)?;
    load_access(&state.pool, &album_id, &auth.user_id)
        .await?
        .ensure_view(&auth.user_id)?;
    Ok(Json(fetch_members(&state.pool, &album_id).await?))
}

pub(crate) async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    JsonBody(payload): JsonBody<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<MemberView>)> {
    let auth = require_auth(&state, &headers)?;
    let role = payload.role.unwrap_or_else(|| ROLE_EDITOR.to_string());
    validation::one_of("role", &role, ROLES)?;
    validation::require_non_blank("userId", &payload.user_id)?;

    let access = load_access(&state.pool, &album_id, &auth.user_id).await?;
    if !access.is_owner(&auth.user_id) {
        return Err(ApiError::forbidden("Only the owner can add members"));
    }
    if payload.user_id == auth.user_id {
        return Err(ApiError::bad_request("Cannot add yourself"));
    }
    if !user_exists(&state.pool, &payload.user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    let mut tx = state.pool.begin().await?;
    let member_id: String = sqlx::query_scalar(
        "INSERT INTO album_members (id, album_id, user_id, role) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (album_id, user_id) DO UPDATE SET role = EXCLUDED.role RETURNING id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&album_id)
    .bind(&payload.user_id)
    .bind(&role)
    .fetch_one(&mut *tx)
    .await?;
    notifications::insert(
        &mut tx,
        &NewNotification::new(&payload.user_id, NotificationType::AlbumInvite, &auth.user_id)
            .with_album(&album_id),
    )
    .await?;
    let row = sqlx::query(&format!("{MEMBER_COLUMNS} WHERE m.id = $1"))
        .bind(&member_id)
        .fetch_one(&mut *tx)
        .await?;
    let member = member_from_row(&row)?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub(crate) async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((album_id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    let access = load_access(&state.pool, &album_id, &auth.user_id).await?;
    if user_id != auth.user_id && !access.is_owner(&auth.user_id) {
        return Err(ApiError::forbidden("Only the owner can remove members"));
    }
    sqlx::query("DELETE FROM album_members WHERE album_id = $1 AND user_id = $2")
        .bind(&album_id)
        .bind(&user_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "removed": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(visibility: &str, role: Option<&str>) -> AlbumAccess {
        AlbumAccess {
            owner_id: "owner".into(),
            visibility: visibility.into(),
            cover_url: None,
            member_role: role.map(str::to_string),
        }
    }

    #[test]
    fn private_albums_need_membership() {
        let album = access("private", None);
        assert!(album.can_view("owner"));
        assert!(!album.can_view("stranger"));
        assert_eq!(
            album.ensure_view("stranger").unwrap_err().message,
            "Access denied"
        );
        assert!(access("private", Some("viewer")).can_view("friend"));
        assert!(access("public", None).can_view("stranger"));
    }

    #[test]
    fn only_owner_and_editors_can_add_items() {
        assert!(access("public", None).can_edit("owner"));
        assert!(access("public", Some("editor")).can_edit("friend"));
        assert!(!access("public", Some("viewer")).can_edit("friend"));
        assert!(!access("public", None).can_edit("stranger"));
    }

    #[test]
    fn recipients_skip_uploader_and_duplicates() {
        let members = vec!["a".to_string(), "b".to_string(), "owner".to_string()];
        assert_eq!(
            item_recipients("owner", members.clone(), "a"),
            vec!["owner".to_string(), "b".to_string()]
        );
        assert_eq!(
            item_recipients("owner", members, "owner"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validated_name("  Summer  ").unwrap(), "Summer");
        assert!(validated_name("   ").is_err());
        assert!(validated_name(&"n".repeat(51)).is_err());
    }
}
