#![allow(dead_code)]

use axum::http::HeaderMap;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::ServerBuilder;
use utoipa::{Modify, OpenApi};

use crate::{ErrorResponse, HealthStatus};

#[derive(OpenApi)]
#[openapi(
    info(title = "HeirLink API", version = "0.1.0"),
    paths(
        healthz_doc,
        metrics_doc,
        api_root_doc,
        api_health_doc,
        openapi_doc,
        ws_doc,
        register_doc,
        login_doc,
        refresh_doc,
        forgot_password_doc,
        reset_password_doc,
        change_password_doc,
        logout_doc,
        auth_me_doc,
        get_me_doc,
        update_me_doc,
        notification_settings_doc,
        blocked_doc,
        suggestions_doc,
        profile_doc,
        follow_doc,
        unfollow_doc,
        followers_doc,
        following_doc,
        online_doc,
        block_doc,
        unblock_doc,
        list_posts_doc,
        create_post_doc,
        feed_doc,
        saved_doc,
        user_posts_doc,
        get_post_doc,
        update_post_doc,
        delete_post_doc,
        like_doc,
        save_doc,
        unsave_doc,
        list_comments_doc,
        create_comment_doc,
        update_comment_doc,
        delete_comment_doc,
        create_album_doc,
        my_albums_doc,
        user_albums_doc,
        get_album_doc,
        update_album_doc,
        delete_album_doc,
        album_items_doc,
        add_album_item_doc,
        remove_album_item_doc,
        album_members_doc,
        add_album_member_doc,
        remove_album_member_doc,
        story_feed_doc,
        create_story_doc,
        my_stories_doc,
        delete_story_doc,
        send_message_doc,
        conversations_doc,
        thread_doc,
        delete_message_doc,
        notifications_doc,
        read_all_doc,
        mark_read_doc,
        search_users_doc,
        search_posts_doc,
        create_report_doc,
        list_reports_doc,
        upload_doc,
        serve_upload_doc,
        ai_chat_doc,
        ai_image_doc,
        ai_video_doc,
        ai_video_result_doc,
        smart_album_upload_doc,
        smart_album_job_doc,
        smart_album_items_doc,
        smart_album_item_doc
    ),
    components(schemas(HealthStatus, ErrorResponse)),
    modifiers(&BearerAuth),
    tags(
        (name = "heirlink", description = "HeirLink family social network API")
    )
)]
pub struct HeirLinkApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn document(server_url: Option<&str>) -> utoipa::openapi::OpenApi {
    let mut doc = HeirLinkApiDoc::openapi();
    if let Some(url) = server_url {
        doc.servers = Some(vec![ServerBuilder::new().url(url).build()]);
    }
    doc
}

pub fn infer_server_url(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|value| value.to_str().ok())?;
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    Some(format!("{proto}://{host}"))
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, body = HealthStatus), (status = 503, body = HealthStatus))
)]
fn healthz_doc() {}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, content_type = "text/plain", body = String))
)]
fn metrics_doc() {}

#[utoipa::path(
    get,
    path = "/api",
    responses((status = 200, content_type = "text/plain", body = String))
)]
fn api_root_doc() {}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = serde_json::Value))
)]
fn api_health_doc() {}

#[utoipa::path(
    get,
    path = "/api/docs/openapi.json",
    responses((status = 200, body = serde_json::Value))
)]
fn openapi_doc() {}

#[utoipa::path(
    get,
    path = "/api/ws",
    params(
        ("token" = Option<String>, Query, description = "Access token, alternative to the Authorization header")
    ),
    responses((status = 101, description = "WebSocket upgrade"))
)]
fn ws_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = serde_json::Value,
    responses((status = 201, body = serde_json::Value), (status = 409, body = ErrorResponse))
)]
fn register_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = serde_json::Value,
    responses((status = 200, body = serde_json::Value), (status = 401, body = ErrorResponse))
)]
fn login_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = serde_json::Value,
    responses((status = 200, body = serde_json::Value), (status = 401, body = ErrorResponse))
)]
fn refresh_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = serde_json::Value,
    responses((status = 200, body = serde_json::Value))
)]
fn forgot_password_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = serde_json::Value,
    responses((status = 200, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn reset_password_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 401, body = ErrorResponse))
)]
fn change_password_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn logout_doc() {}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 401, body = ErrorResponse))
)]
fn auth_me_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/me",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 401, body = ErrorResponse))
)]
fn get_me_doc() {}

#[utoipa::path(
    patch,
    path = "/api/users/me",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 409, body = ErrorResponse))
)]
fn update_me_doc() {}

#[utoipa::path(
    patch,
    path = "/api/users/me/notification-settings",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn notification_settings_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/me/blocked",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn blocked_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/suggestions",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum suggestions")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn suggestions_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn profile_doc() {}

#[utoipa::path(
    post,
    path = "/api/users/{id}/follow",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn follow_doc() {}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/follow",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn unfollow_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/{id}/followers",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn followers_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/{id}/following",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn following_doc() {}

#[utoipa::path(
    get,
    path = "/api/users/{id}/online",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn online_doc() {}

#[utoipa::path(
    post,
    path = "/api/users/{id}/block",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn block_doc() {}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/block",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn unblock_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn list_posts_doc() {}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn create_post_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts/feed",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn feed_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts/saved",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn saved_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts/user/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn user_posts_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn get_post_doc() {}

#[utoipa::path(
    patch,
    path = "/api/posts/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn update_post_doc() {}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 204, description = "Deleted"), (status = 403, body = ErrorResponse))
)]
fn delete_post_doc() {}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/like",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn like_doc() {}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/save",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn save_doc() {}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}/save",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn unsave_doc() {}

#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn list_comments_doc() {}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/comments",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn create_comment_doc() {}

#[utoipa::path(
    patch,
    path = "/api/comments/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn update_comment_doc() {}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 204, description = "Deleted"), (status = 403, body = ErrorResponse))
)]
fn delete_comment_doc() {}

#[utoipa::path(
    post,
    path = "/api/albums",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value))
)]
fn create_album_doc() {}

#[utoipa::path(
    get,
    path = "/api/albums/my",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn my_albums_doc() {}

#[utoipa::path(
    get,
    path = "/api/albums/user/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn user_albums_doc() {}

#[utoipa::path(
    get,
    path = "/api/albums/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn get_album_doc() {}

#[utoipa::path(
    patch,
    path = "/api/albums/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn update_album_doc() {}

#[utoipa::path(
    delete,
    path = "/api/albums/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn delete_album_doc() {}

#[utoipa::path(
    get,
    path = "/api/albums/{id}/items",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn album_items_doc() {}

#[utoipa::path(
    post,
    path = "/api/albums/{id}/items",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn add_album_item_doc() {}

#[utoipa::path(
    delete,
    path = "/api/albums/{id}/items/{item_id}",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("item_id" = String, Path, description = "Album item id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn remove_album_item_doc() {}

#[utoipa::path(
    get,
    path = "/api/albums/{id}/members",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn album_members_doc() {}

#[utoipa::path(
    post,
    path = "/api/albums/{id}/members",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn add_album_member_doc() {}

#[utoipa::path(
    delete,
    path = "/api/albums/{id}/members/{user_id}",
    params(
        ("id" = String, Path, description = "Resource id"),
        ("user_id" = String, Path, description = "User id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn remove_album_member_doc() {}

#[utoipa::path(
    get,
    path = "/api/stories",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn story_feed_doc() {}

#[utoipa::path(
    post,
    path = "/api/stories",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value))
)]
fn create_story_doc() {}

#[utoipa::path(
    get,
    path = "/api/stories/me",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn my_stories_doc() {}

#[utoipa::path(
    delete,
    path = "/api/stories/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 204, description = "Deleted"), (status = 403, body = ErrorResponse))
)]
fn delete_story_doc() {}

#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn send_message_doc() {}

#[utoipa::path(
    get,
    path = "/api/messages/conversations",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn conversations_doc() {}

#[utoipa::path(
    get,
    path = "/api/messages/with/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn thread_doc() {}

#[utoipa::path(
    delete,
    path = "/api/messages/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 204, description = "Deleted"), (status = 403, body = ErrorResponse))
)]
fn delete_message_doc() {}

#[utoipa::path(
    get,
    path = "/api/notifications",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Id of the last item already seen")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn notifications_doc() {}

#[utoipa::path(
    post,
    path = "/api/notifications/read-all",
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn read_all_doc() {}

#[utoipa::path(
    patch,
    path = "/api/notifications/{id}/read",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn mark_read_doc() {}

#[utoipa::path(
    get,
    path = "/api/search/users",
    params(
        ("q" = String, Query, description = "Search term"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn search_users_doc() {}

#[utoipa::path(
    get,
    path = "/api/search/posts",
    params(
        ("q" = String, Query, description = "Search term"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    responses((status = 200, body = serde_json::Value))
)]
fn search_posts_doc() {}

#[utoipa::path(
    post,
    path = "/api/reports",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 201, body = serde_json::Value), (status = 409, body = ErrorResponse))
)]
fn create_report_doc() {}

#[utoipa::path(
    get,
    path = "/api/reports",
    params(
        ("status" = Option<String>, Query, description = "Report status filter"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn list_reports_doc() {}

#[utoipa::path(
    post,
    path = "/api/upload",
    params(
        ("type" = Option<String>, Query, description = "posts, avatars, stories or albums")
    ),
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn upload_doc() {}

#[utoipa::path(
    get,
    path = "/api/uploads/{kind}/{filename}",
    params(
        ("kind" = String, Path, description = "Upload kind"),
        ("filename" = String, Path, description = "Stored file name")
    ),
    responses((status = 200, content_type = "application/octet-stream", body = Vec<u8>), (status = 404, body = ErrorResponse))
)]
fn serve_upload_doc() {}

#[utoipa::path(
    post,
    path = "/api/ai/chat",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 429, body = ErrorResponse))
)]
fn ai_chat_doc() {}

#[utoipa::path(
    post,
    path = "/api/ai/generate-image",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 429, body = ErrorResponse))
)]
fn ai_image_doc() {}

#[utoipa::path(
    post,
    path = "/api/ai/generate-video",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 429, body = ErrorResponse))
)]
fn ai_video_doc() {}

#[utoipa::path(
    get,
    path = "/api/ai/video/{request_id}",
    params(
        ("request_id" = String, Path, description = "xAI request id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn ai_video_result_doc() {}

#[utoipa::path(
    post,
    path = "/api/smart-album/upload",
    request_body = serde_json::Value,
    security(("bearer" = [])),
    responses((status = 202, body = serde_json::Value), (status = 400, body = ErrorResponse))
)]
fn smart_album_upload_doc() {}

#[utoipa::path(
    get,
    path = "/api/smart-album/jobs/{job_id}",
    params(
        ("job_id" = String, Path, description = "Smart album job id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 404, body = ErrorResponse))
)]
fn smart_album_job_doc() {}

#[utoipa::path(
    get,
    path = "/api/smart-album/items",
    params(
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<i64>, Query, description = "Page size")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value))
)]
fn smart_album_items_doc() {}

#[utoipa::path(
    get,
    path = "/api/smart-album/items/{id}",
    params(
        ("id" = String, Path, description = "Resource id")
    ),
    security(("bearer" = [])),
    responses((status = 200, body = serde_json::Value), (status = 403, body = ErrorResponse))
)]
fn smart_album_item_doc() {}
