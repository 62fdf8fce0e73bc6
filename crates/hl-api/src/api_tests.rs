//! Router-level tests against a live Postgres; skipped when `DATABASE_URL` is unset.

use super::*;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use hl_core::notifications::NotificationView;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

static MIGRATIONS: OnceCell<()> = OnceCell::const_new();
static TEST_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn lock_tests() -> MutexGuard<'static, ()> {
    TEST_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn test_pool() -> Option<Pool<Postgres>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect database");
    MIGRATIONS
        .get_or_init(|| async {
            hl_core::migrations::run(&pool)
                .await
                .expect("run migrations");
        })
        .await;
    Some(pool)
}

fn build_state(pool: Pool<Postgres>, upload_dir: &std::path::Path) -> AppState {
    AppState {
        pool,
        tokens: Arc::new(TokenSigner {
            access: JwtConfig::new("test-access-secret", 3600),
            refresh: JwtConfig::new("test-refresh-secret", 7200),
        }),
        cache: Arc::new(Cache::memory(128)),
        store: Arc::new(MediaStore::local("http://localhost:3000", upload_dir)),
        rate_limiter: Arc::new(RateLimiter::new()),
        rate_limits_enabled: false,
        gateway: gateway::Gateway::new(),
        analysis: AnalysisClient::new("http://127.0.0.1:9").expect("analysis client"),
        ai_service_configured: false,
        xai: ai::XaiClient::new(XaiSettings::default()).expect("xai client"),
        app_env: AppEnv::Test,
        queue_enabled: false,
    }
}

fn with_client_addr(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(with_client_addr(request))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).to_string())
        })
    };
    (status, value)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    send(app, request.body(body).expect("request")).await
}

const BOUNDARY: &str = "hl-test-boundary";
const GIF_BYTES: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

/// Posts a multipart form with a single `file` part plus text fields.
async fn call_multipart(
    app: &Router,
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
    file: (&str, &str, &[u8]),
) -> (StatusCode, Value) {
    let (filename, content_type, content) = file;
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\ncontent-disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\ncontent-disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             content-type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request");
    send(app, request).await
}

async fn notification_kinds(app: &Router, user: &TestUser) -> Vec<String> {
    let (status, body) = call(app, Method::GET, "/api/notifications?limit=100", Some(&user.token), None).await;
    assert_eq!(status, StatusCode::OK, "notifications failed: {body}");
    let items: Vec<NotificationView> =
        serde_json::from_value(body["items"].clone()).expect("notifications");
    items
        .into_iter()
        .map(|item| item.notification_type)
        .collect()
}

fn ids(items: &Value) -> Vec<String> {
    items
        .as_array()
        .expect("array")
        .iter()
        .map(|item| item["id"].as_str().expect("id").to_string())
        .collect()
}

struct TestUser {
    id: String,
    username: String,
    token: String,
}

async fn register(app: &Router) -> TestUser {
    let suffix = Uuid::new_v4().simple().to_string();
    let username = format!("u_{}", &suffix[..12]);
    let (status, body) = call(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "email": format!("{username}@example.com"),
            "username": &username,
            "password": "correct-horse-battery",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    TestUser {
        id: body["user"]["id"].as_str().expect("user id").to_string(),
        username,
        token: body["accessToken"].as_str().expect("token").to_string(),
    }
}

async fn create_post(app: &Router, user: &TestUser, caption: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/posts",
        Some(&user.token),
        Some(json!({
            "caption": caption,
            "media": [{"url": "https://cdn.example.com/p.jpg", "type": "photo"}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create post failed: {body}");
    body["id"].as_str().expect("post id").to_string()
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));

    let (status, body) = call(&app, Method::GET, "/api/posts/feed", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["statusCode"], 401);

    let (status, body) = call(&app, Method::GET, "/api", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("HeirLink API is running!".into()));
}

#[tokio::test]
async fn likes_notify_the_author_and_feed_shows_followed_posts() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let author = register(&app).await;
    let reader = register(&app).await;
    let post_id = create_post(&app, &author, "first steps").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/users/{}/follow", author.id),
        Some(&reader.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "follow failed: {body}");

    let (status, body) = call(&app, Method::GET, "/api/posts/feed", Some(&reader.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let posts = body["posts"].as_array().expect("posts");
    assert!(posts.iter().any(|post| post["id"] == post_id.as_str()));

    let like_uri = format!("/api/posts/{post_id}/like");
    let (_, body) = call(&app, Method::POST, &like_uri, Some(&reader.token), None).await;
    assert_eq!(body, json!({"liked": true}));

    let (status, body) = call(&app, Method::GET, "/api/notifications", Some(&author.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let items: Vec<NotificationView> =
        serde_json::from_value(body["items"].clone()).expect("notifications");
    let kinds: Vec<&str> = items
        .iter()
        .map(|item| item.notification_type.as_str())
        .collect();
    assert!(kinds.contains(&"like"), "unexpected notifications: {kinds:?}");
    assert!(kinds.contains(&"follow"), "unexpected notifications: {kinds:?}");
    assert!(body["unreadCount"].as_i64().unwrap_or_default() >= 2);

    let (_, body) = call(&app, Method::POST, &like_uri, Some(&reader.token), None).await;
    assert_eq!(body, json!({"liked": false}));
}

#[tokio::test]
async fn only_the_author_may_edit_a_post() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let author = register(&app).await;
    let other = register(&app).await;
    let post_id = create_post(&app, &author, "original").await;
    let uri = format!("/api/posts/{post_id}");

    let (status, body) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&other.token),
        Some(json!({"caption": "hijacked"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only edit your own posts");

    let (status, _) = call(&app, Method::DELETE, &uri, Some(&author.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocked_users_cannot_message_each_other() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let alice = register(&app).await;
    let bob = register(&app).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/messages",
        Some(&alice.token),
        Some(json!({"recipientId": bob.id, "text": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "send failed: {body}");
    assert_eq!(body["isFromMe"], true);

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/messages/with/{}", alice.id),
        Some(&bob.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["text"], "hello");
    assert_eq!(body["items"][0]["isFromMe"], false);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/users/{}/block", alice.id),
        Some(&bob.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/messages",
        Some(&alice.token),
        Some(json!({"recipientId": bob.id, "text": "still there?"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You cannot message this user");
}

#[tokio::test]
async fn ai_routes_report_missing_configuration() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let user = register(&app).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/ai/chat",
        Some(&user.token),
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "AI service is not configured (XAI_API_KEY)");
}

async fn fetch_raw(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    let response = app
        .clone()
        .oneshot(with_client_addr(request))
        .await
        .expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, bytes.to_vec())
}

async fn follow(app: &Router, follower: &TestUser, target: &TestUser) {
    let (status, body) = call(
        app,
        Method::POST,
        &format!("/api/users/{}/follow", target.id),
        Some(&follower.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "follow failed: {body}");
}

async fn create_story(app: &Router, user: &TestUser, name: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/stories",
        Some(&user.token),
        Some(json!({"mediaUrl": format!("https://cdn.example.com/{name}.jpg"), "type": "photo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create story failed: {body}");
    body["id"].as_str().expect("story id").to_string()
}

async fn backdate(pool: &Pool<Postgres>, table: &str, id: &str, minutes: i32) {
    sqlx::query(&format!(
        "UPDATE {table} SET created_at = NOW() - make_interval(mins => $2) WHERE id = $1"
    ))
    .bind(id)
    .bind(minutes)
    .execute(pool)
    .await
    .expect("backdate row");
}

#[tokio::test]
async fn comment_replies_nest_under_their_parent() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let author = register(&app).await;
    let commenter = register(&app).await;
    let replier = register(&app).await;
    let post_id = create_post(&app, &author, "grandma's garden").await;
    let other_post = create_post(&app, &author, "another day").await;
    let uri = format!("/api/posts/{post_id}/comments");

    let (status, parent) = call(
        &app,
        Method::POST,
        &uri,
        Some(&commenter.token),
        Some(json!({"text": "lovely roses"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "comment failed: {parent}");
    let parent_id = parent["id"].as_str().expect("comment id").to_string();

    let (status, reply) = call(
        &app,
        Method::POST,
        &uri,
        Some(&replier.token),
        Some(json!({"text": "agreed", "parentId": parent_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "reply failed: {reply}");
    assert_eq!(reply["parentId"], parent_id.as_str());

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/posts/{other_post}/comments"),
        Some(&replier.token),
        Some(json!({"text": "wrong thread", "parentId": parent_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Parent comment not found or does not belong to this post"
    );

    let (status, body) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let comments = body["comments"].as_array().expect("comments");
    assert_eq!(comments.len(), 1, "replies must not be listed at top level");
    assert_eq!(comments[0]["id"], parent_id.as_str());
    assert_eq!(ids(&comments[0]["replies"]), vec![reply["id"].as_str().expect("reply id").to_string()]);
    assert_eq!(body["pagination"]["total"], 1);

    assert!(notification_kinds(&app, &commenter).await.contains(&"comment_reply".to_string()));
    let author_kinds = notification_kinds(&app, &author).await;
    assert_eq!(
        author_kinds.iter().filter(|kind| kind.as_str() == "comment").count(),
        2
    );
    assert!(!author_kinds.contains(&"comment_reply".to_string()));
}

#[tokio::test]
async fn album_access_follows_visibility_and_roles() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let owner = register(&app).await;
    let viewer = register(&app).await;
    let editor = register(&app).await;
    let stranger = register(&app).await;

    let (status, album) = call(
        &app,
        Method::POST,
        "/api/albums",
        Some(&owner.token),
        Some(json!({"name": "Summer 1998"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create album failed: {album}");
    assert_eq!(album["visibility"], "private");
    let album_id = album["id"].as_str().expect("album id").to_string();
    let album_uri = format!("/api/albums/{album_id}");
    let members_uri = format!("{album_uri}/members");
    let items_uri = format!("{album_uri}/items");

    let (status, body) = call(&app, Method::GET, &album_uri, Some(&stranger.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Access denied");
    let (status, _) = call(&app, Method::GET, &items_uri, Some(&stranger.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::POST,
        &members_uri,
        Some(&stranger.token),
        Some(json!({"userId": viewer.id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Only the owner can add members");
    let (status, body) = call(
        &app,
        Method::POST,
        &members_uri,
        Some(&owner.token),
        Some(json!({"userId": owner.id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cannot add yourself");
    let (status, _) = call(
        &app,
        Method::POST,
        &members_uri,
        Some(&owner.token),
        Some(json!({"userId": Uuid::new_v4().to_string()})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, member) = call(
        &app,
        Method::POST,
        &members_uri,
        Some(&owner.token),
        Some(json!({"userId": viewer.id, "role": "viewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "add viewer failed: {member}");
    assert_eq!(member["role"], "viewer");
    let (status, member) = call(
        &app,
        Method::POST,
        &members_uri,
        Some(&owner.token),
        Some(json!({"userId": editor.id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "add editor failed: {member}");
    assert_eq!(member["role"], "editor");

    let (status, body) = call_multipart(
        &app,
        &items_uri,
        &viewer.token,
        &[("caption", "at the lake")],
        ("lake.gif", "image/gif", GIF_BYTES),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You do not have edit access");

    let (status, item) = call_multipart(
        &app,
        &items_uri,
        &editor.token,
        &[("caption", "at the lake")],
        ("lake.gif", "image/gif", GIF_BYTES),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "add item failed: {item}");
    assert_eq!(item["caption"], "at the lake");
    assert_eq!(item["addedBy"]["id"], editor.id.as_str());

    let (status, items) = call(&app, Method::GET, &items_uri, Some(&viewer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&items), vec![item["id"].as_str().expect("item id").to_string()]);

    let (status, detail) = call(&app, Method::GET, &album_uri, Some(&viewer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["itemsCount"], 1);
    assert!(detail["coverUrl"].is_string(), "first item sets the cover: {detail}");
    assert_eq!(detail["members"].as_array().expect("members").len(), 2);

    assert!(notification_kinds(&app, &owner).await.contains(&"album_new_item".to_string()));
    let viewer_kinds = notification_kinds(&app, &viewer).await;
    assert!(viewer_kinds.contains(&"album_invite".to_string()));
    assert!(viewer_kinds.contains(&"album_new_item".to_string()));
    assert!(!notification_kinds(&app, &editor).await.contains(&"album_new_item".to_string()));

    let (status, body) = call(
        &app,
        Method::DELETE,
        &format!("{members_uri}/{}", viewer.id),
        Some(&viewer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"removed": true}));
    let (status, _) = call(&app, Method::GET, &album_uri, Some(&viewer.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, public) = call(
        &app,
        Method::POST,
        "/api/albums",
        Some(&owner.token),
        Some(json!({"name": "Open house", "visibility": "public"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/api/albums/{}", public["id"].as_str().expect("album id")),
        Some(&stranger.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_stories_disappear_and_feed_groups_by_author() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool.clone(), dir.path()));
    let anna = register(&app).await;
    let ben = register(&app).await;
    let reader = register(&app).await;
    follow(&app, &reader, &anna).await;
    follow(&app, &reader, &ben).await;

    let (status, story) = call(
        &app,
        Method::POST,
        "/api/stories",
        Some(&anna.token),
        Some(json!({"mediaUrl": "https://cdn.example.com/a-old.jpg", "type": "photo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create story failed: {story}");
    let created: DateTime<Utc> = story["createdAt"].as_str().expect("createdAt").parse().expect("timestamp");
    let expires: DateTime<Utc> = story["expiresAt"].as_str().expect("expiresAt").parse().expect("timestamp");
    let lifetime = (expires - created).num_minutes();
    assert!((1439..=1441).contains(&lifetime), "story lifetime was {lifetime} minutes");

    let anna_old = story["id"].as_str().expect("story id").to_string();
    let ben_story = create_story(&app, &ben, "b").await;
    let anna_new = create_story(&app, &anna, "a-new").await;
    backdate(&pool, "stories", &anna_old, 30).await;
    backdate(&pool, "stories", &ben_story, 20).await;
    backdate(&pool, "stories", &anna_new, 10).await;

    let (status, groups) = call(&app, Method::GET, "/api/stories", Some(&reader.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let groups = groups.as_array().expect("groups").clone();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["user"]["id"], anna.id.as_str());
    assert_eq!(ids(&groups[0]["stories"]), vec![anna_new.clone(), anna_old.clone()]);
    assert_eq!(groups[1]["user"]["id"], ben.id.as_str());

    sqlx::query("UPDATE stories SET expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(&anna_new)
        .execute(&pool)
        .await
        .expect("expire story");

    let (_, groups) = call(&app, Method::GET, "/api/stories", Some(&reader.token), None).await;
    let groups = groups.as_array().expect("groups").clone();
    assert_eq!(groups[0]["user"]["id"], ben.id.as_str());
    assert_eq!(groups[1]["user"]["id"], anna.id.as_str());
    assert_eq!(ids(&groups[1]["stories"]), vec![anna_old.clone()]);

    let (status, mine) = call(&app, Method::GET, "/api/stories/me", Some(&anna.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&mine), vec![anna_old.clone()]);

    let story_uri = format!("/api/stories/{anna_old}");
    let (status, body) = call(&app, Method::DELETE, &story_uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only delete your own story");
    let (status, _) = call(&app, Method::DELETE, &story_uri, Some(&anna.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn search_escapes_wildcards_and_ignores_blank_queries() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let user = register(&app).await;
    let tag = format!("tag{}", &user.username[2..]);
    let post_id = create_post(&app, &user, &format!("{tag} 100% real")).await;

    let (status, body) = call(&app, Method::GET, "/api/search/users?q=%20%20", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["pagination"]["total"], 0);
    assert_eq!(body["pagination"]["totalPages"], 0);

    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/api/search/users?q={}", user.username),
        None,
        None,
    )
    .await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["id"], user.id.as_str());

    let (_, body) = call(&app, Method::GET, "/api/search/users?q=%25", None, None).await;
    assert_eq!(body["pagination"]["total"], 0, "percent must match literally: {body}");
    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/api/search/users?q=u%25{}", &user.username[2..]),
        None,
        None,
    )
    .await;
    assert_eq!(body["pagination"]["total"], 0);

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/search/posts?q={tag}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["posts"]), vec![post_id]);
    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/api/search/posts?q={tag}%25"),
        None,
        None,
    )
    .await;
    assert_eq!(body["posts"], json!([]));
}

#[tokio::test]
async fn duplicate_reports_conflict() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let author = register(&app).await;
    let reporter = register(&app).await;
    let post_id = create_post(&app, &author, "questionable").await;
    let report = json!({"targetType": "post", "targetId": post_id, "reason": "spam link"});

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/reports",
        Some(&reporter.token),
        Some(report.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "report failed: {body}");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["reporterId"], reporter.id.as_str());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/reports",
        Some(&reporter.token),
        Some(report.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "You have already reported this content");

    let (status, _) = call(&app, Method::POST, "/api/reports", Some(&author.token), Some(report)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn uploads_check_magic_bytes_and_serve_files() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let user = register(&app).await;

    let (status, body) = call_multipart(
        &app,
        "/api/upload?type=posts",
        &user.token,
        &[],
        ("photo.png", "image/png", GIF_BYTES),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "File content does not match declared type");

    let (status, body) = call_multipart(
        &app,
        "/api/upload?type=posts",
        &user.token,
        &[],
        ("photo.gif", "image/gif", GIF_BYTES),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    assert_eq!(body["mimetype"], "image/gif");
    let relative_path = body["relativePath"].as_str().expect("relativePath").to_string();
    assert!(relative_path.starts_with("posts/") && relative_path.ends_with(".gif"));

    let (status, headers, content) = fetch_raw(&app, &format!("/api/uploads/{relative_path}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, GIF_BYTES);
    assert_eq!(headers["content-type"], "image/gif");
    assert_eq!(headers["cache-control"], "public, max-age=2592000, immutable");

    std::fs::write(dir.path().join("secret.gif"), GIF_BYTES).expect("write secret");
    for uri in [
        "/api/uploads/posts/..secret.gif",
        "/api/uploads/posts/%2E%2E%2Fsecret.gif",
    ] {
        let (status, _, _) = fetch_raw(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} must be rejected");
    }
    let (status, _, _) = fetch_raw(&app, "/api/uploads/docs/file.gif").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = fetch_raw(&app, "/api/uploads/posts/missing.gif").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn feed_falls_back_to_discovery() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let author = register(&app).await;
    let newcomer = register(&app).await;
    let post_id = create_post(&app, &author, "welcome aboard").await;

    let (status, body) = call(&app, Method::GET, "/api/posts/feed", Some(&newcomer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let posts = body["posts"].as_array().expect("posts");
    assert!(!posts.is_empty());
    assert_eq!(posts[0]["id"], post_id.as_str());
    assert_eq!(body["pagination"]["total"], posts.len());
    assert_eq!(body["pagination"]["totalPages"], 1);

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/posts/feed?page=2",
        Some(&newcomer.token),
        None,
    )
    .await;
    assert_eq!(body["posts"], json!([]));
}

#[tokio::test]
async fn cursor_pages_continue_after_the_last_id() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool.clone(), dir.path()));
    let author = register(&app).await;
    let oldest = create_post(&app, &author, "one").await;
    let middle = create_post(&app, &author, "two").await;
    let newest = create_post(&app, &author, "three").await;
    backdate(&pool, "posts", &oldest, 30).await;
    backdate(&pool, "posts", &middle, 20).await;
    backdate(&pool, "posts", &newest, 10).await;
    let uri = format!("/api/posts/user/{}?limit=2", author.id);

    let (status, first) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&first["posts"]), vec![newest.clone(), middle.clone()]);
    assert_eq!(first["pagination"]["total"], 3);
    assert_eq!(first["pagination"]["nextCursor"], middle.as_str());

    let (_, second) = call(&app, Method::GET, &format!("{uri}&cursor={middle}"), None, None).await;
    assert_eq!(ids(&second["posts"]), vec![oldest]);
    assert!(second["pagination"].get("nextCursor").is_none());
    assert!(second["pagination"].get("total").is_none());
}

#[tokio::test]
async fn suggestions_rank_friends_of_friends_then_fall_back() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let viewer = register(&app).await;
    let friend = register(&app).await;
    let other_friend = register(&app).await;
    let close = register(&app).await;
    let distant = register(&app).await;
    follow(&app, &viewer, &friend).await;
    follow(&app, &viewer, &other_friend).await;
    follow(&app, &friend, &close).await;
    follow(&app, &other_friend, &close).await;
    follow(&app, &friend, &distant).await;
    follow(&app, &friend, &viewer).await;

    let (status, body) = call(&app, Method::GET, "/api/users/suggestions", Some(&viewer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["items"]), vec![close.id.clone(), distant.id.clone()]);

    let loner = register(&app).await;
    let followed = register(&app).await;
    let blocked = register(&app).await;
    let popular = register(&app).await;
    follow(&app, &loner, &followed).await;
    for fan in [&viewer, &friend, &other_friend] {
        follow(&app, fan, &popular).await;
    }
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/users/{}/block", loner.id),
        Some(&blocked.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/users/suggestions?limit=50",
        Some(&loner.token),
        None,
    )
    .await;
    let suggested = ids(&body["items"]);
    assert!(suggested.contains(&popular.id), "popular user missing: {body}");
    assert!(!suggested.contains(&followed.id));
    assert!(!suggested.contains(&blocked.id));
    assert!(!suggested.contains(&loner.id));
}

#[tokio::test]
async fn unblock_refreshes_cached_profiles() {
    let _guard = lock_tests();
    let Some(pool) = test_pool().await else {
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_router(build_state(pool, dir.path()));
    let alice = register(&app).await;
    let bob = register(&app).await;
    let carol = register(&app).await;
    let block_uri = format!("/api/users/{}/block", bob.id);
    let profile_uri = format!("/api/users/{}", bob.id);

    let (status, _) = call(&app, Method::POST, &block_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/users/{}/follow", bob.id),
        Some(&alice.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You cannot follow this user");

    let (_, profile) = call(&app, Method::GET, &profile_uri, Some(&alice.token), None).await;
    assert_eq!(profile["followersCount"], 0);
    follow(&app, &carol, &bob).await;

    let (_, body) = call(&app, Method::DELETE, &block_uri, Some(&alice.token), None).await;
    assert_eq!(body, json!({"blocked": false}));
    let (_, profile) = call(&app, Method::GET, &profile_uri, Some(&alice.token), None).await;
    assert_eq!(profile["followersCount"], 1, "stale profile after unblock: {profile}");
    assert_eq!(profile["isFollowing"], false);

    follow(&app, &alice, &bob).await;
}
