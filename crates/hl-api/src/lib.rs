use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequest, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hl_core::auth::{JwtConfig, TokenSigner};
use hl_core::cache::Cache;
use hl_core::config::{self, AppEnv};
use hl_core::health::{self, DependencyStatus};
use hl_core::media::MediaError;
use hl_core::rate_limit::{RateLimitRule, RateLimiter};
use hl_core::smart_album::{AnalysisClient, DEFAULT_AI_SERVICE_URL};
use hl_core::storage::{MediaStore, StorageError, StorageSettings};
use hl_core::{db, http, logging, metrics, realtime, server};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod ai;
mod albums;
mod auth;
mod comments;
mod gateway;
mod messages;
mod notifications;
mod openapi;
mod posts;
mod reports;
mod search;
mod smart_album;
mod stories;
mod upload;
mod users;
mod validation;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod openapi_contract_tests;

pub use ai::XaiSettings;

pub const SERVICE_NAME: &str = "hl-api";

/// Admits a 100 MB video plus multipart framing.
const MAX_REQUEST_BYTES: usize = 110 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const GLOBAL_RULES: [RateLimitRule; 2] = [
    RateLimitRule::per_second("global-second", 10),
    RateLimitRule::per_minute("global-minute", 200),
];

static MASK_SERVER_ERRORS: AtomicBool = AtomicBool::new(false);

#[derive(Clone)]
pub(crate) struct AppState {
    pool: Pool<Postgres>,
    tokens: Arc<TokenSigner>,
    cache: Arc<Cache>,
    store: Arc<MediaStore>,
    rate_limiter: Arc<RateLimiter>,
    rate_limits_enabled: bool,
    gateway: gateway::Gateway,
    analysis: AnalysisClient,
    ai_service_configured: bool,
    xai: ai::XaiClient,
    app_env: AppEnv,
    queue_enabled: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorResponse {
    status_code: u16,
    error: String,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
    headers: Vec<(HeaderName, String)>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            headers: Vec::new(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFilename => ApiError::bad_request(err.to_string()),
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                other.to_string(),
            ),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
            if MASK_SERVER_ERRORS.load(Ordering::Relaxed) {
                "Internal server error".to_string()
            } else {
                self.message
            }
        } else {
            self.message
        };
        let payload = ErrorResponse {
            status_code: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            code: self.code.to_string(),
            message,
            details: self.details,
        };
        let mut response = (self.status, Json(payload)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// `Json` whose rejections render as a 400 `VALIDATION_ERROR` envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub(crate) struct JsonBody<T>(pub T);

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthStatus {
    status: String,
}

#[derive(Serialize)]
struct ApiHealth {
    status: &'static str,
    timestamp: DateTime<Utc>,
    db: DependencyStatus,
    redis: DependencyStatus,
    ai: DependencyStatus,
}

#[derive(Clone)]
pub struct ApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub app_env: AppEnv,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub frontend_url: Option<String>,
    pub redis_url: Option<String>,
    pub queue_enabled: bool,
    pub rate_limits_enabled: bool,
    pub ai_service_url: Option<String>,
    pub xai: XaiSettings,
    pub storage: StorageSettings,
}

impl ApiConfig {
    /// Effective configuration with secrets reduced to whether they are set.
    pub fn summary(&self) -> Value {
        json!({
            "addr": self.addr.to_string(),
            "appEnv": self.app_env.as_str(),
            "accessTtlSeconds": self.access_ttl.as_secs(),
            "refreshTtlSeconds": self.refresh_ttl.as_secs(),
            "frontendUrl": self.frontend_url,
            "cache": if self.redis_url.is_some() { "redis" } else { "memory" },
            "queueEnabled": self.queue_enabled,
            "rateLimitsEnabled": self.rate_limits_enabled,
            "aiServiceUrl": self.ai_service_url.as_deref().unwrap_or(DEFAULT_AI_SERVICE_URL),
            "xaiConfigured": self.xai.api_key.is_some(),
            "xaiProxy": self.xai.proxy_url.is_some(),
            "publicUrl": self.storage.public_url,
            "uploadDir": self.storage.upload_dir.display().to_string(),
            "storage": if self.storage.s3.is_some() { "s3" } else { "local" },
        })
    }
}

pub fn load_config() -> Result<ApiConfig> {
    let addr = config::listen_addr_from_env("API_ADDR", "0.0.0.0:3000")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let app_env = AppEnv::from_env()?;
    let jwt_secret = config::required_env("JWT_SECRET")?;
    let jwt_refresh_secret = config::required_env("JWT_REFRESH_SECRET")?;
    let access_ttl = config::parse_duration(&config::env_or("JWT_EXPIRES_IN", "7d"))?;
    let refresh_ttl = config::parse_duration(&config::env_or("JWT_REFRESH_EXPIRES_IN", "30d"))?;
    Ok(ApiConfig {
        addr,
        database_url,
        app_env,
        jwt_secret,
        jwt_refresh_secret,
        access_ttl,
        refresh_ttl,
        frontend_url: config::optional_env("FRONTEND_URL"),
        redis_url: config::optional_env("REDIS_URL"),
        queue_enabled: config::bool_env("QUEUE_ENABLED", false),
        rate_limits_enabled: config::bool_env("RATE_LIMIT_ENABLED", true),
        ai_service_url: config::optional_env("AI_SERVICE_URL"),
        xai: XaiSettings::from_env(),
        storage: StorageSettings::from_env(),
    })
}

pub async fn run(config: ApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);
    MASK_SERVER_ERRORS.store(config.app_env.is_production(), Ordering::Relaxed);

    let pool = db::connect(&config.database_url).await?;
    let cache = Cache::from_url(config.redis_url.as_deref()).await?;
    let store = MediaStore::from_settings(config.storage.clone()).await?;
    let analysis = AnalysisClient::new(
        config
            .ai_service_url
            .as_deref()
            .unwrap_or(DEFAULT_AI_SERVICE_URL),
    )?;
    let xai = ai::XaiClient::new(config.xai.clone())?;
    let cors = http::cors_layer(
        config.frontend_url.as_deref(),
        config.app_env.is_production(),
    )?;

    let state = AppState {
        pool: pool.clone(),
        tokens: Arc::new(TokenSigner {
            access: JwtConfig::new(config.jwt_secret.clone(), config.access_ttl.as_secs()),
            refresh: JwtConfig::new(
                config.jwt_refresh_secret.clone(),
                config.refresh_ttl.as_secs(),
            ),
        }),
        cache: Arc::new(cache),
        store: Arc::new(store),
        rate_limiter: Arc::new(RateLimiter::new()),
        rate_limits_enabled: config.rate_limits_enabled,
        gateway: gateway::Gateway::new(),
        analysis,
        ai_service_configured: config.ai_service_url.is_some(),
        xai,
        app_env: config.app_env,
        queue_enabled: config.queue_enabled,
    };
    tracing::info!(
        env = config.app_env.as_str(),
        queue_enabled = config.queue_enabled,
        cache = state.cache.backend_name(),
        storage = state.store.backend_name(),
        "api configured"
    );

    let relay = state.gateway.clone();
    let _relay_task = realtime::spawn_listener(pool, move |event| {
        relay.emit_to_user(&event.user_id, &event.event, event.data);
    });

    let router = build_router(state);
    let router = http::apply_layers(
        router,
        SERVICE_NAME,
        http::LayerOptions {
            body_limit_bytes: MAX_REQUEST_BYTES,
            timeout: REQUEST_TIMEOUT,
            cors,
        },
    );
    server::serve(config.addr, router).await
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/api", get(api_root))
        .route("/api/health", get(api_health))
        .route("/api/docs/openapi.json", get(openapi_json))
        .route("/api/ws", get(gateway::ws_handler))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/change-password", post(auth::change_password))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/users/me", get(users::get_me).patch(users::update_me))
        .route(
            "/api/users/me/notification-settings",
            patch(users::update_notification_settings),
        )
        .route("/api/users/me/blocked", get(users::list_blocked))
        .route("/api/users/suggestions", get(users::suggestions))
        .route("/api/users/:id", get(users::get_profile))
        .route(
            "/api/users/:id/follow",
            post(users::follow).delete(users::unfollow),
        )
        .route("/api/users/:id/followers", get(users::followers))
        .route("/api/users/:id/following", get(users::following))
        .route("/api/users/:id/online", get(users::online))
        .route(
            "/api/users/:id/block",
            post(users::block).delete(users::unblock),
        )
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route("/api/posts/feed", get(posts::feed))
        .route("/api/posts/saved", get(posts::saved))
        .route("/api/posts/user/:user_id", get(posts::user_posts))
        .route(
            "/api/posts/:id",
            get(posts::get_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/api/posts/:id/like", post(posts::toggle_like))
        .route(
            "/api/posts/:id/save",
            post(posts::save_post).delete(posts::unsave_post),
        )
        .route(
            "/api/posts/:id/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route(
            "/api/comments/:id",
            patch(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/api/albums", post(albums::create_album))
        .route("/api/albums/my", get(albums::my_albums))
        .route("/api/albums/user/:user_id", get(albums::user_albums))
        .route(
            "/api/albums/:id",
            get(albums::get_album)
                .patch(albums::update_album)
                .delete(albums::delete_album),
        )
        .route(
            "/api/albums/:id/items",
            get(albums::list_items).post(albums::add_item).layer(upload::body_limit()),
        )
        .route(
            "/api/albums/:id/items/:item_id",
            delete(albums::remove_item),
        )
        .route(
            "/api/albums/:id/members",
            get(albums::list_members).post(albums::add_member),
        )
        .route(
            "/api/albums/:id/members/:user_id",
            delete(albums::remove_member),
        )
        .route(
            "/api/stories",
            get(stories::feed_stories).post(stories::create_story),
        )
        .route("/api/stories/me", get(stories::my_stories))
        .route("/api/stories/:id", delete(stories::delete_story))
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/conversations", get(messages::conversations))
        .route("/api/messages/with/:user_id", get(messages::thread))
        .route("/api/messages/:id", delete(messages::delete_message))
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/:id/read", patch(notifications::mark_read))
        .route("/api/search/users", get(search::search_users))
        .route("/api/search/posts", get(search::search_posts))
        .route(
            "/api/reports",
            get(reports::list_reports).post(reports::create_report),
        )
        .route(
            "/api/upload",
            post(upload::upload_file).layer(upload::body_limit()),
        )
        .route("/api/uploads/:kind/:filename", get(upload::serve_file))
        .route("/api/ai/chat", post(ai::chat))
        .route("/api/ai/generate-image", post(ai::generate_image))
        .route("/api/ai/generate-video", post(ai::generate_video))
        .route("/api/ai/video/:request_id", get(ai::video_result))
        .route("/api/smart-album/upload", post(smart_album::create_job))
        .route("/api/smart-album/jobs/:job_id", get(smart_album::get_job))
        .route("/api/smart-album/items", get(smart_album::list_items))
        .route("/api/smart-album/items/:id", get(smart_album::get_item))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit,
        ))
        .with_state(state)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub(crate) fn client_ip(addr: Option<&ConnectInfo<SocketAddr>>) -> String {
    addr.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn global_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !request.uri().path().starts_with("/api") {
        return next.run(request).await;
    }
    let ip = client_ip(request.extensions().get::<ConnectInfo<SocketAddr>>());
    for rule in GLOBAL_RULES {
        if let Err(err) = auth::enforce_rate_limit(&state, rule, &ip).await {
            return err.into_response();
        }
    }
    next.run(request).await
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "unavailable".into(),
            }),
        ),
    }
}

async fn api_root() -> &'static str {
    "HeirLink API is running!"
}

async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = DependencyStatus::from(db::check_ready(&state.pool).await.is_ok());
    let redis = state.cache.ping().await;
    let ai = if state.ai_service_configured {
        state.analysis.ping().await
    } else {
        DependencyStatus::Skipped
    };
    let healthy = health::is_healthy(db_status, &[redis, ai]);
    Json(ApiHealth {
        status: if healthy { "ok" } else { "degraded" },
        timestamp: Utc::now(),
        db: db_status,
        redis,
        ai,
    })
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}

async fn openapi_json(headers: HeaderMap) -> impl IntoResponse {
    let server_url = openapi::infer_server_url(&headers);
    Json(openapi::document(server_url.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, HeaderMap, Value) {
        let response = err.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn error_envelope_carries_status_and_code() {
        let (status, _, body) = render(
            ApiError::not_found("Post not found").with_details(json!({"id": "p1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({
                "statusCode": 404,
                "error": "Not Found",
                "code": "NOT_FOUND",
                "message": "Post not found",
                "details": {"id": "p1"},
            })
        );
    }

    #[tokio::test]
    async fn error_headers_are_attached() {
        let (status, headers, body) = render(
            ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "rate limited")
                .with_header(axum::http::header::RETRY_AFTER, "7"),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers.get("retry-after").unwrap(), "7");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn media_errors_are_validation_failures() {
        let (status, _, body) = render(MediaError::ContentMismatch.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["message"], "File content does not match declared type");
    }

    #[test]
    fn client_ip_falls_back_without_connect_info() {
        assert_eq!(client_ip(None), "unknown");
        let info = ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5000)));
        assert_eq!(client_ip(Some(&info)), "10.0.0.7");
    }
}
