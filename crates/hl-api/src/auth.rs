use axum::extract::{ConnectInfo, State};
use axum::http::header::{AUTHORIZATION, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hl_core::metrics;
use hl_core::password;
use hl_core::rate_limit::RateLimitRule;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::Row;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::validation::{self, non_blank};
use crate::{is_unique_violation, ApiError, ApiResult, AppState, JsonBody, SERVICE_NAME};

const AUTHENTICATE_BEARER_CHALLENGE: &str = r#"Bearer realm="heirlink-api""#;

const REGISTER_RULE: RateLimitRule = RateLimitRule::per_minute("auth-register", 5);
const LOGIN_RULE: RateLimitRule = RateLimitRule::per_minute("auth-login", 5);
const REFRESH_RULE: RateLimitRule = RateLimitRule::per_minute("auth-refresh", 10);
const FORGOT_RULE: RateLimitRule = RateLimitRule::per_minute("auth-forgot", 3);
const RESET_RULE: RateLimitRule = RateLimitRule::per_minute("auth-reset", 5);

const RESET_CODE_TTL: Duration = Duration::from_secs(15 * 60);
const REFRESH_BLACKLIST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const PASSWORD_MIN: usize = 8;
const REGISTER_PASSWORD_MAX: usize = 100;
const NEW_PASSWORD_MAX: usize = 128;

const FORGOT_PASSWORD_MESSAGE: &str = "If the email exists, a reset code has been sent";

#[derive(Clone, Debug)]
pub(crate) struct AuthContext {
    pub user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest {
    email: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
pub(crate) struct ForgotPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetPasswordRequest {
    email: String,
    code: String,
    new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogoutRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetEntry {
    code: String,
    user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountView {
    id: String,
    email: String,
    username: String,
    avatar_url: Option<String>,
    bio: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    access_token: String,
    refresh_token: String,
    user: AccountView,
}

pub(crate) async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    enforce_rate_limit(&state, REGISTER_RULE, &addr.ip().to_string()).await?;

    let email = payload.email.trim().to_string();
    let username = payload.username.trim().to_string();
    validation::validate_email(&email)?;
    validation::validate_username(&username)?;
    validation::require_length(
        "password",
        &payload.password,
        PASSWORD_MIN,
        REGISTER_PASSWORD_MAX,
    )?;

    let existing = sqlx::query_scalar::<_, String>(
        "SELECT id FROM users WHERE email = $1 OR username = $2 LIMIT 1",
    )
    .bind(&email)
    .bind(&username)
    .fetch_optional(&state.pool)
    .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "User with this email or username already exists",
        ));
    }

    let password_hash = password::hash_password_blocking(payload.password).await?;
    let user_id = Uuid::new_v4().to_string();
    let inserted = sqlx::query(
        "INSERT INTO users (id, email, username, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(&user_id)
    .bind(&email)
    .bind(&username)
    .bind(&password_hash)
    .execute(&state.pool)
    .await;
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(ApiError::conflict(
                "User with this email or username already exists",
            ));
        }
        Err(err) => return Err(err.into()),
    }

    metrics::inc_auth_success(SERVICE_NAME, "register");
    tracing::info!(%user_id, "user registered");
    let response = issue_session(&state, &user_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    enforce_rate_limit(&state, LOGIN_RULE, &addr.ip().to_string()).await?;
    validation::validate_email(payload.email.trim())?;
    validation::require_non_blank("password", &payload.password)?;

    let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(payload.email.trim())
        .fetch_optional(&state.pool)
        .await?;
    let Some(row) = row else {
        metrics::inc_auth_failure(SERVICE_NAME, "login");
        return Err(invalid_credentials());
    };
    let user_id: String = row.try_get("id")?;
    let stored_hash: String = row.try_get("password_hash")?;
    if !password::verify_password_blocking(payload.password, stored_hash).await? {
        metrics::inc_auth_failure(SERVICE_NAME, "login");
        return Err(invalid_credentials());
    }

    metrics::inc_auth_success(SERVICE_NAME, "login");
    Ok(Json(issue_session(&state, &user_id).await?))
}

pub(crate) async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    enforce_rate_limit(&state, REFRESH_RULE, &addr.ip().to_string()).await?;
    let token = payload.refresh_token.trim();
    validation::require_non_blank("refreshToken", token)?;

    if state
        .cache
        .get::<bool>(&blacklist_key(token))
        .await
        .unwrap_or(false)
    {
        metrics::inc_auth_failure(SERVICE_NAME, "refresh");
        return Err(unauthorized("Token has been revoked"));
    }
    let claims = state.tokens.verify_refresh(token).map_err(|_| {
        metrics::inc_auth_failure(SERVICE_NAME, "refresh");
        unauthorized("Invalid refresh token")
    })?;
    let exists = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE id = $1")
        .bind(&claims.sub)
        .fetch_optional(&state.pool)
        .await?;
    if exists.is_none() {
        return Err(unauthorized("User not found"));
    }

    state
        .cache
        .set(&blacklist_key(token), &true, REFRESH_BLACKLIST_TTL)
        .await;
    metrics::inc_auth_success(SERVICE_NAME, "refresh");
    Ok(Json(issue_session(&state, &claims.sub).await?))
}

pub(crate) async fn forgot_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> ApiResult<Json<Value>> {
    enforce_rate_limit(&state, FORGOT_RULE, &addr.ip().to_string()).await?;
    let email = payload.email.trim();
    validation::validate_email(email)?;

    let user_id = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(&state.pool)
        .await?;
    if let Some(user_id) = user_id {
        let code = password::generate_reset_code();
        state
            .cache
            .set(
                &reset_key(email),
                &ResetEntry {
                    code: code.clone(),
                    user_id,
                },
                RESET_CODE_TTL,
            )
            .await;
        if state.app_env.is_production() {
            tracing::info!("password reset code issued");
        } else {
            tracing::info!(%email, %code, "password reset code issued");
        }
    }
    Ok(Json(json!({ "message": FORGOT_PASSWORD_MESSAGE })))
}

pub(crate) async fn reset_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    enforce_rate_limit(&state, RESET_RULE, &addr.ip().to_string()).await?;
    let email = payload.email.trim();
    validation::validate_email(email)?;
    validation::require_length("code", &payload.code, 6, 6)?;
    validation::require_length(
        "newPassword",
        &payload.new_password,
        PASSWORD_MIN,
        NEW_PASSWORD_MAX,
    )?;

    let entry = state.cache.get::<ResetEntry>(&reset_key(email)).await;
    let Some(entry) = entry.filter(|entry| entry.code == payload.code) else {
        metrics::inc_auth_failure(SERVICE_NAME, "reset");
        return Err(unauthorized("Invalid or expired reset code"));
    };

    let password_hash = password::hash_password_blocking(payload.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(&entry.user_id)
        .execute(&state.pool)
        .await?;
    state.cache.del(&reset_key(email)).await;
    metrics::inc_auth_success(SERVICE_NAME, "reset");
    Ok(Json(json!({ "message": "Password reset successfully" })))
}

pub(crate) async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let auth = require_auth(&state, &headers)?;
    validation::require_non_blank("currentPassword", &payload.current_password)?;
    validation::require_length(
        "newPassword",
        &payload.new_password,
        PASSWORD_MIN,
        NEW_PASSWORD_MAX,
    )?;

    let stored_hash =
        sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
            .bind(&auth.user_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| unauthorized("User not found"))?;
    if !password::verify_password_blocking(payload.current_password, stored_hash).await? {
        return Err(unauthorized("Current password is incorrect"));
    }

    let password_hash = password::hash_password_blocking(payload.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(&auth.user_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<JsonBody<LogoutRequest>>,
) -> ApiResult<Json<Value>> {
    require_auth(&state, &headers)?;
    let payload = payload.map(|JsonBody(payload)| payload).unwrap_or_default();
    if let Some(token) = non_blank(payload.refresh_token) {
        state
            .cache
            .set(&blacklist_key(&token), &true, REFRESH_BLACKLIST_TTL)
            .await;
    }
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

pub(crate) async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<AccountView>> {
    let auth = require_auth(&state, &headers)?;
    let account = load_account(&state, &auth.user_id)
        .await?
        .ok_or_else(|| unauthorized("User not found"))?;
    Ok(Json(account))
}

async fn load_account(state: &AppState, user_id: &str) -> ApiResult<Option<AccountView>> {
    let row = sqlx::query("SELECT id, email, username, avatar_url, bio FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(AccountView {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        avatar_url: row.try_get("avatar_url")?,
        bio: row.try_get("bio")?,
    }))
}

async fn issue_session(state: &AppState, user_id: &str) -> ApiResult<AuthResponse> {
    let account = load_account(state, user_id)
        .await?
        .ok_or_else(|| unauthorized("User not found"))?;
    let pair = state.tokens.issue_pair(user_id)?;
    Ok(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: account,
    })
}

fn blacklist_key(token: &str) -> String {
    format!("bl:rt:{token}")
}

fn reset_key(email: &str) -> String {
    format!("reset:{email}")
}

fn invalid_credentials() -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "INVALID_CREDENTIALS",
        "Invalid credentials",
    )
}

fn unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub(crate) fn require_auth(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthContext> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| auth_required_error("missing token"))?;
    if !header.starts_with("Bearer ") {
        return Err(auth_required_error("invalid token"));
    }
    let token = bearer_token(headers).ok_or_else(|| auth_required_error("invalid token"))?;
    let claims = state
        .tokens
        .verify_access(token)
        .map_err(|err| auth_required_error(err.to_string()))?;
    Ok(AuthContext {
        user_id: claims.sub,
    })
}

/// Ignores missing or invalid tokens.
pub(crate) fn optional_auth(state: &AppState, headers: &HeaderMap) -> Option<AuthContext> {
    let token = bearer_token(headers)?;
    state
        .tokens
        .verify_access(token)
        .ok()
        .map(|claims| AuthContext {
            user_id: claims.sub,
        })
}

pub(crate) fn auth_required_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", message)
        .with_header(WWW_AUTHENTICATE, AUTHENTICATE_BEARER_CHALLENGE)
}

pub(crate) async fn enforce_rate_limit(
    state: &AppState,
    rule: RateLimitRule,
    subject: &str,
) -> ApiResult<()> {
    if !state.rate_limits_enabled {
        return Ok(());
    }
    let outcome = state.rate_limiter.check_rule(rule, subject).await;
    if !outcome.allowed {
        metrics::inc_rate_limited(SERVICE_NAME, rule.name);
        let retry_after = outcome
            .retry_after
            .map(|dur| dur.as_secs().max(1))
            .unwrap_or(rule.window.as_secs().max(1));
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests",
        )
        .with_header(RETRY_AFTER, retry_after.to_string()));
    }
    Ok(())
}
