//! Authenticated proxy to the xAI chat, image and video APIs.

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use hl_core::config::optional_env;
use hl_core::metrics::{self, RESULT_ERROR, RESULT_SUCCESS};
use hl_core::rate_limit::RateLimitRule;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::{enforce_rate_limit, require_auth};
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

pub(crate) const XAI_BASE_URL: &str = "https://api.x.ai/v1";
const CHAT_PATH: &str = "/chat/completions";
const IMAGES_PATH: &str = "/images/generations";
const VIDEOS_PATH: &str = "/videos/generations";
const VIDEO_EDITS_PATH: &str = "/videos/edits";
const VIDEO_RESULT_PATH: &str = "/videos";

pub(crate) const DEFAULT_CHAT_MODEL: &str = "grok-4-latest";
pub(crate) const DEFAULT_IMAGE_MODEL: &str = "grok-imagine-image";
pub(crate) const DEFAULT_VIDEO_MODEL: &str = "grok-imagine-video";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_RESPONSE_FORMAT: &str = "url";

const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const IMAGE_EDIT_TIMEOUT: Duration = Duration::from_secs(120);
const VIDEO_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_CHARS: usize = 200;
const STREAM_BUFFER: usize = 32;

const AI_RULE: RateLimitRule = RateLimitRule::per_minute("ai", 10);
const CHAT_ROLES: &[&str] = &["system", "user", "assistant"];
const NOT_CONFIGURED: &str = "AI service is not configured (XAI_API_KEY)";
const DONE_MARKER: &str = "[DONE]";

#[derive(Clone, Debug, Default)]
pub struct XaiSettings {
    pub api_key: Option<String>,
    pub proxy_url: Option<String>,
}

impl XaiSettings {
    pub fn from_env() -> Self {
        Self {
            api_key: optional_env("XAI_API_KEY"),
            proxy_url: optional_env("XAI_PROXY_URL")
                .or_else(|| optional_env("HTTPS_PROXY"))
                .or_else(|| optional_env("HTTP_PROXY")),
        }
    }
}

#[derive(Clone)]
pub(crate) struct XaiClient {
    http: reqwest::Client,
    direct: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl XaiClient {
    /// `proxy_url` accepts http, https, socks5 and socks5h schemes.
    pub(crate) fn new(settings: XaiSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(proxy_url) = &settings.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
            tracing::info!("xai requests go through the configured proxy");
        }
        let direct = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self {
            http: builder.build()?,
            direct,
            api_key: settings.api_key,
            base_url: XAI_BASE_URL.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> ApiResult<RequestBuilder> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::bad_request(NOT_CONFIGURED))?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(api_key))
    }

    /// Inlines a remote image as a data URI, falling back to the URL when it cannot be fetched.
    async fn image_data_uri(&self, url: &str) -> String {
        if url.starts_with("data:") {
            return url.to_string();
        }
        match self.fetch_data_uri(url).await {
            Ok(data_uri) => data_uri,
            Err(err) => {
                tracing::warn!(error = %err, %url, "failed to inline image, passing url through");
                url.to_string()
            }
        }
    }

    async fn fetch_data_uri(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self
            .direct
            .get(url)
            .timeout(IMAGE_FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?;
        Ok(format!("data:{content_type};base64,{}", STANDARD.encode(&bytes)))
    }
}

fn body_prefix(text: &str) -> String {
    text.chars().take(ERROR_BODY_CHARS).collect()
}

fn status_label(status: Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn upstream_error(context: &str, status: Option<StatusCode>, text: &str) -> ApiError {
    ApiError::bad_request(format!(
        "xAI {context} error: {} - {}",
        status_label(status),
        body_prefix(text)
    ))
}

pub(crate) fn chat_error(status: Option<StatusCode>, text: &str) -> ApiError {
    let reason = status
        .and_then(|status| status.canonical_reason())
        .unwrap_or_default();
    ApiError::bad_request(format!(
        "xAI API error: {} {reason} - {}",
        status_label(status),
        body_prefix(text)
    ))
}

/// Sends `request` and decodes a JSON body, mapping failures with `on_error`.
async fn send_json(
    request: RequestBuilder,
    on_error: impl Fn(Option<StatusCode>, &str) -> ApiError,
) -> ApiResult<Value> {
    let response = request
        .send()
        .await
        .map_err(|err| on_error(None, &err.to_string()))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| on_error(Some(status), &err.to_string()))?;
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), body = %body_prefix(&text), "xai request failed");
        return Err(on_error(Some(status), &text));
    }
    serde_json::from_str(&text).map_err(|err| on_error(Some(status), &err.to_string()))
}

fn record(operation: &str, result: &ApiResult<Value>) {
    let label = if result.is_ok() {
        RESULT_SUCCESS
    } else {
        RESULT_ERROR
    };
    metrics::inc_ai_request(operation, label);
}

async fn guard(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let auth = require_auth(state, headers)?;
    enforce_rate_limit(state, AI_RULE, &auth.user_id).await
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ChatMessage {
    role: String,
    content: Value,
}

#[derive(Deserialize)]
pub(crate) struct ChatRequest {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    stream: bool,
}

fn chat_body(payload: &ChatRequest, stream: bool) -> ApiResult<Value> {
    if payload.messages.is_empty() {
        return Err(ApiError::bad_request("messages array is required"));
    }
    for message in &payload.messages {
        validation::one_of("role", &message.role, CHAT_ROLES)?;
        if !(message.content.is_string() || message.content.is_array()) {
            return Err(ApiError::validation(
                "content must be a string or an array of parts",
            ));
        }
    }
    Ok(json!({
        "messages": payload.messages,
        "model": payload.model.as_deref().unwrap_or(DEFAULT_CHAT_MODEL),
        "stream": stream,
        "temperature": payload.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    }))
}

pub(crate) async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<ChatRequest>,
) -> ApiResult<Response> {
    guard(&state, &headers).await?;
    let request = state.xai.request(reqwest::Method::POST, CHAT_PATH)?;
    let body = chat_body(&payload, payload.stream)?;
    let request = request.json(&body);

    if payload.stream {
        return Ok(stream_chat(request));
    }
    let result = send_json(request, chat_error).await;
    record("chat", &result);
    Ok(Json(result?).into_response())
}

fn stream_chat(request: RequestBuilder) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(STREAM_BUFFER);
    tokio::spawn(relay_chat_stream(request, tx));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(ReceiverStream::new(rx)),
    )
        .into_response()
}

fn content_event(content: &str) -> Event {
    Event::default().data(json!({ "content": content }).to_string())
}

fn error_event(message: &str) -> Event {
    Event::default().data(json!({ "error": message }).to_string())
}

/// Forwards upstream deltas as `{"content"}` events and always finishes with `[DONE]`.
async fn relay_chat_stream(request: RequestBuilder, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let outcome = forward_deltas(request, &tx).await;
    let result = match &outcome {
        Ok(()) => RESULT_SUCCESS,
        Err(_) => RESULT_ERROR,
    };
    metrics::inc_ai_request("chat_stream", result);
    if let Err(message) = outcome {
        tracing::warn!(error = %message, "chat stream failed");
        let _ = tx.send(Ok(error_event(&message))).await;
    }
    let _ = tx.send(Ok(Event::default().data(DONE_MARKER))).await;
}

async fn forward_deltas(
    request: RequestBuilder,
    tx: &mpsc::Sender<Result<Event, Infallible>>,
) -> Result<(), String> {
    let response = request
        .send()
        .await
        .map_err(|err| format!("xAI error: unknown - {}", body_prefix(&err.to_string())))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(format!(
            "xAI error: {} - {}",
            status.as_u16(),
            body_prefix(&text)
        ));
    }

    let mut parser = ChatStreamParser::default();
    let mut chunks = std::pin::pin!(response.bytes_stream());
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        for delta in parser.push(&chunk) {
            if tx.send(Ok(content_event(&delta))).await.is_err() {
                // client went away
                return Ok(());
            }
        }
    }
    if let Some(delta) = parser.finish() {
        let _ = tx.send(Ok(content_event(&delta))).await;
    }
    Ok(())
}

/// Splits an upstream SSE byte stream into lines and extracts `choices[0].delta.content`.
#[derive(Debug, Default)]
pub(crate) struct ChatStreamParser {
    buffer: Vec<u8>,
}

impl ChatStreamParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(delta) = content_delta(&String::from_utf8_lossy(&line)) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Parses whatever remains after the stream ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        content_delta(&String::from_utf8_lossy(&rest))
    }
}

pub(crate) fn content_delta(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data: ")?;
    if payload == DONE_MARKER {
        return None;
    }
    let value: Value = serde_json::from_str(payload).ok()?;
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
pub(crate) struct GenerateImageRequest {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    n: Option<i64>,
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    response_format: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct GeneratedImage {
    url: String,
}

fn image_body(payload: &GenerateImageRequest, image_data_uri: Option<String>) -> ApiResult<Value> {
    validation::require_non_blank("prompt", &payload.prompt)?;
    let n = payload.n.unwrap_or(1);
    if !(1..=4).contains(&n) {
        return Err(ApiError::validation("n must be between 1 and 4"));
    }
    let mut body = Map::new();
    body.insert("prompt".into(), json!(payload.prompt));
    body.insert(
        "model".into(),
        json!(payload.model.as_deref().unwrap_or(DEFAULT_IMAGE_MODEL)),
    );
    body.insert("n".into(), json!(n));
    if let Some(aspect_ratio) = &payload.aspect_ratio {
        body.insert("aspect_ratio".into(), json!(aspect_ratio));
    }
    match image_data_uri {
        Some(image_url) => {
            body.insert("image_url".into(), json!(image_url));
        }
        None => {
            body.insert(
                "response_format".into(),
                json!(payload
                    .response_format
                    .as_deref()
                    .unwrap_or(DEFAULT_RESPONSE_FORMAT)),
            );
        }
    }
    Ok(Value::Object(body))
}

/// Maps `data[]` entries to their `url`, or `b64_json` when no url is given.
pub(crate) fn generated_images(response: &Value) -> Vec<GeneratedImage> {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("url")
                        .and_then(Value::as_str)
                        .or_else(|| entry.get("b64_json").and_then(Value::as_str))
                })
                .map(|url| GeneratedImage {
                    url: url.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) async fn generate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<GenerateImageRequest>,
) -> ApiResult<Json<Value>> {
    guard(&state, &headers).await?;
    let request = state.xai.request(reqwest::Method::POST, IMAGES_PATH)?;
    let source = validation::non_blank(payload.image_url.clone());
    let (context, operation) = if source.is_some() {
        ("Image edit", "image_edit")
    } else {
        ("Image generation", "image")
    };
    // validate before spending time on the download
    image_body(&payload, None)?;
    let data_uri = match &source {
        Some(url) => Some(state.xai.image_data_uri(url).await),
        None => None,
    };
    let body = image_body(&payload, data_uri)?;
    let mut request = request.json(&body);
    if source.is_some() {
        request = request.timeout(IMAGE_EDIT_TIMEOUT);
    }

    let result = send_json(request, |status, text| upstream_error(context, status, text)).await;
    record(operation, &result);
    Ok(Json(json!({ "images": generated_images(&result?) })))
}

#[derive(Deserialize)]
pub(crate) struct GenerateVideoRequest {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
}

fn video_body(payload: &GenerateVideoRequest, image_data_uri: Option<String>) -> ApiResult<Value> {
    validation::require_non_blank("prompt", &payload.prompt)?;
    if let Some(duration) = payload.duration {
        if !(2..=10).contains(&duration) {
            return Err(ApiError::validation("duration must be between 2 and 10"));
        }
    }
    let mut body = Map::new();
    body.insert("prompt".into(), json!(payload.prompt));
    body.insert(
        "model".into(),
        json!(payload.model.as_deref().unwrap_or(DEFAULT_VIDEO_MODEL)),
    );
    if let Some(image_url) = image_data_uri {
        body.insert("image_url".into(), json!(image_url));
    }
    let optional = [
        ("video_url", payload.video_url.as_ref().map(|value| json!(value))),
        ("duration", payload.duration.map(|value| json!(value))),
        ("aspect_ratio", payload.aspect_ratio.as_ref().map(|value| json!(value))),
        ("resolution", payload.resolution.as_ref().map(|value| json!(value))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            body.insert(key.into(), value);
        }
    }
    Ok(Value::Object(body))
}

pub(crate) async fn generate_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<GenerateVideoRequest>,
) -> ApiResult<Json<Value>> {
    guard(&state, &headers).await?;
    let path = if payload.video_url.is_some() {
        VIDEO_EDITS_PATH
    } else {
        VIDEOS_PATH
    };
    let request = state.xai.request(reqwest::Method::POST, path)?;
    video_body(&payload, None)?;
    let data_uri = match validation::non_blank(payload.image_url.clone()) {
        Some(url) => Some(state.xai.image_data_uri(&url).await),
        None => None,
    };
    let body = video_body(&payload, data_uri)?;
    let request = request.json(&body).timeout(VIDEO_TIMEOUT);

    let result = send_json(request, |status, text| {
        upstream_error("Video generation", status, text)
    })
    .await;
    record("video", &result);
    let response = result?;
    Ok(Json(json!({
        "request_id": response.get("request_id").cloned().unwrap_or(Value::Null),
    })))
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct VideoResult {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

/// Reads either `{video: {url, duration}}` or a top-level `{status, url}` shape.
pub(crate) fn video_result_from(response: &Value) -> VideoResult {
    if let Some(url) = response.pointer("/video/url").and_then(Value::as_str) {
        return VideoResult {
            status: "completed".into(),
            url: Some(url.to_string()),
            duration: response.pointer("/video/duration").cloned(),
            error: None,
        };
    }
    let status = response.get("status").and_then(Value::as_str);
    let top_level_url = response.get("url").and_then(Value::as_str);
    if let (Some("completed"), Some(url)) = (status, top_level_url) {
        return VideoResult {
            status: "completed".into(),
            url: Some(url.to_string()),
            duration: response.get("duration").cloned(),
            error: None,
        };
    }
    VideoResult {
        status: status.unwrap_or("pending").to_string(),
        url: None,
        duration: None,
        error: response.get("error").cloned().filter(|error| !error.is_null()),
    }
}

pub(crate) async fn video_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<VideoResult>> {
    guard(&state, &headers).await?;
    let request = state.xai.request(
        reqwest::Method::GET,
        &format!("{VIDEO_RESULT_PATH}/{request_id}"),
    )?;
    let result = send_json(request, |status, text| {
        upstream_error("Video result", status, text)
    })
    .await;
    record("video_result", &result);
    Ok(Json(video_result_from(&result?)))
}
