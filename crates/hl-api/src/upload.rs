use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hl_core::media::{self, MediaError, UploadKind};
use hl_core::metrics;
use hl_core::storage::StoredObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::auth::require_auth;
use crate::{ApiError, ApiResult, AppState, MAX_REQUEST_BYTES};

const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=2592000, immutable";

/// Multipart routes accept bodies up to the video limit plus form overhead.
pub(crate) fn body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(MAX_REQUEST_BYTES)
}

#[derive(Debug)]
pub(crate) struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The `file` part of a multipart form plus its text fields.
#[derive(Debug, Default)]
pub(crate) struct MultipartForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn take_file(&mut self) -> ApiResult<UploadedFile> {
        self.file
            .take()
            .filter(|file| !file.bytes.is_empty())
            .ok_or_else(|| ApiError::bad_request("No file provided"))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::bad_request(err.body_text())
}

pub(crate) async fn read_multipart(mut multipart: Multipart) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().map(str::to_string);
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            form.file = Some(UploadedFile {
                filename,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Validates, downscales large images and stores the file under `kind`.
pub(crate) async fn store_file(
    state: &AppState,
    kind: UploadKind,
    file: UploadedFile,
) -> ApiResult<StoredObject> {
    media::validate_file(&file.content_type, file.bytes.len(), kind, Some(&file.bytes))?;
    let content = if media::is_video_mime(&file.content_type) {
        file.bytes
    } else {
        media::resize_blocking(file.content_type.clone(), file.bytes).await?
    };
    let ext = media::choose_extension(file.filename.as_deref(), &file.content_type);
    let stored = state
        .store
        .save(kind, &ext, &file.content_type, content)
        .await?;
    metrics::inc_uploads(kind.as_str());
    tracing::info!(
        kind = kind.as_str(),
        path = %stored.relative_path,
        backend = state.store.backend_name(),
        "file stored"
    );
    Ok(stored)
}

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    url: String,
    relative_path: String,
    mimetype: String,
}

pub(crate) fn parse_kind(value: Option<&str>) -> Result<UploadKind, MediaError> {
    UploadKind::from_str(value.unwrap_or(UploadKind::Posts.as_str()))
}

pub(crate) async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    require_auth(&state, &headers)?;
    let kind = parse_kind(query.kind.as_deref())?;
    let mut form = read_multipart(multipart).await?;
    let file = form.take_file()?;
    let mimetype = file.content_type.clone();
    let stored = store_file(&state, kind, file).await?;
    Ok(Json(UploadResponse {
        url: stored.url,
        relative_path: stored.relative_path,
        mimetype,
    }))
}

pub(crate) async fn serve_file(
    State(state): State<AppState>,
    Path((kind, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let kind = UploadKind::from_str(&kind).map_err(|_| ApiError::bad_request("Invalid type"))?;
    let Some(content) = state.store.read_local(kind, &filename).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let mut response = Response::new(Body::from(content));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media::content_type_from_ext(&filename)),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
    );
    Ok(response)
}
