use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::pagination::{Page, PageQuery, Pagination};
use hl_core::queue::{self, JobOptions, JOB_PROCESS_SMART_ALBUM, QUEUE_SMART_ALBUM};
use hl_core::smart_album::{
    self as analysis, SmartAlbumPayload, DEFAULT_JOB_TYPE, STATUS_PENDING, STATUS_PROCESSING,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::auth::require_auth;
use crate::validation;
use crate::{ApiError, ApiResult, AppState, JsonBody};

const DEFAULT_LIMIT: i64 = 20;
const MEDIA_URL_MAX: usize = 2048;
const TYPE_MAX: usize = 50;
const JOB_CREATED_MESSAGE: &str = "Job created. Poll GET /smart-album/jobs/:jobId for status.";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateJobRequest {
    media_url: String,
    #[serde(rename = "type", default)]
    job_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobCreated {
    job_id: String,
    status: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatusView {
    job_id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SmartAlbumItemView {
    id: String,
    user_id: String,
    original_media_id: String,
    ai_analysis: Value,
    life_moment_tags: Option<Value>,
    location_data: Option<Value>,
    created_at: DateTime<Utc>,
}

const ITEM_COLUMNS: &str = "SELECT id, user_id, original_media_id, ai_analysis, life_moment_tags, \
     location_data, created_at FROM smart_album_items";

fn item_from_row(row: &PgRow) -> Result<SmartAlbumItemView, sqlx::Error> {
    Ok(SmartAlbumItemView {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        original_media_id: row.try_get("original_media_id")?,
        ai_analysis: row.try_get("ai_analysis")?,
        life_moment_tags: row.try_get("life_moment_tags")?,
        location_data: row.try_get("location_data")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Returns the media url and the job type, defaulted.
fn validate_job(payload: &CreateJobRequest) -> ApiResult<(String, String)> {
    let media_url = payload.media_url.trim();
    validation::validate_url("mediaUrl", media_url)?;
    validation::max_length("mediaUrl", Some(media_url), MEDIA_URL_MAX)?;
    let job_type = validation::non_blank(payload.job_type.clone())
        .unwrap_or_else(|| DEFAULT_JOB_TYPE.to_string());
    validation::max_length("type", Some(&job_type), TYPE_MAX)?;
    Ok((media_url.to_string(), job_type))
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobCreated>)> {
    let auth = require_auth(&state, &headers)?;
    let (media_url, job_type) = validate_job(&payload)?;
    let job_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO smart_album_jobs (id, user_id, status, media_url, job_type) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&job_id)
    .bind(&auth.user_id)
    .bind(STATUS_PENDING)
    .bind(&media_url)
    .bind(&job_type)
    .execute(&state.pool)
    .await?;

    let job = SmartAlbumPayload {
        job_id: job_id.clone(),
        media_url,
        job_type: Some(job_type),
        user_id: auth.user_id.clone(),
    };
    if state.queue_enabled {
        let payload = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
        queue::enqueue(
            &state.pool,
            QUEUE_SMART_ALBUM,
            JOB_PROCESS_SMART_ALBUM,
            &payload,
            JobOptions::smart_album(),
        )
        .await?;
    } else {
        let pool = state.pool.clone();
        let client = state.analysis.clone();
        tokio::spawn(async move {
            if let Err(err) = analysis::process_job(&pool, &client, &job, true).await {
                tracing::warn!(error = %err, job_id = %job.job_id, "inline smart album job failed");
            }
        });
    }
    tracing::info!(%job_id, user_id = %auth.user_id, queued = state.queue_enabled, "smart album job created");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreated {
            job_id,
            status: STATUS_PENDING.to_string(),
            message: JOB_CREATED_MESSAGE,
        }),
    ))
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let auth = require_auth(&state, &headers)?;
    let row = sqlx::query(
        "SELECT id, user_id, status, ai_task_id, result_item_id, error_message, created_at \
         FROM smart_album_jobs WHERE id = $1",
    )
    .bind(&job_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Job not found"))?;
    let owner: String = row.try_get("user_id")?;
    if owner != auth.user_id {
        return Err(ApiError::forbidden("Access denied"));
    }

    let status: String = row.try_get("status")?;
    let task_id: Option<String> = row.try_get("ai_task_id")?;
    if status == STATUS_PROCESSING && task_id.is_some() {
        let pool = state.pool.clone();
        let client = state.analysis.clone();
        let polled = job_id.clone();
        tokio::spawn(async move {
            if let Err(err) = analysis::poll_task(&pool, &client, &polled).await {
                tracing::debug!(error = %err, job_id = %polled, "analysis task poll failed");
            }
        });
    }

    Ok(Json(JobStatusView {
        job_id: row.try_get("id")?,
        status,
        result_item_id: row.try_get("result_item_id")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    }))
}

pub(crate) async fn list_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<SmartAlbumItemView>>> {
    let auth = require_auth(&state, &headers)?;
    let params = PageQuery {
        cursor: None,
        ..query
    }
    .resolve(DEFAULT_LIMIT);
    let rows = sqlx::query(&format!(
        "{ITEM_COLUMNS} WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(&auth.user_id)
    .bind(params.limit)
    .bind(params.offset())
    .fetch_all(&state.pool)
    .await?;
    let items = rows
        .iter()
        .map(item_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM smart_album_items WHERE user_id = $1")
        .bind(&auth.user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(Page {
        items,
        pagination: Pagination::offset(&params, total),
    }))
}

pub(crate) async fn get_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> ApiResult<Json<SmartAlbumItemView>> {
    let auth = require_auth(&state, &headers)?;
    let row = sqlx::query(&format!("{ITEM_COLUMNS} WHERE id = $1"))
        .bind(&item_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;
    let item = item_from_row(&row)?;
    if item.user_id != auth.user_id {
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(Json(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(media_url: &str, job_type: Option<&str>) -> CreateJobRequest {
        CreateJobRequest {
            media_url: media_url.into(),
            job_type: job_type.map(str::to_string),
        }
    }

    #[test]
    fn job_type_defaults_to_analyze() {
        let (url, job_type) = validate_job(&request(" https://cdn.example.com/a.jpg ", None)).unwrap();
        assert_eq!(url, "https://cdn.example.com/a.jpg");
        assert_eq!(job_type, DEFAULT_JOB_TYPE);
        let (_, job_type) =
            validate_job(&request("https://cdn.example.com/a.jpg", Some("faces"))).unwrap();
        assert_eq!(job_type, "faces");
    }

    #[test]
    fn invalid_jobs_are_rejected() {
        assert!(validate_job(&request("not a url", None)).is_err());
        let long_url = format!("https://cdn.example.com/{}", "a".repeat(MEDIA_URL_MAX));
        assert!(validate_job(&request(&long_url, None)).is_err());
        let long_type = "t".repeat(TYPE_MAX + 1);
        assert!(validate_job(&request("https://cdn.example.com/a.jpg", Some(&long_type))).is_err());
    }

    #[test]
    fn job_status_omits_missing_fields() {
        let view = JobStatusView {
            job_id: "j1".into(),
            status: "pending".into(),
            result_item_id: None,
            error_message: None,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["jobId"], "j1");
        assert!(value.get("resultItemId").is_none());
        assert!(value.get("errorMessage").is_none());
    }
}
