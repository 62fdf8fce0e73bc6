use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use hl_core::pagination::PageQuery;
use hl_core::views::UserSummary;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::auth::require_auth;
use crate::validation;
use crate::{is_unique_violation, ApiError, ApiResult, AppState, JsonBody};

const DEFAULT_LIMIT: i64 = 20;
const TARGET_TYPES: &[&str] = &["post", "album_item", "user", "comment"];
const REASON_MIN: usize = 3;
const REASON_MAX: usize = 500;
const DUPLICATE_REPORT: &str = "You have already reported this content";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReportView {
    id: String,
    reporter_id: String,
    target_type: String,
    target_id: String,
    reason: String,
    status: String,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reporter: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReportList {
    items: Vec<ReportView>,
    total: i64,
    page: i64,
    limit: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateReportRequest {
    target_type: String,
    target_id: String,
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReportsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

fn validate_report(payload: &CreateReportRequest) -> ApiResult<()> {
    validation::one_of("targetType", &payload.target_type, TARGET_TYPES)?;
    validation::require_non_blank("targetId", &payload.target_id)?;
    validation::require_length("reason", payload.reason.trim(), REASON_MIN, REASON_MAX)
}

pub(crate) async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<CreateReportRequest>,
) -> ApiResult<(StatusCode, Json<ReportView>)> {
    let auth = require_auth(&state, &headers)?;
    validate_report(&payload)?;

    let result = sqlx::query(
        "INSERT INTO reports (id, reporter_id, target_type, target_id, reason) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, reporter_id, target_type, target_id, reason, status, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&auth.user_id)
    .bind(&payload.target_type)
    .bind(payload.target_id.trim())
    .bind(payload.reason.trim())
    .fetch_one(&state.pool)
    .await;
    let row = match result {
        Ok(row) => row,
        Err(err) if is_unique_violation(&err) => return Err(ApiError::conflict(DUPLICATE_REPORT)),
        Err(err) => return Err(err.into()),
    };
    tracing::info!(
        reporter_id = %auth.user_id,
        target_type = %payload.target_type,
        "report filed"
    );
    Ok((
        StatusCode::CREATED,
        Json(ReportView {
            id: row.try_get("id")?,
            reporter_id: row.try_get("reporter_id")?,
            target_type: row.try_get("target_type")?,
            target_id: row.try_get("target_id")?,
            reason: row.try_get("reason")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            reporter: None,
        }),
    ))
}

pub(crate) async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Json<ReportList>> {
    require_auth(&state, &headers)?;
    let params = PageQuery {
        page: query.page.clone(),
        limit: query.limit.clone(),
        cursor: None,
    }
    .resolve(DEFAULT_LIMIT);
    let status = validation::non_blank(query.status);

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT r.id, r.reporter_id, r.target_type, r.target_id, r.reason, r.status, r.created_at, \
         u.id AS reporter_user_id, u.username AS reporter_user_username, \
         u.avatar_url AS reporter_user_avatar_url \
         FROM reports r JOIN users u ON u.id = r.reporter_id",
    );
    if let Some(status) = &status {
        builder.push(" WHERE r.status = ").push_bind(status.clone());
    }
    builder
        .push(" ORDER BY r.created_at DESC, r.id DESC LIMIT ")
        .push_bind(params.limit)
        .push(" OFFSET ")
        .push_bind(params.offset());
    let rows = builder.build().fetch_all(&state.pool).await?;
    let items = rows
        .iter()
        .map(|row| -> Result<_, sqlx::Error> {
            Ok(ReportView {
                id: row.try_get("id")?,
                reporter_id: row.try_get("reporter_id")?,
                target_type: row.try_get("target_type")?,
                target_id: row.try_get("target_id")?,
                reason: row.try_get("reason")?,
                status: row.try_get("status")?,
                created_at: row.try_get("created_at")?,
                reporter: Some(UserSummary::from_row(row, "reporter_user_")?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reports");
    if let Some(status) = status {
        count.push(" WHERE status = ").push_bind(status);
    }
    let total = count
        .build_query_scalar::<i64>()
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(ReportList {
        items,
        total,
        page: params.page,
        limit: params.limit,
    }))
}
