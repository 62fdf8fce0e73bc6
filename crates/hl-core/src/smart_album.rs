use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use thiserror::Error;

use crate::health::{probe_endpoint, DependencyStatus};
use crate::queue::Job;

pub const DEFAULT_AI_SERVICE_URL: &str = "http://localhost:8000";
pub const DEFAULT_JOB_TYPE: &str = "analyze";

const ANALYZE_TIMEOUT: Duration = Duration::from_secs(60);
const TASK_STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_DONE: &str = "done";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Error)]
pub enum AiClientError {
    #[error("AI service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("AI service returned {0}")]
    Status(u16),
    #[error("invalid AI service url: {0}")]
    InvalidUrl(String),
    #[error("AI service returned neither an analysis nor a task")]
    Unresolved,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub analysis: Option<Value>,
}

impl AnalyzeResponse {
    pub fn completed_analysis(&self) -> Option<&Value> {
        match self.status.as_deref() {
            Some("completed") => self.analysis.as_ref(),
            _ => None,
        }
    }

    pub fn pending_task(&self) -> Option<&str> {
        match self.status.as_deref() {
            Some("processing") => self.task_id.as_deref(),
            _ => None,
        }
    }
}

/// HTTP client for the media analysis service.
#[derive(Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ANALYZE_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn analyze(&self, media_url: &str) -> Result<AnalyzeResponse, AiClientError> {
        let response = self
            .http
            .post(format!("{}/api/analyze", self.base_url))
            .json(&json!({ "media_id": media_url }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AiClientError::Status(response.status().as_u16()));
        }
        Ok(response.json::<AnalyzeResponse>().await?)
    }

    pub async fn task_status(&self, task_id: &str) -> Result<AnalyzeResponse, AiClientError> {
        let mut url = reqwest::Url::parse(&format!("{}/api/task/", self.base_url))
            .map_err(|err| AiClientError::InvalidUrl(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| AiClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push(task_id);
        let response = self
            .http
            .get(url)
            .timeout(TASK_STATUS_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AiClientError::Status(response.status().as_u16()));
        }
        Ok(response.json::<AnalyzeResponse>().await?)
    }

    pub async fn ping(&self) -> DependencyStatus {
        probe_endpoint(
            &self.http,
            &format!("{}/health", self.base_url),
            HEALTH_TIMEOUT,
        )
        .await
    }
}

/// Payload of a `smart-album` queue job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAlbumPayload {
    pub job_id: String,
    pub media_url: String,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job was not pending (already picked up, finished or gone).
    Skipped,
    Completed { item_id: String },
    AwaitingTask { task_id: String },
}

/// `lifeMomentTags` and `locationData` derived from an analysis document.
pub fn derive_item_metadata(analysis: &Value) -> (Option<Value>, Option<Value>) {
    let tags = analysis
        .get("event_type")
        .filter(|value| match value {
            Value::Null | Value::Bool(false) => false,
            Value::String(text) => !text.is_empty(),
            _ => true,
        })
        .map(|event_type| json!([event_type]));
    let location = analysis
        .get("location")
        .and_then(Value::as_str)
        .map(|location| json!({ "location": location }));
    (tags, location)
}

/// Runs one analysis for a pending job.
///
/// Any failure after the job is claimed releases it: `failed` with the error when
/// `final_attempt` is set, otherwise back to `pending` with the error propagated so the
/// queue retries it.
pub async fn process_job(
    pool: &Pool<Postgres>,
    client: &AnalysisClient,
    payload: &SmartAlbumPayload,
    final_attempt: bool,
) -> Result<ProcessOutcome> {
    let claimed = sqlx::query(
        "UPDATE smart_album_jobs SET status = 'processing', updated_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(&payload.job_id)
    .execute(pool)
    .await?;
    if claimed.rows_affected() == 0 {
        return Ok(ProcessOutcome::Skipped);
    }

    match run_analysis(pool, client, payload).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let message = err.to_string();
            tracing::warn!(error = %message, job_id = %payload.job_id, final_attempt, "smart album analysis failed");
            release_job(pool, &payload.job_id, &message, final_attempt).await?;
            Err(err)
        }
    }
}

async fn run_analysis(
    pool: &Pool<Postgres>,
    client: &AnalysisClient,
    payload: &SmartAlbumPayload,
) -> Result<ProcessOutcome> {
    let response = client.analyze(&payload.media_url).await?;
    if let Some(analysis) = response.completed_analysis() {
        let item_id = complete_with_analysis(
            pool,
            &payload.job_id,
            &payload.user_id,
            &payload.media_url,
            analysis,
        )
        .await?;
        return Ok(match item_id {
            Some(item_id) => ProcessOutcome::Completed { item_id },
            None => ProcessOutcome::Skipped,
        });
    }
    if let Some(task_id) = response.pending_task() {
        sqlx::query("UPDATE smart_album_jobs SET ai_task_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(task_id)
            .bind(&payload.job_id)
            .execute(pool)
            .await?;
        return Ok(ProcessOutcome::AwaitingTask {
            task_id: task_id.to_string(),
        });
    }
    Err(AiClientError::Unresolved.into())
}

/// Moves a `processing` job to `failed` on the final attempt, otherwise back to `pending`.
async fn release_job(
    pool: &Pool<Postgres>,
    job_id: &str,
    message: &str,
    final_attempt: bool,
) -> Result<()> {
    if final_attempt {
        sqlx::query(
            "UPDATE smart_album_jobs \
             SET status = 'failed', error_message = $1, updated_at = NOW() \
             WHERE id = $2 AND status = 'processing'",
        )
        .bind(message)
        .bind(job_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "UPDATE smart_album_jobs SET status = 'pending', ai_task_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Stores the analysed item and marks the job `done`.
///
/// Returns `None` when another caller already completed the job.
pub async fn complete_with_analysis(
    pool: &Pool<Postgres>,
    job_id: &str,
    user_id: &str,
    media_url: &str,
    analysis: &Value,
) -> Result<Option<String>> {
    let (tags, location) = derive_item_metadata(analysis);
    let item_id = uuid::Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO smart_album_items \
         (id, user_id, original_media_id, ai_analysis, life_moment_tags, location_data) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&item_id)
    .bind(user_id)
    .bind(media_url)
    .bind(analysis)
    .bind(tags)
    .bind(location)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE smart_album_jobs \
         SET status = 'done', result_item_id = $1, error_message = NULL, updated_at = NOW() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(&item_id)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    tx.commit().await?;
    tracing::info!(%job_id, %item_id, "smart album job completed");
    Ok(Some(item_id))
}

/// Polls a deferred analysis task and completes the job once the service reports it done.
pub async fn poll_task(pool: &Pool<Postgres>, client: &AnalysisClient, job_id: &str) -> Result<()> {
    let row = sqlx::query(
        "SELECT user_id, media_url, ai_task_id FROM smart_album_jobs \
         WHERE id = $1 AND status = 'processing' AND ai_task_id IS NOT NULL",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(());
    };
    let user_id: String = row.try_get("user_id")?;
    let media_url: String = row.try_get("media_url")?;
    let task_id: String = row.try_get("ai_task_id")?;

    let response = client.task_status(&task_id).await?;
    if response.status.as_deref() != Some("completed") {
        return Ok(());
    }
    let analysis = response.analysis.unwrap_or_else(|| json!({}));
    complete_with_analysis(pool, job_id, &user_id, &media_url, &analysis).await?;
    Ok(())
}

/// Queue handler for `smart-album` jobs.
pub async fn handle_job(pool: &Pool<Postgres>, client: &AnalysisClient, job: &Job) -> Result<()> {
    let payload: SmartAlbumPayload = serde_json::from_value(job.payload.clone())?;
    let outcome = process_job(pool, client, &payload, job.is_final_attempt()).await?;
    tracing::debug!(job_id = %payload.job_id, ?outcome, "smart album job processed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(read) = socket.read(&mut chunk).await else {
                return;
            };
            if read == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                return;
            }
        }
    }

    /// Answers every request with `status_line` and `body`.
    async fn stub_service(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    async fn test_pool() -> Option<Pool<Postgres>> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let pool = crate::db::connect(&database_url).await.unwrap();
        crate::migrations::run(&pool).await.unwrap();
        Some(pool)
    }

    async fn pending_job(pool: &Pool<Postgres>) -> SmartAlbumPayload {
        let user_id = uuid::Uuid::new_v4().to_string();
        let suffix = &user_id[..8];
        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash) VALUES ($1, $2, $3, 'x')",
        )
        .bind(&user_id)
        .bind(format!("sa-{suffix}@example.com"))
        .bind(format!("sa_{suffix}"))
        .execute(pool)
        .await
        .unwrap();
        let job_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO smart_album_jobs (id, user_id, status, media_url) \
             VALUES ($1, $2, 'pending', 'https://cdn.example.com/a.jpg')",
        )
        .bind(&job_id)
        .bind(&user_id)
        .execute(pool)
        .await
        .unwrap();
        SmartAlbumPayload {
            job_id,
            media_url: "https://cdn.example.com/a.jpg".into(),
            job_type: None,
            user_id,
        }
    }

    async fn job_state(pool: &Pool<Postgres>, job_id: &str) -> (String, Option<String>) {
        let row = sqlx::query("SELECT status, error_message FROM smart_album_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await
            .unwrap();
        (row.get("status"), row.get("error_message"))
    }

    #[test]
    fn metadata_is_derived_from_analysis() {
        let (tags, location) =
            derive_item_metadata(&json!({"event_type": "wedding", "location": "Paris"}));
        assert_eq!(tags, Some(json!(["wedding"])));
        assert_eq!(location, Some(json!({"location": "Paris"})));

        let (tags, location) = derive_item_metadata(&json!({"event_type": "", "location": 5}));
        assert_eq!(tags, None);
        assert_eq!(location, None);
    }

    #[test]
    fn response_states_are_recognized() {
        let done: AnalyzeResponse =
            serde_json::from_value(json!({"status": "completed", "analysis": {"a": 1}})).unwrap();
        assert_eq!(done.completed_analysis(), Some(&json!({"a": 1})));
        assert_eq!(done.pending_task(), None);

        let deferred: AnalyzeResponse =
            serde_json::from_value(json!({"status": "processing", "task_id": "t1"})).unwrap();
        assert_eq!(deferred.pending_task(), Some("t1"));
        assert_eq!(deferred.completed_analysis(), None);

        let bare: AnalyzeResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare, AnalyzeResponse::default());
    }

    #[test]
    fn payload_roundtrips_with_type_key() {
        let payload: SmartAlbumPayload = serde_json::from_value(json!({
            "jobId": "j1",
            "mediaUrl": "https://cdn/x.jpg",
            "type": "analyze",
            "userId": "u1",
        }))
        .unwrap();
        assert_eq!(payload.job_type.as_deref(), Some("analyze"));
        assert_eq!(serde_json::to_value(&payload).unwrap()["type"], "analyze");
    }

    #[tokio::test]
    async fn unreachable_service_reports_request_error() {
        let client = AnalysisClient::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9");
        let err = client.analyze("https://cdn/x.jpg").await.unwrap_err();
        assert!(matches!(err, AiClientError::Request(_)));
        assert_eq!(client.ping().await, DependencyStatus::Down);
    }

    #[tokio::test]
    async fn error_health_status_is_down() {
        let base = stub_service("503 Service Unavailable", "{}").await;
        let client = AnalysisClient::new(base).unwrap();
        assert_eq!(client.ping().await, DependencyStatus::Down);
    }

    #[tokio::test]
    async fn failed_analysis_returns_job_to_pending_then_fails() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let base = stub_service("500 Internal Server Error", "{}").await;
        let client = AnalysisClient::new(base).unwrap();
        let payload = pending_job(&pool).await;

        assert!(process_job(&pool, &client, &payload, false).await.is_err());
        assert_eq!(job_state(&pool, &payload.job_id).await, ("pending".to_string(), None));

        assert!(process_job(&pool, &client, &payload, true).await.is_err());
        assert_eq!(
            job_state(&pool, &payload.job_id).await,
            ("failed".to_string(), Some("AI service returned 500".to_string()))
        );
    }

    #[tokio::test]
    async fn unresolved_analysis_does_not_stay_processing() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let base = stub_service("200 OK", r#"{"status":"queued"}"#).await;
        let client = AnalysisClient::new(base).unwrap();
        let payload = pending_job(&pool).await;

        let err = process_job(&pool, &client, &payload, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AiClientError::Unresolved.to_string());
        assert_eq!(job_state(&pool, &payload.job_id).await.0, "pending");

        assert!(process_job(&pool, &client, &payload, true).await.is_err());
        let (status, error) = job_state(&pool, &payload.job_id).await;
        assert_eq!(status, "failed");
        assert_eq!(error.as_deref(), Some("AI service returned neither an analysis nor a task"));
    }

    #[tokio::test]
    async fn completed_analysis_creates_item() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let base = stub_service(
            "200 OK",
            r#"{"status":"completed","analysis":{"event_type":"birthday","location":"Lyon"}}"#,
        )
        .await;
        let client = AnalysisClient::new(base).unwrap();
        let payload = pending_job(&pool).await;

        let outcome = process_job(&pool, &client, &payload, false).await.unwrap();
        let ProcessOutcome::Completed { item_id } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(job_state(&pool, &payload.job_id).await.0, "done");
        let tags: Value =
            sqlx::query_scalar("SELECT life_moment_tags FROM smart_album_items WHERE id = $1")
                .bind(&item_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(tags, json!(["birthday"]));

        let again = process_job(&pool, &client, &payload, false).await.unwrap();
        assert_eq!(again, ProcessOutcome::Skipped);
    }
}
