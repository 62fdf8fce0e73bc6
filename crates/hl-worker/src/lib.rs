use anyhow::{anyhow, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hl_core::queue::{
    self, Job, JobOutcome, JOBS_CHANNEL, JOB_CREATE_NOTIFICATION, JOB_PROCESS_SMART_ALBUM,
    QUEUE_NOTIFICATIONS, QUEUE_SMART_ALBUM,
};
use hl_core::smart_album::{AnalysisClient, DEFAULT_AI_SERVICE_URL};
use hl_core::{config, db, http, logging, metrics, notifications, server, smart_album};
use serde::Serialize;
use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub const SERVICE_NAME: &str = "hl-worker";

const QUEUES: [&str; 2] = [QUEUE_NOTIFICATIONS, QUEUE_SMART_ALBUM];
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);
const STALE_JOB_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
struct AppState {
    pool: Pool<Postgres>,
}

#[derive(Serialize)]
struct HealthStatus {
    status: String,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub poll_interval: Duration,
    pub ai_service_url: String,
}

impl WorkerConfig {
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "addr": self.addr.to_string(),
            "pollSeconds": self.poll_interval.as_secs(),
            "aiServiceUrl": self.ai_service_url,
        })
    }
}

pub fn load_config() -> Result<WorkerConfig> {
    let addr = config::socket_addr_from_env("WORKER_ADDR", "0.0.0.0:3001")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let poll_seconds: u64 = config::parse_env("WORKER_POLL_SECONDS", 2);
    Ok(WorkerConfig {
        addr,
        database_url,
        poll_interval: Duration::from_secs(poll_seconds.max(1)),
        ai_service_url: config::env_or("AI_SERVICE_URL", DEFAULT_AI_SERVICE_URL),
    })
}

pub async fn run(config: WorkerConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let pool = db::connect(&config.database_url).await?;
    let analysis = AnalysisClient::new(config.ai_service_url.clone())?;
    tracing::info!(
        poll_seconds = config.poll_interval.as_secs(),
        ai_service = %analysis.base_url(),
        "worker configured"
    );

    spawn_job_workers(&pool, &analysis, config.poll_interval);
    spawn_housekeeping(pool.clone());

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(AppState { pool });
    let router = http::apply_standard_layers(router, SERVICE_NAME);
    server::serve(config.addr, router).await
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "ok".into(),
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable".into(),
                }),
            )
        }
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}

async fn connect_listener(pool: &Pool<Postgres>) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(JOBS_CHANNEL).await?;
    Ok(listener)
}

/// Waits for a notification naming `queue_name` or the poll interval, whichever comes first.
async fn wait_for_notify(
    listener: &mut PgListener,
    queue_name: &str,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + poll_interval;
    loop {
        match tokio::time::timeout_at(deadline, listener.recv()).await {
            Err(_) => return Ok(()),
            Ok(Ok(notification)) if notification.payload() == queue_name => return Ok(()),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
        }
    }
}

/// One claim loop per queue so a slow smart-album job never delays notifications.
fn spawn_job_workers(
    pool: &Pool<Postgres>,
    analysis: &AnalysisClient,
    poll_interval: Duration,
) -> Vec<JoinHandle<()>> {
    QUEUES
        .into_iter()
        .map(|queue_name| {
            spawn_queue_worker(pool.clone(), analysis.clone(), queue_name, poll_interval)
        })
        .collect()
}

fn spawn_queue_worker(
    pool: Pool<Postgres>,
    analysis: AnalysisClient,
    queue_name: &'static str,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut listener = match connect_listener(&pool).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                tracing::warn!(error = %err, queue = queue_name, "failed to listen on job channel, polling only");
                None
            }
        };

        loop {
            match queue::claim(&pool, &[queue_name]).await {
                Ok(Some(job)) => run_job(&pool, &analysis, job).await,
                Ok(None) => match listener.as_mut() {
                    Some(active) => {
                        if wait_for_notify(active, queue_name, poll_interval).await.is_err() {
                            listener = connect_listener(&pool).await.ok();
                        }
                    }
                    None => {
                        tokio::time::sleep(poll_interval).await;
                        listener = connect_listener(&pool).await.ok();
                    }
                },
                Err(err) => {
                    tracing::error!(error = %err, queue = queue_name, "failed to claim job");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    })
}

async fn run_job(pool: &Pool<Postgres>, analysis: &AnalysisClient, job: Job) {
    let started_at = Instant::now();
    let result = dispatch(pool, analysis, &job)
        .await
        .map_err(|err| err.to_string());
    if let Err(err) = &result {
        tracing::warn!(job_id = %job.job_id, queue = %job.queue, attempt = job.attempts, error = %err, "job failed");
    }

    let label = match queue::finalize(pool, &job, result).await {
        Ok(JobOutcome::Succeeded) => metrics::RESULT_SUCCESS,
        Ok(JobOutcome::Retrying(delay)) => {
            tracing::info!(job_id = %job.job_id, delay_ms = delay.as_millis() as u64, "job scheduled for retry");
            "retry"
        }
        Ok(JobOutcome::Failed) => metrics::RESULT_ERROR,
        Err(err) => {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to finalize job");
            metrics::RESULT_ERROR
        }
    };
    metrics::inc_jobs_processed(&job.queue, label);
    metrics::observe_job_duration(&job.queue, started_at.elapsed());
}

async fn dispatch(pool: &Pool<Postgres>, analysis: &AnalysisClient, job: &Job) -> Result<()> {
    match (job.queue.as_str(), job.job_type.as_str()) {
        (QUEUE_NOTIFICATIONS, JOB_CREATE_NOTIFICATION) => {
            notifications::handle_job(pool, &job.payload).await
        }
        (QUEUE_SMART_ALBUM, JOB_PROCESS_SMART_ALBUM) => {
            smart_album::handle_job(pool, analysis, job).await
        }
        (other_queue, other_type) => Err(anyhow!("unknown job {other_queue}/{other_type}")),
    }
}

fn spawn_housekeeping(pool: Pool<Postgres>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            tick.tick().await;
            if let Err(err) = housekeeping(&pool).await {
                tracing::warn!(error = %err, "housekeeping failed");
            }
        }
    });
}

/// Purges expired stories, recovers stale jobs and trims finished jobs per queue.
pub async fn housekeeping(pool: &Pool<Postgres>) -> Result<()> {
    let stories = sqlx::query("DELETE FROM stories WHERE expires_at <= NOW()")
        .execute(pool)
        .await?
        .rows_affected();
    let recovered = queue::recover_stale(pool, STALE_JOB_AFTER).await?;
    let mut pruned = 0;
    for name in QUEUES {
        pruned += queue::prune(pool, name, queue::retention_for(name)).await?;
    }
    if stories + recovered + pruned > 0 {
        tracing::info!(stories, recovered, pruned, "housekeeping completed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_core::queue::JobOptions;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, Mutex, OnceCell};

    static MIGRATIONS: OnceCell<()> = OnceCell::const_new();
    static DB_LOCK: Mutex<()> = Mutex::const_new(());

    async fn test_pool() -> Option<Pool<Postgres>> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(8)
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

    fn job(queue: &str, job_type: &str) -> Job {
        Job {
            job_id: "j1".into(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload: json!({}),
            attempts: 1,
            max_attempts: 1,
            backoff_base_ms: 0,
        }
    }

    #[tokio::test]
    async fn unknown_jobs_are_rejected() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let analysis = AnalysisClient::new("http://127.0.0.1:9").expect("client");
        let err = dispatch(&pool, &analysis, &job("emails", "send"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown job emails/send");
    }

    #[tokio::test]
    async fn malformed_notification_payload_fails() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let analysis = AnalysisClient::new("http://127.0.0.1:9").expect("client");
        assert!(
            dispatch(&pool, &analysis, &job(QUEUE_NOTIFICATIONS, JOB_CREATE_NOTIFICATION))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn failed_jobs_are_finalized_and_pruned() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let _guard = DB_LOCK.lock().await;
        let analysis = AnalysisClient::new("http://127.0.0.1:9").expect("client");
        let job_id = queue::enqueue(
            &pool,
            QUEUE_NOTIFICATIONS,
            JOB_CREATE_NOTIFICATION,
            &json!({"broken": true}),
            JobOptions::notifications(),
        )
        .await
        .expect("enqueue");

        let mut claimed = None;
        while let Some(job) = queue::claim(&pool, &[QUEUE_NOTIFICATIONS])
            .await
            .expect("claim")
        {
            let is_target = job.job_id == job_id;
            run_job(&pool, &analysis, job).await;
            if is_target {
                claimed = Some(());
                break;
            }
        }
        assert!(claimed.is_some());

        let status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = $1")
            .bind(&job_id)
            .fetch_one(&pool)
            .await
            .expect("job status");
        assert_eq!(status, "failed");

        housekeeping(&pool).await.expect("housekeeping");
    }

    /// Accepts connections and never answers, reporting each accept.
    async fn silent_service() -> (String, mpsc::UnboundedReceiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
                let _ = tx.send(());
            }
        });
        (format!("http://{addr}"), rx)
    }

    async fn job_status(pool: &Pool<Postgres>, job_id: &str) -> String {
        sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await
            .expect("job status")
    }

    #[tokio::test]
    async fn notifications_run_while_smart_album_job_is_busy() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let _guard = DB_LOCK.lock().await;
        let (base_url, mut accepted) = silent_service().await;
        let analysis = AnalysisClient::new(base_url).expect("client");

        let user_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash) VALUES ($1, $2, $3, 'x')",
        )
        .bind(&user_id)
        .bind(format!("{user_id}@example.com"))
        .bind(format!("w_{}", &user_id[..8]))
        .execute(&pool)
        .await
        .expect("insert user");
        let album_job_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO smart_album_jobs (id, user_id, status, media_url) \
             VALUES ($1, $2, 'pending', 'https://cdn.example.com/slow.jpg')",
        )
        .bind(&album_job_id)
        .bind(&user_id)
        .execute(&pool)
        .await
        .expect("insert smart album job");
        queue::enqueue(
            &pool,
            QUEUE_SMART_ALBUM,
            JOB_PROCESS_SMART_ALBUM,
            &json!({
                "jobId": album_job_id,
                "mediaUrl": "https://cdn.example.com/slow.jpg",
                "userId": user_id,
            }),
            JobOptions::smart_album(),
        )
        .await
        .expect("enqueue smart album");

        let workers = spawn_job_workers(&pool, &analysis, Duration::from_millis(200));
        assert_eq!(workers.len(), QUEUES.len());
        tokio::time::timeout(Duration::from_secs(10), accepted.recv())
            .await
            .expect("smart album worker reached the analysis service");

        let notification_id = queue::enqueue(
            &pool,
            QUEUE_NOTIFICATIONS,
            JOB_CREATE_NOTIFICATION,
            &json!({"broken": true}),
            JobOptions::notifications(),
        )
        .await
        .expect("enqueue notification");

        let finished = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if job_status(&pool, &notification_id).await == "failed" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        for worker in &workers {
            worker.abort();
        }
        assert!(finished.is_ok(), "notification job was not processed");
    }
}
