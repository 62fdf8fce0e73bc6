use axum::extract::MatchedPath;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

struct Metrics {
    registry: Registry,
    hl_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    ws_connections: IntGaugeVec,
    auth_success_total: IntCounterVec,
    auth_failure_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    cache_requests_total: IntCounterVec,
    jobs_enqueued_total: IntCounterVec,
    jobs_processed_total: IntCounterVec,
    job_duration_seconds: HistogramVec,
    notifications_created_total: IntCounterVec,
    uploads_total: IntCounterVec,
    ai_requests_total: IntCounterVec,
}

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("counter metric definition")
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let hl_up = IntGaugeVec::new(Opts::new("hl_up", "Service health"), &["service"])
            .expect("hl_up metric");

        let http_requests_total = counter(
            "http_requests_total",
            "HTTP request count",
            &["service", "route", "method", "status"],
        );

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["service", "route", "method", "status"],
        )
        .expect("http_request_duration_seconds metric");

        let ws_connections = IntGaugeVec::new(
            Opts::new("ws_connections", "Active websocket connections"),
            &["service"],
        )
        .expect("ws_connections metric");

        let auth_success_total = counter(
            "auth_success_total",
            "Successful logins, registrations and refreshes",
            &["service", "flow"],
        );
        let auth_failure_total = counter(
            "auth_failure_total",
            "Rejected logins, registrations and refreshes",
            &["service", "flow"],
        );
        let rate_limited_total = counter(
            "rate_limited_total",
            "Requests rejected by a rate limit",
            &["service", "bucket"],
        );
        let cache_requests_total = counter(
            "cache_requests_total",
            "Cache lookups by result",
            &["backend", "result"],
        );
        let jobs_enqueued_total = counter(
            "jobs_enqueued_total",
            "Jobs added to the queue",
            &["queue"],
        );
        let jobs_processed_total = counter(
            "jobs_processed_total",
            "Jobs processed by the worker",
            &["queue", "result"],
        );

        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("job_duration_seconds", "Job processing duration in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["queue"],
        )
        .expect("job_duration_seconds metric");

        let notifications_created_total = counter(
            "notifications_created_total",
            "Notifications persisted",
            &["type"],
        );
        let uploads_total = counter("uploads_total", "Stored uploads", &["kind"]);
        let ai_requests_total = counter(
            "ai_requests_total",
            "Requests forwarded to the AI provider",
            &["operation", "result"],
        );

        registry
            .register(Box::new(hl_up.clone()))
            .expect("register hl_up");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("register ws_connections");
        registry
            .register(Box::new(auth_success_total.clone()))
            .expect("register auth_success_total");
        registry
            .register(Box::new(auth_failure_total.clone()))
            .expect("register auth_failure_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("register rate_limited_total");
        registry
            .register(Box::new(cache_requests_total.clone()))
            .expect("register cache_requests_total");
        registry
            .register(Box::new(jobs_enqueued_total.clone()))
            .expect("register jobs_enqueued_total");
        registry
            .register(Box::new(jobs_processed_total.clone()))
            .expect("register jobs_processed_total");
        registry
            .register(Box::new(job_duration_seconds.clone()))
            .expect("register job_duration_seconds");
        registry
            .register(Box::new(notifications_created_total.clone()))
            .expect("register notifications_created_total");
        registry
            .register(Box::new(uploads_total.clone()))
            .expect("register uploads_total");
        registry
            .register(Box::new(ai_requests_total.clone()))
            .expect("register ai_requests_total");

        Metrics {
            registry,
            hl_up,
            http_requests_total,
            http_request_duration_seconds,
            ws_connections,
            auth_success_total,
            auth_failure_total,
            rate_limited_total,
            cache_requests_total,
            jobs_enqueued_total,
            jobs_processed_total,
            job_duration_seconds,
            notifications_created_total,
            uploads_total,
            ai_requests_total,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().hl_up.with_label_values(&[service_name]).set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_ws_connections(service_name: &'static str) {
    metrics()
        .ws_connections
        .with_label_values(&[service_name])
        .inc();
}

pub fn dec_ws_connections(service_name: &'static str) {
    metrics()
        .ws_connections
        .with_label_values(&[service_name])
        .dec();
}

pub fn inc_auth_success(service_name: &'static str, flow: &str) {
    metrics()
        .auth_success_total
        .with_label_values(&[service_name, flow])
        .inc();
}

pub fn inc_auth_failure(service_name: &'static str, flow: &str) {
    metrics()
        .auth_failure_total
        .with_label_values(&[service_name, flow])
        .inc();
}

pub fn inc_rate_limited(service_name: &'static str, bucket: &str) {
    metrics()
        .rate_limited_total
        .with_label_values(&[service_name, bucket])
        .inc();
}

pub fn inc_cache_request(backend: &str, result: &str) {
    metrics()
        .cache_requests_total
        .with_label_values(&[backend, result])
        .inc();
}

pub fn inc_jobs_enqueued(queue: &str) {
    metrics()
        .jobs_enqueued_total
        .with_label_values(&[queue])
        .inc();
}

pub fn inc_jobs_processed(queue: &str, result: &str) {
    metrics()
        .jobs_processed_total
        .with_label_values(&[queue, result])
        .inc();
}

pub fn observe_job_duration(queue: &str, duration: Duration) {
    metrics()
        .job_duration_seconds
        .with_label_values(&[queue])
        .observe(duration.as_secs_f64());
}

pub fn inc_notifications_created(kind: &str) {
    metrics()
        .notifications_created_total
        .with_label_values(&[kind])
        .inc();
}

pub fn inc_uploads(kind: &str) {
    metrics().uploads_total.with_label_values(&[kind]).inc();
}

pub fn inc_ai_request(operation: &str, result: &str) {
    metrics()
        .ai_requests_total
        .with_label_values(&[operation, result])
        .inc();
}

pub fn metrics_response(service_name: &'static str) -> impl IntoResponse {
    init(service_name);
    let metrics = metrics();
    let metric_families = metrics.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}

#[derive(Clone)]
pub struct MetricsLayer {
    service_name: &'static str,
}

impl MetricsLayer {
    pub fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service_name: &'static str,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service_name: self.service_name,
        }
    }
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = axum::response::Response<ResBody>>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = axum::response::Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let service_name = self.service_name;
        let method = request.method().to_string();
        // Route templates keep label cardinality bounded; unmatched paths share one label.
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    record_http_request(
                        service_name,
                        &method,
                        &route,
                        response.status().as_u16(),
                        start.elapsed(),
                    );
                    Ok(response)
                }
                Err(err) => {
                    record_http_request(service_name, &method, &route, 500, start.elapsed());
                    Err(err)
                }
            }
        })
    }
}
