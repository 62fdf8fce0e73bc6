use anyhow::{anyhow, Result};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

pub struct LayerOptions {
    pub body_limit_bytes: usize,
    pub timeout: Duration,
    pub cors: Option<CorsLayer>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            timeout: Duration::from_secs(30),
            cors: None,
        }
    }
}

pub fn apply_standard_layers(router: Router, service_name: &'static str) -> Router {
    apply_layers(router, service_name, LayerOptions::default())
}

pub fn apply_layers(router: Router, service_name: &'static str, options: LayerOptions) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(move |request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http.request",
                service = service_name,
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = router
        .layer(crate::metrics::MetricsLayer::new(service_name))
        .layer(trace)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.timeout,
        ))
        .layer(RequestBodyLimitLayer::new(options.body_limit_bytes))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid));

    match options.cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// `FRONTEND_URL` pins the allowed origin with credentials; without it any origin is
/// allowed outside production and none in production.
pub fn cors_layer(frontend_url: Option<&str>, production: bool) -> Result<Option<CorsLayer>> {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")]);

    match frontend_url {
        Some(origin) => {
            let origins = origin
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| {
                    HeaderValue::from_str(value.trim_end_matches('/'))
                        .map_err(|err| anyhow!("invalid FRONTEND_URL {value}: {err}"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(
                base.allow_origin(AllowOrigin::list(origins))
                    .allow_credentials(true),
            ))
        }
        None if production => Ok(None),
        None => Ok(Some(base.allow_origin(AllowOrigin::any()))),
    }
}
