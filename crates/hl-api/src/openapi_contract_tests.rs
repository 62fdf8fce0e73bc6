use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

async fn fetch_document(headers: &[(&str, &str)]) -> (StatusCode, Value) {
    let app = Router::new().route("/api/docs/openapi.json", get(crate::openapi_json));
    let mut request = Request::builder()
        .method("GET")
        .uri("/api/docs/openapi.json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .oneshot(request.body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&body).expect("json body"))
}

#[tokio::test]
async fn openapi_contract_contains_api_paths() {
    let (status, payload) = fetch_document(&[("host", "localhost:3000")]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload.get("openapi").and_then(Value::as_str), Some("3.0.3"));
    assert_eq!(
        payload.pointer("/info/title").and_then(Value::as_str),
        Some("HeirLink API")
    );
    assert!(payload.pointer("/paths/~1api~1auth~1register/post").is_some());
    assert!(payload.pointer("/paths/~1api~1posts~1feed/get").is_some());
    assert!(payload.pointer("/paths/~1api~1albums~1{id}~1items/post").is_some());
    assert!(payload.pointer("/paths/~1api~1messages~1with~1{user_id}/get").is_some());
    assert!(payload.pointer("/paths/~1api~1ai~1chat/post").is_some());
    assert!(payload.pointer("/paths/~1api~1smart-album~1jobs~1{job_id}/get").is_some());
    assert!(payload
        .pointer("/components/securitySchemes/bearer")
        .is_some());
    assert_eq!(
        payload.pointer("/servers/0/url").and_then(Value::as_str),
        Some("http://localhost:3000")
    );
}

#[tokio::test]
async fn openapi_server_url_prefers_forwarded_headers() {
    let (_, payload) = fetch_document(&[
        ("host", "internal:3000"),
        ("x-forwarded-host", "api.heirlink.app"),
        ("x-forwarded-proto", "https"),
    ])
    .await;
    assert_eq!(
        payload.pointer("/servers/0/url").and_then(Value::as_str),
        Some("https://api.heirlink.app")
    );
}
