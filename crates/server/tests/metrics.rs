mod common;

use axum::http::StatusCode;
use common::{get, post_json, TestApp};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

// Installs the process-wide recorder, so it lives in its own test binary.
#[tokio::test]
async fn metrics_endpoint_exports_pipeline_counters() {
    let handle = server::telemetry::install().unwrap();
    // second install hands back the same recorder
    server::telemetry::install().unwrap();

    let app = TestApp::start(16, Some(handle)).await;
    let a = app.image("a.png", 4);
    let b = app.missing("b.png");

    let response = app
        .router()
        .oneshot(post_json("/predict", json!({ "path": [a, b] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.router().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("imgembed_batches_total"), "{text}");
    assert!(text.contains("imgembed_fetch_total"), "{text}");
    assert!(text.contains("imgembed_inference_total"), "{text}");
    assert!(text.contains("imgembed_http_requests_total"), "{text}");
}
