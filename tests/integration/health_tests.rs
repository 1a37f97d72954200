//! Health endpoint integration tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use prism_cdn::store::ArtifactStore;
use prism_cdn::create_router;

use super::test_utils::{test_config, MockFetcher, TestApp};

async fn health_json(router: axum::Router) -> serde_json::Value {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_reports_cache() {
    let app = TestApp::new(MockFetcher::new()).await;

    let json = health_json(app.router.clone()).await;

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["cache_enabled"], true);
    assert_eq!(json["cache"]["hits"], 0);
    assert_eq!(json["cache"]["writes"], 0);
}

#[tokio::test]
async fn test_health_with_cache_disabled() {
    let router = create_router(
        Arc::new(MockFetcher::new()),
        Arc::new(ArtifactStore::disabled()),
        test_config(),
    );

    let json = health_json(router).await;
    assert_eq!(json["cache_enabled"], false);
}

#[tokio::test]
async fn test_health_has_powered_by() {
    let app = TestApp::new(MockFetcher::new()).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert!(response
        .headers()
        .get("x-powered-by")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("Prism "));
}
