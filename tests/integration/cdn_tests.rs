//! Library asset route integration tests.
//!
//! Tests verify:
//! - The fastest mirror wins and is cached exactly once
//! - Cache hits skip the network entirely
//! - A race with no successful mirror ends in 504 at the deadline
//! - Content types and CORS headers

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use super::test_utils::{test_config, MockFetcher, TestApp};

const MIRROR_A: &str = "http://mirror-a.test/jquery/3.7.1/jquery.min.js";
const MIRROR_B: &str = "http://mirror-b.test/jquery/3.7.1/jquery.min.js";
const MIRROR_C: &str = "http://mirror-c.test/jquery/3.7.1/jquery.min.js";

fn jquery_request() -> Request<Body> {
    Request::builder()
        .uri("/cdn/jquery/3.7.1/jquery.min.js")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_fastest_mirror_wins() {
    let fetcher = MockFetcher::new()
        .with_delayed(MIRROR_A, 200, "slow", Duration::from_millis(300))
        .with_delayed(MIRROR_B, 200, "fast", Duration::from_millis(10))
        .with(MIRROR_C, 404, "");
    let app = TestApp::new(fetcher).await;

    let response = app.router.clone().oneshot(jquery_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cached").unwrap(), "no");
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/javascript"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"fast");
}

#[tokio::test]
async fn test_winner_cached_exactly_once() {
    let fetcher = MockFetcher::new()
        .with_delayed(MIRROR_A, 200, "from-a", Duration::from_millis(20))
        .with_delayed(MIRROR_B, 200, "from-b", Duration::from_millis(60))
        .with_delayed(MIRROR_C, 200, "from-c", Duration::from_millis(100));
    let app = TestApp::new(fetcher).await;

    let response = app.router.clone().oneshot(jquery_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    app.wait_for_writes(1).await;
    // Give the losers time to finish if they were not cancelled.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = app.store.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.write_failures, 0);
}

#[tokio::test]
async fn test_cached_asset_skips_network() {
    let fetcher = MockFetcher::new().with(MIRROR_A, 200, "jquery-source");
    let app = TestApp::new(fetcher).await;

    let first = app.router.clone().oneshot(jquery_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    app.wait_for_writes(1).await;
    let fetches = app.fetcher.call_count();

    let second = app.router.clone().oneshot(jquery_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cached").unwrap(), "yes");

    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"jquery-source");
    assert_eq!(app.fetcher.call_count(), fetches);
}

#[tokio::test]
async fn test_all_mirrors_failing_times_out() {
    // Mirror A answers 404; B and C are unreachable.
    let fetcher = MockFetcher::new().with(MIRROR_A, 404, "not here");
    let config = test_config().with_deadline(Duration::from_millis(200));
    let app = TestApp::with_config(fetcher, config).await;

    let start = Instant::now();
    let response = app.router.clone().oneshot(jquery_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(app.fetcher.call_count(), 3);
    assert_eq!(app.store.stats().writes, 0);
}

#[tokio::test]
async fn test_empty_body_is_not_a_winner() {
    let fetcher = MockFetcher::new()
        .with(MIRROR_A, 200, "")
        .with_delayed(MIRROR_B, 200, "real", Duration::from_millis(50));
    let app = TestApp::new(fetcher).await;

    let response = app.router.clone().oneshot(jquery_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"real");
}

#[tokio::test]
async fn test_stylesheet_content_type() {
    let url = "http://mirror-a.test/bootstrap/5.3.0/css/bootstrap.min.css";
    let app = TestApp::new(MockFetcher::new().with(url, 200, "body{}")).await;

    let request = Request::builder()
        .uri("/cdn/bootstrap/5.3.0/css/bootstrap.min.css")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/css");
}

#[tokio::test]
async fn test_cors_echoes_origin() {
    let app = TestApp::new(MockFetcher::new().with(MIRROR_A, 200, "x")).await;

    let request = Request::builder()
        .uri("/cdn/jquery/3.7.1/jquery.min.js")
        .header("Origin", "https://site.test")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "https://site.test"
    );
    assert_eq!(
        headers.get("timing-allow-origin").unwrap(),
        "https://site.test"
    );
}

#[tokio::test]
async fn test_disabled_route_not_found() {
    let config = test_config().with_routes(false, true, true);
    let app = TestApp::with_config(MockFetcher::new(), config).await;

    let response = app.router.clone().oneshot(jquery_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.fetcher.call_count(), 0);
}
