//! Image route integration tests.
//!
//! Tests verify:
//! - Size, format and quality negotiation from client hints
//! - Rendition and original caching (`X-Cached`)
//! - Error propagation from the origin and the decoder
//! - Response headers

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use image::GenericImageView;
use tower::ServiceExt;

use prism_cdn::server::{ACCEPT_CH, POWERED_BY, VARY_HINTS};

use super::test_utils::{make_jpeg, make_png, MockFetcher, TestApp};

const PHOTO_URL: &str = "http://origin.test/photos/cat.jpg";

async fn photo_app() -> TestApp {
    TestApp::new(MockFetcher::new().with(PHOTO_URL, 200, make_jpeg(600, 400))).await
}

// =============================================================================
// Negotiation
// =============================================================================

#[tokio::test]
async fn test_dpr_and_width_hints_resize_jpeg() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg")
        .header("DPR", "2")
        .header("Width", "300")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert_eq!(response.headers().get("x-cached").unwrap(), "no");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..2], &[0xFFu8, 0xD8]);

    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.dimensions(), (300, 200));

    // DPR 2 resolves to quality 40: same bytes as pinning 40 explicitly.
    let pinned = render_body(&app, "/img/origin.test/photos/cat.jpg?width=300&quality=40").await;
    assert_eq!(body, pinned);

    let finer = render_body(&app, "/img/origin.test/photos/cat.jpg?width=300&quality=90").await;
    assert_ne!(body, finer);
    assert!(body.len() < finer.len());
}

async fn render_body(app: &TestApp, uri: &str) -> bytes::Bytes {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_accept_webp_switches_format() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg")
        .header("Accept", "image/webp,image/*,*/*;q=0.8")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/webp"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..4], b"RIFF");
    assert_eq!(&body[8..12], b"WEBP");
}

#[tokio::test]
async fn test_query_parameters_drive_negotiation() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg?width=150&quality=50")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.dimensions(), (150, 100));
}

#[tokio::test]
async fn test_width_clamped_to_viewport() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg")
        .header("Width", "500")
        .header("Viewport-Width", "240")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.width(), 240);
}

#[tokio::test]
async fn test_oversized_width_never_upscales() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg")
        .header("Width", "100000")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.dimensions(), (600, 400));
}

#[tokio::test]
async fn test_png_without_width_keeps_size() {
    let url = "http://origin.test/icons/logo.png";
    let app = TestApp::new(MockFetcher::new().with(url, 200, make_png(64, 32))).await;

    let request = Request::builder()
        .uri("/img/origin.test/icons/logo.png")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.dimensions(), (64, 32));
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn test_repeat_request_served_from_rendition_cache() {
    let app = photo_app().await;

    let build = || {
        Request::builder()
            .uri("/img/origin.test/photos/cat.jpg")
            .header("DPR", "2")
            .header("Width", "300")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.router.clone().oneshot(build()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cached").unwrap(), "no");
    let first_body = first.into_body().collect().await.unwrap().to_bytes();

    // Original and rendition
    app.wait_for_writes(2).await;
    let fetches = app.fetcher.call_count();
    assert_eq!(fetches, 1);

    let second = app.router.clone().oneshot(build()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cached").unwrap(), "optimized");
    let second_body = second.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(first_body, second_body);
    assert_eq!(app.fetcher.call_count(), fetches);
}

#[tokio::test]
async fn test_new_rendition_reuses_cached_original() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg?width=300")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    app.wait_for_writes(2).await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg?width=120")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cached").unwrap(), "original");
    assert_eq!(app.fetcher.calls_to(PHOTO_URL), 1);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.width(), 120);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_origin_status_propagated() {
    let app = TestApp::new(MockFetcher::new().with(
        "http://origin.test/missing.jpg",
        404,
        "nope",
    ))
    .await;

    let request = Request::builder()
        .uri("/img/origin.test/missing.jpg")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Not Found");
}

#[tokio::test]
async fn test_unreachable_origin_is_server_error() {
    let app = TestApp::new(MockFetcher::new()).await;

    let request = Request::builder()
        .uri("/img/down.test/a.jpg")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_undecodable_original_is_server_error() {
    let app = TestApp::new(MockFetcher::new().with(
        "http://origin.test/broken.jpg",
        200,
        "definitely not a jpeg",
    ))
    .await;

    let request = Request::builder()
        .uri("/img/origin.test/broken.jpg")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Internal Server Error");
}

#[tokio::test]
async fn test_traversal_path_rejected() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/%2E%2E/cat.jpg")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.fetcher.call_count(), 0);
}

// =============================================================================
// Headers
// =============================================================================

#[tokio::test]
async fn test_image_response_headers() {
    let app = photo_app().await;

    let request = Request::builder()
        .uri("/img/origin.test/photos/cat.jpg")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get("accept-ch").unwrap(), ACCEPT_CH);
    assert!(headers
        .get_all("vary")
        .iter()
        .any(|v| v.to_str().unwrap() == VARY_HINTS));
    assert_eq!(headers.get("x-powered-by").unwrap(), POWERED_BY);
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=31536000"
    );
    assert!(headers.contains_key("x-duration"));
}
