//! API integration tests for frame retrieval and error handling.
//!
//! Tests verify:
//! - Level windows through the path and query routes
//! - Cache headers across repeated requests
//! - Error cases (missing IDs, bad levels, missing frame, invalid frame)
//! - HTTP response codes and headers

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use tlm_proxy::server::CACHE_HIT_HEADER;
use tlm_proxy::{create_router, create_shared_router, FrameService, RouterConfig};

use super::test_utils::{frame_id, local_cache, scenario_codestream, MockFrameSource};

const FRAME_PATH: &str = "/runtime/datastore/datastore-1/imageset/imageset-1/imageframe/frame-1";

fn router_with(source: MockFrameSource) -> Router {
    create_router(
        FrameService::new(source, local_cache()),
        RouterConfig::new().with_tracing(false),
    )
}

fn scenario_router() -> Router {
    router_with(MockFrameSource::new().with_frame(frame_id(), scenario_codestream()))
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn error_type(response: axum::response::Response) -> String {
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["error"].as_str().unwrap().to_string()
}

// =============================================================================
// Frame Retrieval
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = get(&scenario_router(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_path_route_levels() {
    let router = scenario_router();
    let data = scenario_codestream();

    let response = get(&router, &format!("{}?startLevel=1&endLevel=2", FRAME_PATH)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert!(response
        .headers()
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("public, max-age="));
    assert_eq!(response.headers().get(&CACHE_HIT_HEADER).unwrap(), "false");
    assert_eq!(body_bytes(response).await, &data[4100..7100]);

    let again = get(&router, &format!("{}?startLevel=1&endLevel=2", FRAME_PATH)).await;
    assert_eq!(again.headers().get(&CACHE_HIT_HEADER).unwrap(), "true");
    assert_eq!(body_bytes(again).await, &data[4100..7100]);
}

#[tokio::test]
async fn test_path_route_defaults_to_whole_frame() {
    let response = get(&scenario_router(), FRAME_PATH).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, scenario_codestream());
}

#[tokio::test]
async fn test_first_level_and_background_caching() {
    let source = MockFrameSource::new().with_frame(frame_id(), scenario_codestream());
    let service = Arc::new(FrameService::new(source, local_cache()));
    let router = create_shared_router(service.clone(), RouterConfig::new());

    let response = get(&router, &format!("{}?startLevel=0&endLevel=0", FRAME_PATH)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, &scenario_codestream()[..4100]);

    service.wait_for_background().await;

    let response = get(&router, &format!("{}?startLevel=2&endLevel=2", FRAME_PATH)).await;
    assert_eq!(response.headers().get(&CACHE_HIT_HEADER).unwrap(), "true");
    assert_eq!(service.source().fetch_count(), 1);
}

#[tokio::test]
async fn test_query_route() {
    let router = scenario_router();
    let uri = "/?datastoreId=datastore-1&imageSetId=imageset-1&imageFrameId=frame-1&startLevel=2";

    let response = get(&router, uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, &scenario_codestream()[6100..]);
}

#[tokio::test]
async fn test_empty_window() {
    let response = get(
        &scenario_router(),
        &format!("{}?startLevel=5&endLevel=9", FRAME_PATH),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_cors_exposes_cache_hit_header() {
    let request = Request::builder()
        .uri(FRAME_PATH)
        .header("origin", "https://viewer.example.com")
        .body(Body::empty())
        .unwrap();
    let response = scenario_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert_eq!(
        response.headers().get("access-control-expose-headers").unwrap(),
        "x-frame-cache-hit"
    );
}

// =============================================================================
// Error Cases
// =============================================================================

#[tokio::test]
async fn test_missing_identifier() {
    let response = get(&scenario_router(), "/?datastoreId=datastore-1&imageSetId=imageset-1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_type(response).await, "invalid_request");
}

#[tokio::test]
async fn test_bad_level() {
    let router = scenario_router();
    for query in ["startLevel=abc", "endLevel=-1", "startLevel=1.5"] {
        let response = get(&router, &format!("{}?{}", FRAME_PATH, query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", query);
        assert_eq!(error_type(response).await, "invalid_request");
    }
}

#[tokio::test]
async fn test_frame_not_found() {
    let response = get(
        &scenario_router(),
        "/runtime/datastore/datastore-1/imageset/imageset-1/imageframe/missing",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_type(response).await, "not_found");
}

#[tokio::test]
async fn test_invalid_frame() {
    let router = router_with(MockFrameSource::new().with_frame(frame_id(), vec![0x42; 64]));

    let response = get(&router, &format!("{}?startLevel=0&endLevel=1", FRAME_PATH)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_type(response).await, "invalid_frame");
}

#[tokio::test]
async fn test_unknown_route() {
    let response = get(&scenario_router(), "/tiles/frame-1/0/0/0.jpg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
