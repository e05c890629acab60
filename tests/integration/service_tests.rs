//! Frame service tests.
//!
//! Tests verify:
//! - First-level requests reply with level 0 and seed the cache
//! - Whole-frame requests cache every level
//! - Windows are served from a cached whole frame without fetching
//! - Early cancellation stops reading the frame
//! - Errors are reported and never cached

use tlm_proxy::error::{CodestreamError, FrameError, IoError};
use tlm_proxy::frame::{FrameCacheKey, FrameRequest, FrameService, LevelWindow};
use tlm_proxy::io::FrameId;

use super::test_utils::{
    boxed, codestream, frame_id, local_cache, scenario_codestream, scenario_service,
    MockFrameSource,
};

fn request(start: u32, end: Option<u32>) -> FrameRequest {
    FrameRequest::new(frame_id(), LevelWindow::new(start, end))
}

// =============================================================================
// First Level
// =============================================================================

#[tokio::test]
async fn test_first_level_reply() {
    let service = scenario_service();
    let data = scenario_codestream();

    let response = service.request_range(&request(0, Some(0))).await.unwrap();
    assert_eq!(&response.data[..], &data[..4100]);
    assert!(!response.cache_hit);
    assert_eq!(service.source().fetch_count(), 1);
}

#[tokio::test]
async fn test_first_level_seeds_every_level() {
    let service = scenario_service();
    let data = scenario_codestream();

    service.request_range(&request(0, Some(0))).await.unwrap();
    service.wait_for_background().await;
    assert_eq!(service.background_tasks(), 0);

    let local = service.cache().local().unwrap();
    for level in 0..3 {
        let key = FrameCacheKey::window(frame_id(), LevelWindow::single(level));
        assert!(local.contains(&key).await, "level {} not cached", level);
    }
    let whole = local.get(&FrameCacheKey::whole(frame_id())).await.unwrap();
    assert_eq!(&whole[..], &data[..]);

    let level1 = service.request_range(&request(1, Some(1))).await.unwrap();
    assert!(level1.cache_hit);
    assert_eq!(&level1.data[..], &data[4100..6100]);

    // Served by replaying the cached whole frame
    let rest = service.request_range(&request(1, None)).await.unwrap();
    assert!(rest.cache_hit);
    assert_eq!(&rest.data[..], &data[4100..]);

    assert_eq!(service.source().fetch_count(), 1);
}

#[tokio::test]
async fn test_first_level_of_invalid_frame() {
    let mut data = scenario_codestream();
    data[2] = 0x00;
    let source = MockFrameSource::new().with_frame(frame_id(), data);
    let service = FrameService::new(source, local_cache());

    let err = service.request_range(&request(0, Some(0))).await.unwrap_err();
    assert!(matches!(err, FrameError::InvalidFrame(_)));
    service.wait_for_background().await;

    assert!(service.cache().local().unwrap().is_empty().await);
}

#[tokio::test]
async fn test_first_level_survives_later_corruption() {
    let mut data = codestream(&[300, 200]);
    // Break the EOC marker
    let len = data.len();
    data[len - 1] = 0x00;
    let source = MockFrameSource::new().with_frame(frame_id(), data.clone());
    let service = FrameService::new(source, local_cache());

    let response = service.request_range(&request(0, Some(0))).await.unwrap();
    assert_eq!(&response.data[..], &data[..400]);

    service.wait_for_background().await;
    assert!(service.cache().local().unwrap().is_empty().await);
}

// =============================================================================
// Whole Frame and Windows
// =============================================================================

#[tokio::test]
async fn test_whole_frame_request() {
    let service = scenario_service();
    let data = scenario_codestream();

    let response = service.request_range(&request(0, None)).await.unwrap();
    assert_eq!(&response.data[..], &data[..]);
    assert!(!response.cache_hit);

    let level2 = service.request_range(&request(2, Some(2))).await.unwrap();
    assert!(level2.cache_hit);
    assert_eq!(&level2.data[..], &data[6100..7100]);

    let again = service.request_range(&request(0, None)).await.unwrap();
    assert!(again.cache_hit);
    assert_eq!(service.source().fetch_count(), 1);
}

#[tokio::test]
async fn test_cold_and_warm_windows_match() {
    let data = codestream(&[700, 500, 300, 100]);
    let source = MockFrameSource::new()
        .with_frame(frame_id(), data)
        .with_chunk_size(37);
    let service = FrameService::new(source, local_cache()).with_chunk_size(64);

    let windows = [(1, Some(2)), (0, Some(1)), (2, None), (3, Some(3))];

    let mut cold = Vec::new();
    for &(start, end) in &windows {
        let response = service.request_range(&request(start, end)).await.unwrap();
        assert!(!response.cache_hit);
        cold.push(response.data);
    }
    assert_eq!(service.source().fetch_count(), windows.len());

    // Cache the whole frame, then ask for different keys of the same windows
    service.request_range(&request(0, None)).await.unwrap();
    let fetches = service.source().fetch_count();

    for (i, &(start, end)) in windows.iter().enumerate() {
        let key = FrameCacheKey::window(frame_id(), LevelWindow::new(start, end));
        service.cache().local().unwrap().remove(&key).await;

        let warm = service.request_range(&request(start, end)).await.unwrap();
        assert!(warm.cache_hit);
        assert_eq!(warm.data, cold[i]);
    }
    assert_eq!(service.source().fetch_count(), fetches);
}

#[tokio::test]
async fn test_bytes_after_eoc_never_served() {
    let cs = codestream(&[700, 500, 300, 100]);
    let mut padded = cs.clone();
    padded.extend(std::iter::repeat(0xAB).take(200));

    for chunk_size in [37, 40] {
        let source = MockFrameSource::new()
            .with_frame(frame_id(), padded.clone())
            .with_chunk_size(chunk_size);
        let service = FrameService::new(source, local_cache());

        let whole = service.request_range(&request(0, None)).await.unwrap();
        assert_eq!(&whole.data[..], &cs[..], "chunk size {}", chunk_size);

        let cached = service
            .cache()
            .local()
            .unwrap()
            .get(&FrameCacheKey::whole(frame_id()))
            .await
            .unwrap();
        assert_eq!(&cached[..], &cs[..]);

        let tail = service.request_range(&request(2, Some(9))).await.unwrap();
        assert!(tail.cache_hit);
        assert_eq!(&tail.data[..], &cs[100 + 700 + 500..]);
    }
}

#[tokio::test]
async fn test_repeated_requests_are_identical() {
    let service = scenario_service();
    let first = service.request_range(&request(1, Some(2))).await.unwrap();
    let second = service.request_range(&request(1, Some(2))).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(service.source().fetch_count(), 1);
}

#[tokio::test]
async fn test_early_cancellation_stops_reading() {
    let data = codestream(&[200, 20_000, 20_000]);
    let total = data.len();
    let source = MockFrameSource::new()
        .with_frame(frame_id(), data.clone())
        .with_chunk_size(100);
    let service = FrameService::new(source, local_cache());

    let response = service.request_range(&request(0, Some(1))).await.unwrap();
    assert_eq!(&response.data[..], &data[..100 + 200 + 20_000]);
    assert!(service.source().bytes_served() < total);
    assert!(service.source().bytes_served() <= 100 + 200 + 20_000 + 100);
}

#[tokio::test]
async fn test_four_level_layout() {
    let data = codestream(&[4000, 2000, 1000, 500]);
    let source = MockFrameSource::new().with_frame(frame_id(), data.clone());
    let service = FrameService::new(source, local_cache());

    let level0 = service.request_range(&request(0, Some(0))).await.unwrap();
    assert_eq!(&level0.data[..], &data[..4100]);

    let rest = service.request_range(&request(1, Some(3))).await.unwrap();
    assert_eq!(&rest.data[..], &data[4100..7600]);

    let beyond = service.request_range(&request(5, None)).await.unwrap();
    assert!(beyond.data.is_empty());
}

#[tokio::test]
async fn test_window_beyond_levels_is_empty() {
    let service = scenario_service();
    let response = service.request_range(&request(7, None)).await.unwrap();
    assert!(response.data.is_empty());

    let response = service.request_range(&request(3, Some(8))).await.unwrap();
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn test_boxed_frame_serves_codestream_bytes() {
    let cs = scenario_codestream();
    let source = MockFrameSource::new()
        .with_frame(FrameId::new("d", "s", "raw"), cs.clone())
        .with_frame(FrameId::new("d", "s", "jp2"), boxed(&cs, false));
    let service = FrameService::new(source, local_cache());

    for (start, end) in [(0, Some(0)), (1, Some(2)), (0, None)] {
        let window = LevelWindow::new(start, end);
        let raw = service
            .request_range(&FrameRequest::new(FrameId::new("d", "s", "raw"), window))
            .await
            .unwrap();
        let jp2 = service
            .request_range(&FrameRequest::new(FrameId::new("d", "s", "jp2"), window))
            .await
            .unwrap();
        assert_eq!(raw.data, jp2.data, "window {}", window);
    }
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_frame() {
    let service = FrameService::new(MockFrameSource::new(), local_cache());

    for (start, end) in [(0, Some(0)), (0, None), (1, Some(1))] {
        let err = service.request_range(&request(start, end)).await.unwrap_err();
        assert!(matches!(err, FrameError::Upstream(IoError::NotFound(_))));
    }
}

#[tokio::test]
async fn test_invalid_frame_is_not_cached() {
    let source = MockFrameSource::new().with_frame(frame_id(), b"not a codestream".to_vec());
    let service = FrameService::new(source, local_cache());

    for _ in 0..2 {
        let err = service.request_range(&request(1, Some(1))).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidFrame(CodestreamError::NotHtj2k)
        ));
        assert!(err.to_string().starts_with("Invalid image frame"));
    }
    assert_eq!(service.source().fetch_count(), 2);
    assert!(service.cache().local().unwrap().is_empty().await);
}

#[tokio::test]
async fn test_truncated_frame() {
    let mut data = scenario_codestream();
    data.truncate(5000);
    let source = MockFrameSource::new().with_frame(frame_id(), data.clone());
    let service = FrameService::new(source, local_cache());

    // Level 1 is cut short
    let response = service.request_range(&request(0, Some(1))).await;
    assert!(matches!(response, Err(FrameError::InvalidFrame(_))));

    let err = service.request_range(&request(0, None)).await.unwrap_err();
    assert!(matches!(err, FrameError::InvalidFrame(_)));
}
