//! HTTP request handlers for the frame API.
//!
//! # Endpoints
//!
//! - `GET /runtime/datastore/{datastore_id}/imageset/{image_set_id}/imageframe/{image_frame_id}`
//!   - Serve a window of resolution levels
//! - `GET /?datastoreId=..&imageSetId=..&imageFrameId=..` - Same, with query parameters
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{FrameError, IoError};
use crate::frame::{FrameRequest, FrameService};
use crate::io::FrameSource;

/// Response header reporting whether the backing store was skipped
pub const CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-frame-cache-hit");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the frame service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<F: FrameSource> {
    pub frame_service: Arc<FrameService<F>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,
}

impl<F: FrameSource> AppState<F> {
    pub fn new(frame_service: FrameService<F>) -> Self {
        Self::with_cache_max_age(frame_service, 3600)
    }

    pub fn with_cache_max_age(frame_service: FrameService<F>, cache_max_age: u32) -> Self {
        Self::shared(Arc::new(frame_service), cache_max_age)
    }

    /// State around a service the caller keeps a handle on.
    pub fn shared(frame_service: Arc<FrameService<F>>, cache_max_age: u32) -> Self {
        Self {
            frame_service,
            cache_max_age,
        }
    }
}

impl<F: FrameSource> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            frame_service: Arc::clone(&self.frame_service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for the runtime frame endpoint.
#[derive(Debug, Deserialize)]
pub struct FramePathParams {
    pub datastore_id: String,
    pub image_set_id: String,
    pub image_frame_id: String,
}

/// Level window query parameters.
///
/// Levels arrive as strings so that empty values read as "not given".
#[derive(Debug, Default, Deserialize)]
pub struct LevelQueryParams {
    #[serde(rename = "startLevel")]
    pub start_level: Option<String>,

    #[serde(rename = "endLevel")]
    pub end_level: Option<String>,
}

/// Query parameters for the root frame endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct FrameQueryParams {
    #[serde(rename = "datastoreId")]
    pub datastore_id: Option<String>,

    #[serde(rename = "imageSetId")]
    pub image_set_id: Option<String>,

    #[serde(rename = "imageFrameId")]
    pub image_frame_id: Option<String>,

    #[serde(rename = "startLevel")]
    pub start_level: Option<String>,

    #[serde(rename = "endLevel")]
    pub end_level: Option<String>,
}

impl LevelQueryParams {
    fn parse(&self) -> Result<(Option<u32>, Option<u32>), FrameError> {
        parse_levels(self.start_level.as_deref(), self.end_level.as_deref())
    }
}

impl FrameQueryParams {
    fn parse_levels(&self) -> Result<(Option<u32>, Option<u32>), FrameError> {
        parse_levels(self.start_level.as_deref(), self.end_level.as_deref())
    }
}

fn parse_levels(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<u32>, Option<u32>), FrameError> {
    Ok((
        parse_level("startLevel", start)?,
        parse_level("endLevel", end)?,
    ))
}

fn parse_level(name: &str, value: Option<&str>) -> Result<Option<u32>, FrameError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| {
            FrameError::InvalidRequest(format!(
                "{} must be a non-negative integer, got '{}'",
                name, v
            ))
        }),
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "invalid_frame", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert FrameError to HTTP response.
///
/// 5xx errors are logged at ERROR level, 404s at DEBUG and other 4xx errors
/// at WARN.
impl IntoResponse for FrameError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            FrameError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            FrameError::Upstream(IoError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            FrameError::Upstream(IoError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout")
            }
            FrameError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            FrameError::InvalidFrame(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_frame"),
            FrameError::Background(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Frame not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Serve a window of resolution levels.
///
/// `GET /runtime/datastore/{datastore_id}/imageset/{image_set_id}/imageframe/{image_frame_id}`
///
/// # Query Parameters
///
/// - `startLevel`: first level (default: 0)
/// - `endLevel`: last level, inclusive (default: through the last level)
///
/// # Response
///
/// - `200 OK`: codestream bytes with `Content-Type: application/octet-stream`.
///   The body is empty when the window lies beyond the frame's levels.
/// - `400 Bad Request`: malformed level
/// - `404 Not Found`: frame not found in the backing store
/// - `422 Unprocessable Entity`: frame is not a valid HTJ2K codestream
/// - `502 Bad Gateway` / `504 Gateway Timeout`: backing store failure
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Frame-Cache-Hit: true|false`
pub async fn frame_handler<F: FrameSource>(
    State(state): State<AppState<F>>,
    Path(params): Path<FramePathParams>,
    Query(query): Query<LevelQueryParams>,
) -> Result<Response, FrameError> {
    let (start, end) = query.parse()?;
    let request = FrameRequest::from_parts(
        Some(params.datastore_id),
        Some(params.image_set_id),
        Some(params.image_frame_id),
        start,
        end,
    )?;
    serve(&state, request).await
}

/// Serve a window of resolution levels, frame identified by query parameters.
///
/// `GET /?datastoreId=..&imageSetId=..&imageFrameId=..&startLevel=..&endLevel=..`
///
/// Missing identifiers are rejected with `400 Bad Request`.
pub async fn frame_query_handler<F: FrameSource>(
    State(state): State<AppState<F>>,
    Query(query): Query<FrameQueryParams>,
) -> Result<Response, FrameError> {
    let (start, end) = query.parse_levels()?;
    let request = FrameRequest::from_parts(
        query.datastore_id,
        query.image_set_id,
        query.image_frame_id,
        start,
        end,
    )?;
    serve(&state, request).await
}

async fn serve<F: FrameSource>(
    state: &AppState<F>,
    request: FrameRequest,
) -> Result<Response, FrameError> {
    let response = state.frame_service.request_range(&request).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
            (CACHE_HIT_HEADER, response.cache_hit.to_string()),
        ],
        response.data,
    )
        .into_response())
}

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
