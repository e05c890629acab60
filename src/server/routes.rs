//! Router configuration for the frame proxy.
//!
//! # Route Structure
//!
//! ```text
//! /health                                                      - Health check
//! /runtime/datastore/{d}/imageset/{s}/imageframe/{f}           - Frame levels
//! /?datastoreId=..&imageSetId=..&imageFrameId=..               - Frame levels
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tlm_proxy::frame::{FrameService, TieredCache, LocalFrameCache};
//! use tlm_proxy::server::{create_router, RouterConfig};
//!
//! let cache = TieredCache::new(Some(LocalFrameCache::new()), None);
//! let service = FrameService::new(source, cache);
//! let router = create_router(service, RouterConfig::new().with_cache_max_age(86400));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers::{
    frame_handler, frame_query_handler, health_handler, AppState, CACHE_HIT_HEADER,
};
use crate::frame::FrameService;
use crate::io::FrameSource;

/// How long browsers may reuse a preflight answer.
const PREFLIGHT_MAX_AGE: u64 = 86400;

/// `Cache-Control: max-age` when the caller does not set one.
const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// Router Configuration
// =============================================================================

/// HTTP surface settings, independent of the frame service.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origins allowed to fetch levels; `None` allows any origin and an
    /// empty list allows none
    pub cors_origins: Option<Vec<String>>,

    /// `max-age` sent with every level response
    pub cache_max_age: u32,

    /// Wrap the router in a `TraceLayer`
    pub enable_tracing: bool,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around a frame service.
pub fn create_router<F: FrameSource>(
    frame_service: FrameService<F>,
    config: RouterConfig,
) -> Router {
    create_shared_router(Arc::new(frame_service), config)
}

/// Like [`create_router`], for a service the caller keeps a handle on
/// (e.g. to wait for background work at shutdown).
pub fn create_shared_router<F: FrameSource>(
    frame_service: Arc<FrameService<F>>,
    config: RouterConfig,
) -> Router {
    let app_state = AppState::shared(frame_service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/runtime/datastore/{datastore_id}/imageset/{image_set_id}/imageframe/{image_frame_id}",
            get(frame_handler::<F>),
        )
        .route("/", get(frame_query_handler::<F>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// CORS for browser viewers fetching levels from another origin.
///
/// The cache-hit header is exposed so viewers can report it.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([CACHE_HIT_HEADER])
        .max_age(Duration::from_secs(PREFLIGHT_MAX_AGE));

    let Some(origins) = &config.cors_origins else {
        return base.allow_origin(Any);
    };
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring malformed CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        base
    } else {
        base.allow_origin(allowed)
    }
}

// =============================================================================
// Tests
// =============================================================================
