//! HTTP server layer for the frame proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /runtime/datastore/{d}/imageset/{s}/imageframe/{f}        │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error mapping)│  │  (router config, CORS)      │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    frame_handler, frame_query_handler, health_handler, AppState, ErrorResponse,
    FramePathParams, FrameQueryParams, HealthResponse, LevelQueryParams, CACHE_HIT_HEADER,
};
pub use routes::{create_router, create_shared_router, RouterConfig};
